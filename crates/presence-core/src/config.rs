//! Configuration for the presence monitor.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`PRESENCE__MONITOR__` prefix)
//! 2. Config file (`presence.toml`, `[monitor]` section)
//! 3. Defaults

use serde::Deserialize;

use crate::error::Result;

/// Top-level monitor configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Verbose logging (debug level unless `RUST_LOG` says otherwise).
    #[serde(default)]
    pub logging: bool,

    /// Number of ping commands grouped into one shell invocation.
    #[serde(default = "default_ping_batch_size")]
    pub ping_batch_size: usize,

    /// Upper bound on ping batches running at the same time.
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,

    /// Minutes between bulk network sweeps.
    #[serde(default = "default_rescan_interval")]
    pub network_rescan_interval: u64,

    /// Queries per active probe run; arping sends one per second.
    #[serde(default = "default_arping_count")]
    pub arping_count: u64,

    /// Milliseconds between liveness refreshes.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    #[serde(default = "default_ping_path")]
    pub ping_path: String,

    #[serde(default = "default_arping_path")]
    pub arping_path: String,

    #[serde(default = "default_arp_path")]
    pub arp_path: String,

    #[serde(default = "default_shell_path")]
    pub shell_path: String,

    /// Appended to device names to form identifiers owned by this installation.
    #[serde(default = "default_device_suffix")]
    pub device_suffix: String,

    /// JSON file holding registered devices and their expiry settings.
    #[serde(default = "default_store_path")]
    pub store_path: String,

    /// Names or addresses to track from startup.
    #[serde(default)]
    pub devices: Vec<String>,
}

const MAX_RESCAN_MINUTES: u64 = 60 * 24 * 365;
const MAX_ARPING_COUNT: u64 = 60 * 60 * 24 * 365;
const MAX_TICK_MS: u64 = 60 * 60 * 1000;

fn default_ping_batch_size() -> usize {
    11
}

fn default_max_concurrent_batches() -> usize {
    32
}

fn default_rescan_interval() -> u64 {
    60
}

fn default_arping_count() -> u64 {
    60 * 60 * 6
}

fn default_tick_interval_ms() -> u64 {
    250
}

fn default_ping_path() -> String {
    "ping".to_string()
}

fn default_arping_path() -> String {
    "arping".to_string()
}

fn default_arp_path() -> String {
    "arp".to_string()
}

fn default_shell_path() -> String {
    "sh".to_string()
}

fn default_device_suffix() -> String {
    "-network-presence".to_string()
}

fn default_store_path() -> String {
    "./presence-devices.json".to_string()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            logging: false,
            ping_batch_size: default_ping_batch_size(),
            max_concurrent_batches: default_max_concurrent_batches(),
            network_rescan_interval: default_rescan_interval(),
            arping_count: default_arping_count(),
            tick_interval_ms: default_tick_interval_ms(),
            ping_path: default_ping_path(),
            arping_path: default_arping_path(),
            arp_path: default_arp_path(),
            shell_path: default_shell_path(),
            device_suffix: default_device_suffix(),
            store_path: default_store_path(),
            devices: Vec::new(),
        }
    }
}

impl MonitorConfig {
    /// Load the `[monitor]` section from `file_prefix` and the environment.
    /// A missing section yields the defaults.
    pub fn load(file_prefix: &str) -> Result<Self> {
        let cfg = ::config::Config::builder()
            .add_source(::config::File::with_name(file_prefix).required(false))
            .add_source(
                ::config::Environment::with_prefix("PRESENCE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded = match cfg.get::<MonitorConfig>("monitor") {
            Ok(c) => c,
            Err(::config::ConfigError::NotFound(_)) => MonitorConfig::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(loaded.sanitized())
    }

    /// Like `load`, but startup never fails on configuration: errors are
    /// logged and the defaults are used.
    pub fn load_or_default(file_prefix: &str) -> Self {
        Self::load(file_prefix).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to load configuration, using defaults");
            Self::default()
        })
    }

    /// Clamp values that would stall the scheduler or overflow its timers.
    fn sanitized(mut self) -> Self {
        self.ping_batch_size = self.ping_batch_size.max(1);
        self.max_concurrent_batches = self.max_concurrent_batches.max(1);
        self.network_rescan_interval = self.network_rescan_interval.clamp(1, MAX_RESCAN_MINUTES);
        self.arping_count = self.arping_count.clamp(2, MAX_ARPING_COUNT);
        self.tick_interval_ms = self.tick_interval_ms.clamp(1, MAX_TICK_MS);
        self
    }
}
