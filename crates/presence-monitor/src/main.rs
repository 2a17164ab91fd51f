//! CLI entry point for the presence monitor.

use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, EnvFilter};

use presence_core::{Identifier, MonitorConfig, NeighborEntry};

use presence_monitor::probe::{Prober, Reachability};
use presence_monitor::scheduler::{MonitorCommand, ScanScheduler};
use presence_monitor::store::{FileDeviceStore, TracingSink};
use presence_monitor::subnet::{local_subnets, Subnet};

#[derive(Parser)]
#[command(name = "presence-monitor")]
#[command(about = "Track which devices are present on the local network")]
struct Cli {
    /// Config file prefix (default: presence).
    #[arg(short, long, default_value = "presence")]
    config: String,

    /// Device name or address to track. May be repeated.
    #[arg(short, long)]
    track: Vec<String>,

    /// Sweep once, print the neighbor table as JSON and exit.
    #[arg(long)]
    once: bool,

    /// Human-readable logs instead of JSON.
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let loaded = MonitorConfig::load(&cli.config);
    let verbose = loaded.as_ref().map(|c| c.logging).unwrap_or(false);
    init_tracing(verbose, cli.pretty);

    let config = loaded.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load configuration, using defaults");
        MonitorConfig::default()
    });

    let subnets = local_subnets();
    if subnets.is_empty() {
        tracing::warn!("No IPv4 subnets found, bulk sweeps will probe nothing");
    }
    let prober = Prober::new(&config);

    if cli.once {
        return run_once(&prober, &subnets).await;
    }

    let store = FileDeviceStore::open(&config.store_path, &config.device_suffix)?;
    tracing::info!(path = %store.path().display(), "Device store ready");

    let initial = initial_commands(&store, &config, &cli.track);
    let (commands, inbox) = mpsc::channel(initial.len() + 16);
    for command in initial {
        if let Err(e) = commands.try_send(command) {
            tracing::warn!(error = %e, "Failed to queue startup device");
        }
    }

    let sched = ScanScheduler::new(
        &config,
        prober,
        subnets,
        Box::new(store),
        Box::new(TracingSink),
    );

    tokio::select! {
        _ = sched.run(inbox) => {}
        _ = shutdown_signal() => tracing::info!("Shutting down"),
    }

    drop(commands);
    Ok(())
}

fn init_tracing(verbose: bool, pretty: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    if pretty {
        fmt().with_env_filter(filter).init();
    } else {
        fmt().with_env_filter(filter).json().init();
    }
}

/// One bulk sweep followed by a neighbor table dump on stdout.
async fn run_once(prober: &Prober, subnets: &[Subnet]) -> anyhow::Result<()> {
    let report = prober.bulk_sweep(subnets).await?;
    let rows = prober.read_table().await?;
    tracing::info!(
        addresses = report.addresses,
        rows = rows.len(),
        "Single sweep complete"
    );
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

/// Devices to announce at startup: everything already in the store, then
/// the names from the config file and the command line.
fn initial_commands(
    store: &FileDeviceStore,
    config: &MonitorConfig,
    track: &[String],
) -> Vec<MonitorCommand> {
    let saved = store.identifiers().into_iter().map(|id| {
        let title = store.title(&id).unwrap_or(id.name()).to_string();
        MonitorCommand::UserSavedDevice {
            id: id.to_string(),
            title,
        }
    });
    let requested = config.devices.iter().chain(track).map(|raw| {
        let name = NeighborEntry::name_for(raw.trim());
        let id = Identifier::from_name(&name, &config.device_suffix);
        MonitorCommand::UserSavedDevice {
            id: id.to_string(),
            title: name,
        }
    });
    saved.chain(requested).collect()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
