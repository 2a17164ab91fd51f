//! Scan scheduling engine.
//!
//! One task owns the registry and every tracked device. It interleaves
//! three timers with the results that spawned work sends back:
//!
//! - bulk sweep: at startup, then every `network_rescan_interval` minutes,
//!   ping every local address and merge the neighbor table afterwards
//! - tick: every `tick_interval_ms`, resolve each identifier and refresh
//!   its liveness
//! - active probe: every `arping_count - 1` seconds, restart the arping
//!   run of each resolved device so consecutive runs overlap
//!
//! Sweeps and probes run in their own tasks and report back over channels,
//! so registry and device state are only ever mutated here. Failures are
//! logged and never stop a timer.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, Duration, Instant, MissedTickBehavior};
use uuid::Uuid;

use presence_core::{
    ContactEvent, DeviceProvider, ExpiryUnit, Identifier, MonitorConfig, NeighborEntry,
    PropertySink,
};

use crate::probe::{ProbeTarget, Reachability};
use crate::registry::{Registry, Resolution, Upsert};
use crate::subnet::Subnet;

/// Requests from the host framework.
#[derive(Debug, Clone)]
pub enum MonitorCommand {
    /// The user saved (or the host restored) a device; `id` is the raw host identifier.
    UserSavedDevice { id: String, title: String },
    /// The host entered pairing mode.
    StartPairing,
    SetExpiry { id: Identifier, expiry: u32 },
    SetExpiryUnit { id: Identifier, unit: ExpiryUnit },
}

/// Results reported back by sweep tasks.
#[derive(Debug)]
enum Discovery {
    Rows(Vec<NeighborEntry>),
    HuntFinished(Identifier),
}

/// Periods of the three schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub rescan: Duration,
    pub tick: Duration,
    pub probe_restart: Duration,
}

/// Longest period of any schedule. Keeps deadline arithmetic in range.
const MAX_PERIOD: Duration = Duration::from_secs(60 * 60 * 24 * 365);

impl Timing {
    pub fn from_config(config: &MonitorConfig) -> Self {
        let rescan = Duration::from_secs(config.network_rescan_interval.max(1).saturating_mul(60));
        let tick = Duration::from_millis(config.tick_interval_ms.max(1));
        let probe_restart = Duration::from_secs(config.arping_count.saturating_sub(1).max(1));
        Self {
            rescan: rescan.min(MAX_PERIOD),
            tick: tick.min(MAX_PERIOD),
            probe_restart: probe_restart.min(MAX_PERIOD),
        }
    }
}

/// Registry owner; every state change goes through here.
struct Monitor<P> {
    registry: Registry,
    provider: Box<dyn DeviceProvider>,
    sink: Box<dyn PropertySink>,
    probe: Arc<P>,
    subnets: Arc<[Subnet]>,
    hunting: HashSet<Identifier>,
    discoveries: mpsc::UnboundedSender<Discovery>,
    contacts: mpsc::UnboundedSender<ContactEvent>,
}

/// The scheduler drives discovery and liveness for all tracked devices.
pub struct ScanScheduler<P> {
    monitor: Monitor<P>,
    timing: Timing,
    discoveries: mpsc::UnboundedReceiver<Discovery>,
    contacts: mpsc::UnboundedReceiver<ContactEvent>,
}

impl<P: Reachability> ScanScheduler<P> {
    pub fn new(
        config: &MonitorConfig,
        probe: P,
        subnets: Vec<Subnet>,
        provider: Box<dyn DeviceProvider>,
        sink: Box<dyn PropertySink>,
    ) -> Self {
        let (discoveries_tx, discoveries) = mpsc::unbounded_channel();
        let (contacts_tx, contacts) = mpsc::unbounded_channel();
        Self {
            monitor: Monitor {
                registry: Registry::new(&config.device_suffix),
                provider,
                sink,
                probe: Arc::new(probe),
                subnets: subnets.into(),
                hunting: HashSet::new(),
                discoveries: discoveries_tx,
                contacts: contacts_tx,
            },
            timing: Timing::from_config(config),
            discoveries,
            contacts,
        }
    }

    /// Run the schedules forever. Commands stop being read once every
    /// sender is dropped; the schedules keep running.
    pub async fn run(self, mut commands: mpsc::Receiver<MonitorCommand>) {
        let ScanScheduler {
            mut monitor,
            timing,
            mut discoveries,
            mut contacts,
        } = self;

        let mut sweep_timer = interval(timing.rescan);
        sweep_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick_timer = interval(timing.tick);
        tick_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut probe_timer =
            interval_at(Instant::now() + timing.probe_restart, timing.probe_restart);
        probe_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            subnets = monitor.subnets.len(),
            rescan_secs = timing.rescan.as_secs(),
            tick_ms = timing.tick.as_millis(),
            probe_restart_secs = timing.probe_restart.as_secs(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = sweep_timer.tick() => monitor.start_bulk_sweep(),
                _ = tick_timer.tick() => monitor.tick(Utc::now()),
                _ = probe_timer.tick() => monitor.restart_probes(),
                Some(discovery) = discoveries.recv() => monitor.handle_discovery(discovery),
                Some(contact) = contacts.recv() => monitor.handle_contact(contact),
                Some(command) = commands.recv() => monitor.handle_command(command),
            }
        }
    }
}

impl<P: Reachability> Monitor<P> {
    fn handle_command(&mut self, command: MonitorCommand) {
        match command {
            MonitorCommand::UserSavedDevice { id, title } => self.on_user_saved_device(&id, &title),
            MonitorCommand::StartPairing => self.start_bulk_sweep(),
            MonitorCommand::SetExpiry { id, expiry } => {
                let Some(device) = self.registry.get_mut(&id) else {
                    tracing::warn!(device = %id, "Expiry set on unknown device");
                    return;
                };
                match device.set_expiry(expiry) {
                    Ok(changes) => {
                        self.sink.publish_all(changes);
                        if let Err(e) = self.provider.register(device) {
                            tracing::warn!(device = %id, error = %e, "Failed to save device settings");
                        }
                    }
                    Err(e) => tracing::warn!(device = %id, error = %e, "Rejected expiry"),
                }
            }
            MonitorCommand::SetExpiryUnit { id, unit } => {
                let Some(device) = self.registry.get_mut(&id) else {
                    tracing::warn!(device = %id, "Expiry unit set on unknown device");
                    return;
                };
                self.sink.publish_all(device.change_expiry_unit(unit));
                if let Err(e) = self.provider.register(device) {
                    tracing::warn!(device = %id, error = %e, "Failed to save device settings");
                }
            }
        }
    }

    /// The host reports a device the user wants tracked.
    fn on_user_saved_device(&mut self, raw_id: &str, title: &str) {
        let Ok(saved) = Identifier::parse(raw_id, self.registry.suffix()) else {
            tracing::trace!(device = %raw_id, "Ignoring device of another adapter");
            return;
        };
        // Same name derivation as neighbor rows, so a sweep finds this entry.
        let id = self.registry.identifier(&NeighborEntry::name_for(saved.name()));
        tracing::debug!(device = %id, title = %title, "Informed of device");

        match self.registry.resolve(&id, self.provider.as_ref()) {
            Resolution::Tracked(_) => {}
            Resolution::Promoted(device) => {
                let target = ProbeTarget::from(&*device);
                self.start_probe(target);
            }
            Resolution::Hunting => self.hunt(&id),
            Resolution::Unknown => {
                if self.registry.mark_pending(id.clone()) {
                    self.hunt(&id);
                }
            }
        }
    }

    /// Refresh liveness of every device, promoting pending ones when the
    /// provider has caught up and hunting for those still unresolved.
    fn tick(&mut self, now: DateTime<Utc>) {
        for id in self.registry.identifiers() {
            match self.registry.resolve(&id, self.provider.as_ref()) {
                Resolution::Tracked(device) => self.sink.publish_all(device.refresh(now)),
                Resolution::Promoted(device) => {
                    tracing::debug!(device = %id, "Resolved");
                    self.sink.publish_all(device.refresh(now));
                    let target = ProbeTarget::from(&*device);
                    self.start_probe(target);
                }
                Resolution::Hunting => self.hunt(&id),
                Resolution::Unknown => {}
            }
        }
    }

    fn handle_discovery(&mut self, discovery: Discovery) {
        match discovery {
            Discovery::Rows(rows) => {
                for row in &rows {
                    self.merge_row(row);
                }
            }
            Discovery::HuntFinished(id) => {
                self.hunting.remove(&id);
            }
        }
    }

    fn merge_row(&mut self, row: &NeighborEntry) {
        let Upsert { created, device } = self.registry.upsert_from_discovery(row);
        if !created {
            return;
        }
        tracing::debug!(
            device = %device.id,
            link_address = %device.link_address,
            interface = %device.interface,
            "Found"
        );
        if let Err(e) = self.provider.register(device) {
            tracing::warn!(device = %device.id, error = %e, "Failed to register device");
        }
        self.sink.publish_all(device.properties());
        let target = ProbeTarget::from(&*device);
        self.start_probe(target);
    }

    fn handle_contact(&mut self, contact: ContactEvent) {
        let Some(device) = self.registry.get_mut(&contact.device) else {
            return;
        };
        let mut changes = device.record_contact(contact.timestamp);
        if let Some(address) = &contact.source_address {
            changes.extend(device.set_address(address));
        }
        self.sink.publish_all(changes);
    }

    fn restart_probes(&self) {
        let targets: Vec<ProbeTarget> = self.registry.resolved().map(ProbeTarget::from).collect();
        tracing::debug!(devices = targets.len(), "Restarting active probes");
        for target in targets {
            self.start_probe(target);
        }
    }

    fn start_probe(&self, target: ProbeTarget) {
        let device = target.device.clone();
        if let Err(e) = self.probe.active_probe(target, self.contacts.clone()) {
            tracing::error!(device = %device, error = %e, "Failed to start active probe");
        }
    }

    /// Sweep all subnets, then merge the neighbor table.
    fn start_bulk_sweep(&self) {
        let probe = self.probe.clone();
        let subnets = self.subnets.clone();
        let results = self.discoveries.clone();
        tokio::spawn(async move {
            let sweep_id = Uuid::new_v4();
            tracing::info!(sweep_id = %sweep_id, subnets = subnets.len(), "Bulk sweep triggered");

            if let Err(e) = probe.bulk_sweep(&subnets).await {
                tracing::warn!(sweep_id = %sweep_id, error = %e, "Bulk sweep failed");
                return;
            }
            match probe.read_table().await {
                Ok(rows) => {
                    tracing::info!(sweep_id = %sweep_id, rows = rows.len(), "Neighbor table read");
                    let _ = results.send(Discovery::Rows(rows));
                }
                Err(e) => {
                    tracing::warn!(sweep_id = %sweep_id, error = %e, "Neighbor table read failed")
                }
            }
        });
    }

    /// Probe one pending device by name, unless a hunt for it is in flight.
    fn hunt(&mut self, id: &Identifier) {
        if !self.hunting.insert(id.clone()) {
            return;
        }
        let probe = self.probe.clone();
        let results = self.discoveries.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let name = id.name();
            let rows = match probe.targeted_sweep(name).await {
                Ok(()) => match probe.read_table().await {
                    Ok(rows) => scope_to(name, rows),
                    Err(e) => {
                        tracing::warn!(device = %id, error = %e, "Neighbor table read failed");
                        Vec::new()
                    }
                },
                Err(e) => {
                    tracing::warn!(device = %id, error = %e, "Hunt failed");
                    Vec::new()
                }
            };
            if !rows.is_empty() {
                let _ = results.send(Discovery::Rows(rows));
            }
            let _ = results.send(Discovery::HuntFinished(id));
        });
    }
}

/// Keep the rows describing `name`, matched by derived name, host column
/// or IP. The registry maps a kept row onto the hunted identifier.
pub fn scope_to(name: &str, rows: Vec<NeighborEntry>) -> Vec<NeighborEntry> {
    rows.into_iter().filter(|row| row.answers_to(name)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use presence_core::{Property, PropertyChange, PropertyValue, TrackedDevice};

    use crate::error::{MonitorError, Result};
    use crate::probe::SweepReport;

    const SUFFIX: &str = "-np";

    #[derive(Default)]
    struct FakeProbe {
        table: Vec<NeighborEntry>,
        fail_sweep: bool,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl FakeProbe {
        fn with_table(rows: Vec<NeighborEntry>) -> Self {
            Self {
                table: rows,
                ..Self::default()
            }
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Reachability for FakeProbe {
        async fn bulk_sweep(&self, subnets: &[Subnet]) -> Result<SweepReport> {
            self.record(format!("bulk:{}", subnets.len()));
            if self.fail_sweep {
                return Err(MonitorError::SweepFailed { batches: 1 });
            }
            Ok(SweepReport::default())
        }

        async fn targeted_sweep(&self, name: &str) -> Result<()> {
            self.record(format!("targeted:{name}"));
            Ok(())
        }

        async fn read_table(&self) -> Result<Vec<NeighborEntry>> {
            self.record("table".to_string());
            Ok(self.table.clone())
        }

        fn active_probe(
            &self,
            target: ProbeTarget,
            _contacts: mpsc::UnboundedSender<ContactEvent>,
        ) -> Result<()> {
            self.record(format!("probe:{}", target.device));
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryProvider {
        devices: HashMap<Identifier, TrackedDevice>,
    }

    impl DeviceProvider for MemoryProvider {
        fn device(&self, id: &Identifier) -> Option<TrackedDevice> {
            self.devices.get(id).cloned()
        }

        fn register(&mut self, device: &TrackedDevice) -> presence_core::error::Result<()> {
            self.devices.insert(device.id.clone(), device.clone());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<PropertyChange>>>);

    impl PropertySink for SharedSink {
        fn publish(&mut self, change: PropertyChange) {
            self.0.lock().unwrap().push(change);
        }
    }

    impl SharedSink {
        fn last(&self, property: Property) -> Option<PropertyValue> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|c| c.property == property)
                .map(|c| c.value.clone())
        }
    }

    fn row(name: &str, address: &str, mac: &str) -> NeighborEntry {
        NeighborEntry {
            name: name.to_string(),
            address: address.to_string(),
            ip: address.parse().ok(),
            link_address: mac.to_string(),
            interface: "eth0".to_string(),
        }
    }

    /// A row as `arp -a` lists a host with a reverse name.
    fn listed(host: &str, ip: &str, mac: &str) -> NeighborEntry {
        NeighborEntry {
            name: NeighborEntry::name_for(host),
            address: host.to_string(),
            ip: ip.parse().ok(),
            link_address: mac.to_string(),
            interface: "eth0".to_string(),
        }
    }

    fn scheduler(probe: FakeProbe, provider: MemoryProvider) -> (ScanScheduler<FakeProbe>, SharedSink) {
        let config = MonitorConfig {
            device_suffix: SUFFIX.to_string(),
            ..MonitorConfig::default()
        };
        let sink = SharedSink::default();
        let sched = ScanScheduler::new(
            &config,
            probe,
            Vec::new(),
            Box::new(provider),
            Box::new(sink.clone()),
        );
        (sched, sink)
    }

    fn id(name: &str) -> Identifier {
        Identifier::from_name(name, SUFFIX)
    }

    #[test]
    fn test_timing_from_config() {
        let timing = Timing::from_config(&MonitorConfig::default());
        assert_eq!(timing.rescan, Duration::from_secs(3600));
        assert_eq!(timing.tick, Duration::from_millis(250));
        assert_eq!(timing.probe_restart, Duration::from_secs(21_599));
    }

    #[test]
    fn test_scope_to_matches_name_host_or_ip() {
        let rows = vec![
            listed("phone.lan", "192.168.1.20", "aa:aa:aa:aa:aa:aa"),
            listed("tv.lan", "192.168.1.40", "bb:bb:bb:bb:bb:bb"),
            row("laptop", "laptop.lan", "cc:cc:cc:cc:cc:cc"),
        ];
        assert_eq!(scope_to("192.168.1.40", rows.clone()), vec![rows[1].clone()]);
        assert_eq!(scope_to("phone", rows.clone()), vec![rows[0].clone()]);
        assert_eq!(scope_to("laptop.lan", rows.clone()), vec![rows[2].clone()]);
        assert!(scope_to("ghost", rows).is_empty());
    }

    #[test]
    fn test_timing_survives_huge_config_values() {
        let config = MonitorConfig {
            network_rescan_interval: u64::MAX,
            arping_count: u64::MAX,
            tick_interval_ms: u64::MAX,
            ..MonitorConfig::default()
        };
        let timing = Timing::from_config(&config);
        assert_eq!(timing.rescan, MAX_PERIOD);
        assert_eq!(timing.probe_restart, MAX_PERIOD);
        assert_eq!(timing.tick, MAX_PERIOD);
        assert!(Instant::now().checked_add(timing.probe_restart).is_some());
    }

    #[tokio::test]
    async fn test_device_tracked_by_ip_resolves_through_reverse_name() {
        let probe = FakeProbe::with_table(vec![listed(
            "tv.lan",
            "192.168.1.40",
            "bb:bb:bb:bb:bb:bb",
        )]);
        let (mut sched, _sink) = scheduler(probe, MemoryProvider::default());
        let by_ip = id("192.168.1.40");

        sched.monitor.on_user_saved_device("192.168.1.40-np", "TV");
        for _ in 0..2 {
            let discovery = sched.discoveries.recv().await.unwrap();
            sched.monitor.handle_discovery(discovery);
        }
        assert!(!sched.monitor.registry.is_pending(&by_ip));
        assert!(sched.monitor.registry.get_mut(&by_ip).is_some());

        sched.monitor.handle_command(MonitorCommand::StartPairing);
        let discovery = sched.discoveries.recv().await.unwrap();
        sched.monitor.handle_discovery(discovery);

        assert_eq!(sched.monitor.registry.identifiers(), vec![by_ip]);
        assert_eq!(
            sched.monitor.probe.calls(),
            vec![
                "targeted:192.168.1.40",
                "table",
                "probe:192.168.1.40-np",
                "bulk:0",
                "table",
            ]
        );
    }

    #[tokio::test]
    async fn test_saved_hostname_is_tracked_under_derived_name() {
        let probe = FakeProbe::with_table(vec![listed(
            "phone.lan",
            "192.168.1.20",
            "aa:aa:aa:aa:aa:aa",
        )]);
        let (mut sched, _sink) = scheduler(probe, MemoryProvider::default());

        sched.monitor.on_user_saved_device("phone.lan-np", "Phone");
        assert!(sched.monitor.registry.is_pending(&id("phone")));
        assert!(!sched.monitor.registry.contains(&id("phone.lan")));

        sched.monitor.handle_command(MonitorCommand::StartPairing);
        while !sched.monitor.hunting.is_empty() || sched.monitor.registry.is_pending(&id("phone")) {
            let discovery = sched.discoveries.recv().await.unwrap();
            sched.monitor.handle_discovery(discovery);
        }

        assert_eq!(sched.monitor.registry.identifiers(), vec![id("phone")]);
        let probes = sched
            .monitor
            .probe
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("probe:"))
            .count();
        assert_eq!(probes, 1);
        assert!(sched.monitor.probe.calls().contains(&"targeted:phone".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sweeps_at_startup_and_restarts_probes() {
        let probe = FakeProbe::with_table(vec![row("tv", "tv.lan", "bb:bb:bb:bb:bb:bb")]);
        let calls = probe.calls.clone();
        let config = MonitorConfig {
            device_suffix: SUFFIX.to_string(),
            arping_count: 11,
            ..MonitorConfig::default()
        };
        let sched = ScanScheduler::new(
            &config,
            probe,
            Vec::new(),
            Box::new(MemoryProvider::default()),
            Box::new(SharedSink::default()),
        );
        let (_commands, inbox) = mpsc::channel(1);

        // Probe restarts fall at 10s and 20s; the next sweep is an hour out.
        let stopped = tokio::time::timeout(Duration::from_secs(25), sched.run(inbox)).await;
        assert!(stopped.is_err());

        let calls = calls.lock().unwrap().clone();
        assert_eq!(calls[..3], ["bulk:0", "table", "probe:tv-np"]);
        assert_eq!(calls.iter().filter(|c| c.starts_with("bulk")).count(), 1);
        assert_eq!(calls.iter().filter(|c| *c == "probe:tv-np").count(), 3);
    }

    #[tokio::test]
    async fn test_discovery_registers_and_starts_probe() {
        let (mut sched, sink) = scheduler(FakeProbe::default(), MemoryProvider::default());
        let monitor = &mut sched.monitor;

        monitor.handle_discovery(Discovery::Rows(vec![row("phone", "phone.lan", "aa:aa:aa:aa:aa:aa")]));
        monitor.handle_discovery(Discovery::Rows(vec![row("phone", "phone.lan", "aa:aa:aa:aa:aa:ab")]));

        assert!(monitor.provider.device(&id("phone")).is_some());
        assert_eq!(monitor.probe.calls(), vec!["probe:phone-np"]);
        assert_eq!(monitor.registry.get_mut(&id("phone")).unwrap().link_address, "aa:aa:aa:aa:aa:ab");
        assert_eq!(sink.last(Property::Present), Some(PropertyValue::Bool(false)));
        assert_eq!(sink.last(Property::Seconds), Some(PropertyValue::Integer(-1)));
    }

    #[tokio::test]
    async fn test_saved_device_is_hunted_then_resolved() {
        let probe = FakeProbe::with_table(vec![
            row("phone", "phone.lan", "aa:aa:aa:aa:aa:aa"),
            row("tv", "tv.lan", "bb:bb:bb:bb:bb:bb"),
        ]);
        let (mut sched, _sink) = scheduler(probe, MemoryProvider::default());

        sched.monitor.on_user_saved_device("phone-np", "Phone");
        sched.monitor.on_user_saved_device("phone-np", "Phone");
        assert!(sched.monitor.registry.is_pending(&id("phone")));

        let first = sched.discoveries.recv().await.unwrap();
        let second = sched.discoveries.recv().await.unwrap();
        sched.monitor.handle_discovery(first);
        assert!(!sched.monitor.hunting.is_empty());
        sched.monitor.handle_discovery(second);
        assert!(sched.monitor.hunting.is_empty());

        assert!(!sched.monitor.registry.is_pending(&id("phone")));
        assert_eq!(sched.monitor.registry.len(), 1);
        assert_eq!(
            sched.monitor.probe.calls(),
            vec!["targeted:phone", "table", "probe:phone-np"]
        );
    }

    #[tokio::test]
    async fn test_foreign_identifier_is_ignored() {
        let (mut sched, _sink) = scheduler(FakeProbe::default(), MemoryProvider::default());
        sched.monitor.on_user_saved_device("thermostat-zwave", "Thermostat");
        assert!(sched.monitor.registry.is_empty());
        assert!(sched.monitor.hunting.is_empty());
    }

    #[tokio::test]
    async fn test_tick_promotes_pending_device_from_provider() {
        let mut provider = MemoryProvider::default();
        provider
            .register(&TrackedDevice::new(id("tv"), "bb:bb:bb:bb:bb:bb", "wlan0"))
            .unwrap();
        let (mut sched, _sink) = scheduler(FakeProbe::default(), provider);
        sched.monitor.registry.mark_pending(id("tv"));

        sched.monitor.tick(Utc::now());
        sched.monitor.tick(Utc::now());

        assert!(sched.monitor.registry.get_mut(&id("tv")).is_some());
        assert_eq!(sched.monitor.probe.calls(), vec!["probe:tv-np"]);
    }

    #[tokio::test]
    async fn test_contact_marks_present_and_tick_expires() {
        let (mut sched, sink) = scheduler(FakeProbe::default(), MemoryProvider::default());
        let monitor = &mut sched.monitor;
        monitor.handle_discovery(Discovery::Rows(vec![row("phone", "phone.lan", "aa:aa:aa:aa:aa:aa")]));

        let seen = Utc::now();
        monitor.handle_contact(ContactEvent {
            device: id("phone"),
            timestamp: seen,
            source_address: Some("192.168.1.20".to_string()),
        });
        assert_eq!(sink.last(Property::Present), Some(PropertyValue::Bool(true)));
        assert_eq!(
            sink.last(Property::Address),
            Some(PropertyValue::Text("192.168.1.20".to_string()))
        );

        monitor.tick(seen + chrono::Duration::seconds(601));
        assert_eq!(sink.last(Property::Present), Some(PropertyValue::Bool(false)));
        assert_eq!(sink.last(Property::Minutes), Some(PropertyValue::Integer(10)));
    }

    #[tokio::test]
    async fn test_contact_for_unknown_device_is_dropped() {
        let (mut sched, sink) = scheduler(FakeProbe::default(), MemoryProvider::default());
        sched.monitor.handle_contact(ContactEvent {
            device: id("ghost"),
            timestamp: Utc::now(),
            source_address: None,
        });
        assert!(sink.0.lock().unwrap().is_empty());
        assert!(sched.monitor.registry.is_empty());
    }

    #[tokio::test]
    async fn test_expiry_commands_update_and_persist() {
        let (mut sched, sink) = scheduler(FakeProbe::default(), MemoryProvider::default());
        let monitor = &mut sched.monitor;
        monitor.handle_discovery(Discovery::Rows(vec![row("tv", "tv.lan", "bb:bb:bb:bb:bb:bb")]));

        monitor.handle_command(MonitorCommand::SetExpiry { id: id("tv"), expiry: 90 });
        assert_eq!(monitor.provider.device(&id("tv")).unwrap().expiry(), 90);

        monitor.handle_command(MonitorCommand::SetExpiry { id: id("tv"), expiry: 0 });
        assert_eq!(monitor.provider.device(&id("tv")).unwrap().expiry(), 90);

        monitor.handle_command(MonitorCommand::SetExpiryUnit {
            id: id("tv"),
            unit: ExpiryUnit::Hours,
        });
        let stored = monitor.provider.device(&id("tv")).unwrap();
        assert_eq!(stored.expiry_unit(), ExpiryUnit::Hours);
        assert_eq!(stored.expiry(), 1);
        assert_eq!(sink.last(Property::Expiry), Some(PropertyValue::Integer(1)));
    }

    #[tokio::test]
    async fn test_bulk_sweep_merges_table() {
        let probe = FakeProbe::with_table(vec![row("tv", "tv.lan", "bb:bb:bb:bb:bb:bb")]);
        let (mut sched, _sink) = scheduler(probe, MemoryProvider::default());

        sched.monitor.handle_command(MonitorCommand::StartPairing);
        let discovery = sched.discoveries.recv().await.unwrap();
        sched.monitor.handle_discovery(discovery);

        assert!(sched.monitor.registry.get_mut(&id("tv")).is_some());
        assert_eq!(sched.monitor.probe.calls(), vec!["bulk:0", "table", "probe:tv-np"]);
    }

    #[tokio::test]
    async fn test_failed_bulk_sweep_skips_table() {
        let probe = FakeProbe {
            fail_sweep: true,
            ..FakeProbe::default()
        };
        let (mut sched, _sink) = scheduler(probe, MemoryProvider::default());

        sched.monitor.start_bulk_sweep();
        let waited =
            tokio::time::timeout(Duration::from_millis(200), sched.discoveries.recv()).await;
        assert!(waited.is_err());
        assert_eq!(sched.monitor.probe.calls(), vec!["bulk:0"]);
    }
}
