//! Reachability probes.
//!
//! Runs `ping`, `arping` and `arp` as child processes via
//! `tokio::process::Command`. Individual probes that get no answer are the
//! normal case and never surface as errors: batch scripts end in `exit 0`
//! and targeted probes ignore the exit status. Only output on stderr counts
//! as a command-level failure.

use std::future::Future;
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::time::Instant;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

use presence_core::{ContactEvent, Identifier, MonitorConfig, NeighborEntry, TrackedDevice};

use crate::error::{MonitorError, Result};
use crate::neighbor::{parse_neighbor_table, table_args};
use crate::subnet::Subnet;

/// Captured output of a finished command.
#[derive(Debug, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Outcome of a bulk sweep. Says nothing about which devices answered.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub addresses: u64,
    pub batches: usize,
    pub failed_batches: usize,
}

impl SweepReport {
    fn record(&mut self, joined: std::result::Result<Result<CommandOutput>, JoinError>) {
        self.batches += 1;
        match joined {
            Ok(Ok(output)) if output.stderr.trim().is_empty() => {}
            Ok(Ok(output)) => {
                self.failed_batches += 1;
                tracing::warn!(stderr = %output.stderr.trim(), "Ping batch reported errors");
            }
            Ok(Err(e)) => {
                self.failed_batches += 1;
                tracing::warn!(error = %e, "Ping batch failed");
            }
            Err(e) => {
                self.failed_batches += 1;
                tracing::error!(error = %e, "Ping batch task panicked");
            }
        }
    }
}

/// Link-layer details an active probe is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub device: Identifier,
    pub link_address: String,
    pub interface: String,
}

impl From<&TrackedDevice> for ProbeTarget {
    fn from(device: &TrackedDevice) -> Self {
        Self {
            device: device.id.clone(),
            link_address: device.link_address.clone(),
            interface: device.interface.clone(),
        }
    }
}

/// A reply line from an active probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReply {
    pub address: Option<String>,
}

/// Network reachability operations the scheduler depends on.
pub trait Reachability: Send + Sync + 'static {
    /// Fire one echo request at every sweepable address of `subnets`.
    fn bulk_sweep(&self, subnets: &[Subnet]) -> impl Future<Output = Result<SweepReport>> + Send;

    /// One echo request and one link-layer query aimed at a single name.
    fn targeted_sweep(&self, name: &str) -> impl Future<Output = Result<()>> + Send;

    /// Current contents of the neighbor table.
    fn read_table(&self) -> impl Future<Output = Result<Vec<NeighborEntry>>> + Send;

    /// Start a long-running link-layer probe that reports each reply on
    /// `contacts` until its query budget runs out.
    fn active_probe(
        &self,
        target: ProbeTarget,
        contacts: mpsc::UnboundedSender<ContactEvent>,
    ) -> Result<()>;
}

/// System-command implementation of [`Reachability`].
pub struct Prober {
    ping_path: String,
    arping_path: String,
    arp_path: String,
    shell_path: String,
    batch_size: usize,
    max_batches: usize,
    arping_count: u64,
}

impl Prober {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            ping_path: config.ping_path.clone(),
            arping_path: config.arping_path.clone(),
            arp_path: config.arp_path.clone(),
            shell_path: config.shell_path.clone(),
            batch_size: config.ping_batch_size.max(1),
            max_batches: config.max_concurrent_batches.max(1),
            arping_count: config.arping_count,
        }
    }
}

impl Reachability for Prober {
    async fn bulk_sweep(&self, subnets: &[Subnet]) -> Result<SweepReport> {
        let start = Instant::now();
        let mut report = SweepReport::default();
        let mut batches = JoinSet::new();

        // Scripts are generated on demand; at most `max_batches` are alive.
        for subnet in subnets {
            report.addresses += subnet.target_count();
            for script in ping_scripts(&self.ping_path, subnet.probe_targets(), self.batch_size) {
                while batches.len() >= self.max_batches {
                    match batches.join_next().await {
                        Some(joined) => report.record(joined),
                        None => break,
                    }
                }
                let shell = self.shell_path.clone();
                batches.spawn(async move { run_shell(&shell, &script).await });
            }
        }
        while let Some(joined) = batches.join_next().await {
            report.record(joined);
        }

        tracing::info!(
            subnets = subnets.len(),
            addresses = report.addresses,
            batches = report.batches,
            failed = report.failed_batches,
            duration_ms = start.elapsed().as_millis(),
            "Bulk sweep complete"
        );

        if report.batches > 0 && report.failed_batches == report.batches {
            return Err(MonitorError::SweepFailed {
                batches: report.batches,
            });
        }
        Ok(report)
    }

    async fn targeted_sweep(&self, name: &str) -> Result<()> {
        tracing::debug!(name = %name, "Hunting");

        let mut ping = Command::new(&self.ping_path);
        ping.args(targeted_ping_args(name));
        let mut arping = Command::new(&self.arping_path);
        arping.args(targeted_arping_args(name));

        let (ping, arping) = tokio::join!(
            run(ping, &self.ping_path),
            run(arping, &self.arping_path)
        );

        let mut last_error = None;
        let mut clean = 0;
        for (program, result) in [(&self.ping_path, ping), (&self.arping_path, arping)] {
            match result.and_then(|out| check_stderr(program, out)) {
                Ok(_) => clean += 1,
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "Targeted probe failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if clean == 0 => Err(e),
            _ => Ok(()),
        }
    }

    async fn read_table(&self) -> Result<Vec<NeighborEntry>> {
        let mut arp = Command::new(&self.arp_path);
        arp.args(table_args());
        let output = run(arp, &self.arp_path).await?;
        let output = check_stderr(&self.arp_path, output)?;
        Ok(parse_neighbor_table(&output.stdout))
    }

    fn active_probe(
        &self,
        target: ProbeTarget,
        contacts: mpsc::UnboundedSender<ContactEvent>,
    ) -> Result<()> {
        let mut child = Command::new(&self.arping_path)
            .args(active_probe_args(self.arping_count, &target))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MonitorError::Spawn {
                program: self.arping_path.clone(),
                source,
            })?;

        tracing::debug!(device = %target.device, interface = %target.interface, "Tracking");

        if let Some(stderr) = child.stderr.take() {
            let device = target.device.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(device = %device, stderr = %line, "arping");
                }
            });
        }

        let stdout = child.stdout.take();
        tokio::spawn(async move {
            let device = target.device;
            if let Some(stdout) = stdout {
                stream_replies(stdout, &device, &contacts).await;
            }
            if contacts.is_closed() {
                let _ = child.start_kill();
            }
            match child.wait().await {
                Ok(status) => {
                    tracing::debug!(device = %device, code = ?status.code(), "Active probe completed")
                }
                Err(e) => tracing::error!(device = %device, error = %e, "Active probe failed"),
            }
        });

        Ok(())
    }
}

/// `ping` arguments for a targeted sweep: one IPv4 echo, one second wait.
pub fn targeted_ping_args(name: &str) -> [&str; 6] {
    ["-c", "1", "-W", "1", "-4", name]
}

/// `arping` arguments for a targeted sweep: a single query.
pub fn targeted_arping_args(name: &str) -> [&str; 3] {
    ["-c", "1", name]
}

/// `arping` arguments for an active probe: `count` queries, one per second,
/// to the target's link address on its interface.
pub fn active_probe_args(count: u64, target: &ProbeTarget) -> [String; 5] {
    [
        "-c".to_string(),
        count.to_string(),
        "-i".to_string(),
        target.interface.clone(),
        target.link_address.clone(),
    ]
}

/// Forward every reply line read from `reader` as a contact for `device`.
/// Stops at end of stream or once nobody is listening.
pub async fn stream_replies<R>(
    reader: R,
    device: &Identifier,
    contacts: &mpsc::UnboundedSender<ContactEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let Some(reply) = parse_reply(&line) else {
                    continue;
                };
                let event = ContactEvent {
                    device: device.clone(),
                    timestamp: Utc::now(),
                    source_address: reply.address,
                };
                if contacts.send(event).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(device = %device, error = %e, "Failed reading probe output");
                break;
            }
        }
    }
}

/// Recognize an arping reply line and pull out the responding address.
///
/// `60 bytes from 00:11:22:33:44:55 (192.168.1.5): index=0 time=1.2 msec`
pub fn parse_reply(line: &str) -> Option<ProbeReply> {
    if !line.contains(" bytes ") {
        return None;
    }
    let address = line
        .split_whitespace()
        .skip_while(|t| *t != "from")
        .skip(1)
        .map(|t| t.trim_matches(|c| matches!(c, '(' | ')' | '[' | ']' | ':' | ',')))
        .find(|t| t.parse::<Ipv4Addr>().is_ok())
        .or_else(|| line.split(' ').nth(3))
        .map(str::to_string);
    Some(ProbeReply { address })
}

/// Group one `ping` per address into shell scripts of `batch_size`
/// commands. Scripts are built as the iterator is advanced.
pub fn ping_scripts<'a, I>(
    ping: &'a str,
    targets: I,
    batch_size: usize,
) -> impl Iterator<Item = String> + 'a
where
    I: IntoIterator<Item = Ipv4Addr>,
    I::IntoIter: 'a,
{
    let mut targets = targets.into_iter();
    let batch_size = batch_size.max(1);
    std::iter::from_fn(move || {
        let mut script = String::new();
        for ip in targets.by_ref().take(batch_size) {
            script.push_str(&format!("{ping} -c 1 -W 1 {ip};"));
        }
        if script.is_empty() {
            return None;
        }
        script.push_str("exit 0");
        Some(script)
    })
}

async fn run_shell(shell: &str, script: &str) -> Result<CommandOutput> {
    let mut cmd = Command::new(shell);
    cmd.arg("-c").arg(script);
    run(cmd, shell).await
}

async fn run(mut cmd: Command, program: &str) -> Result<CommandOutput> {
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| MonitorError::Spawn {
            program: program.to_string(),
            source,
        })?;
    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

fn check_stderr(program: &str, output: CommandOutput) -> Result<CommandOutput> {
    if output.stderr.trim().is_empty() {
        Ok(output)
    } else {
        Err(MonitorError::CommandFailed {
            program: program.to_string(),
            stderr: output.stderr.trim().to_string(),
        })
    }
}
