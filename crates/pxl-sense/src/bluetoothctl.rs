use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use pxl_engine::{BeaconAddress, Sample};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::{CommandSpec, DiscoveryHandle, RssiSampleSource, SampleCache, SenseError};

/// Extra time granted to the discovery task beyond `stop_timeout`.
const STOP_SLACK: Duration = Duration::from_secs(1);

fn rssi_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"Device\s+([0-9A-Fa-f]{2}(?::[0-9A-Fa-f]{2}){5})",
            r"\s+RSSI:\s*(?:0x[0-9A-Fa-f]+\s*\(\s*)?(-?\d+)",
        ))
        .expect("static rssi pattern")
    })
}

/// Extract `(address, rssi)` from one line of `bluetoothctl` output.
///
/// Accepts both `Device AA:.. RSSI: -67` and the newer
/// `Device AA:.. RSSI: 0xffffffbd (-67)` forms. Anything else is `None`.
pub fn parse_rssi_line(line: &str) -> Option<(BeaconAddress, f64)> {
    let caps = rssi_line_re().captures(line)?;
    let address = BeaconAddress::parse(caps.get(1)?.as_str()).ok()?;
    let rssi: i32 = caps.get(2)?.as_str().parse().ok()?;
    Some((address, f64::from(rssi)))
}

/// Discovery via a long-running `bluetoothctl` child.
///
/// Readings land in a shared [`SampleCache`]. A child that exits on its own
/// is respawned after `restart_backoff`.
#[derive(Debug, Clone)]
pub struct BluetoothctlScanner {
    command: CommandSpec,
    cache: SampleCache,
    restart_backoff: Duration,
    stop_timeout: Duration,
}

impl BluetoothctlScanner {
    pub fn new(command: CommandSpec, restart_backoff: Duration, stop_timeout: Duration) -> Self {
        Self {
            command,
            cache: SampleCache::new(),
            restart_backoff,
            stop_timeout,
        }
    }
}

#[async_trait]
impl RssiSampleSource for BluetoothctlScanner {
    fn name(&self) -> &'static str {
        "bluetoothctl"
    }

    /// The first child is spawned here so that a missing binary fails
    /// startup instead of looping on restarts.
    async fn start_discovery(&self) -> Result<DiscoveryHandle, SenseError> {
        let first = spawn_scanner(&self.command).await?;
        info!(command = %self.command.display(), "discovery started");

        let command = self.command.clone();
        let cache = self.cache.clone();
        let backoff = self.restart_backoff;
        let stop_timeout = self.stop_timeout;
        Ok(DiscoveryHandle::spawn(move |stop_rx| {
            run_scanner(command, first, cache, backoff, stop_timeout, stop_rx)
        }))
    }

    async fn latest_sample(&self, address: &BeaconAddress) -> Option<Sample> {
        self.cache.latest(address).await
    }

    async fn stop_discovery(&self, handle: DiscoveryHandle) -> Result<(), SenseError> {
        handle.stop(self.stop_timeout + STOP_SLACK).await?;
        info!("discovery stopped");
        Ok(())
    }
}

async fn spawn_scanner(command: &CommandSpec) -> Result<Child, SenseError> {
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .envs(&command.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SenseError::Spawn {
            program: command.program.clone(),
            message: e.to_string(),
        })?;

    // stdin stays open for the life of the child; closing it ends bluetoothctl.
    if let Some(stdin) = child.stdin.as_mut() {
        stdin
            .write_all(b"scan on\n")
            .await
            .map_err(|e| SenseError::Io(format!("writing scan on: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| SenseError::Io(format!("writing scan on: {e}")))?;
    }
    Ok(child)
}

enum PumpEnd {
    Stopped,
    Closed(String),
}

async fn run_scanner(
    command: CommandSpec,
    first: Child,
    cache: SampleCache,
    backoff: Duration,
    stop_timeout: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut pending = Some(first);
    loop {
        let mut child = match pending.take() {
            Some(c) => c,
            None => match spawn_scanner(&command).await {
                Ok(c) => {
                    info!(command = %command.display(), "scanner restarted");
                    c
                }
                Err(e) => {
                    warn!(error = %e, "scanner restart failed");
                    if sleep_or_stop(&mut stop_rx, backoff).await {
                        return;
                    }
                    continue;
                }
            },
        };

        match pump_lines(&mut child, &cache, &mut stop_rx).await {
            PumpEnd::Stopped => {
                shutdown_child(child, stop_timeout).await;
                return;
            }
            PumpEnd::Closed(reason) => {
                warn!(
                    reason = %reason,
                    backoff_ms = backoff.as_millis() as u64,
                    "scanner output ended; restarting"
                );
                let _ = child.kill().await;
                if sleep_or_stop(&mut stop_rx, backoff).await {
                    return;
                }
            }
        }
    }
}

/// Returns true when the stop signal arrived first.
async fn sleep_or_stop(stop_rx: &mut oneshot::Receiver<()>, d: Duration) -> bool {
    tokio::select! {
        _ = stop_rx => true,
        _ = tokio::time::sleep(d) => false,
    }
}

async fn pump_lines(
    child: &mut Child,
    cache: &SampleCache,
    stop_rx: &mut oneshot::Receiver<()>,
) -> PumpEnd {
    let Some(stdout) = child.stdout.take() else {
        return PumpEnd::Closed("stdout not captured".to_string());
    };
    let mut lines = BufReader::new(stdout).lines();
    loop {
        tokio::select! {
            _ = &mut *stop_rx => return PumpEnd::Stopped,
            next = lines.next_line() => match next {
                Ok(Some(line)) => {
                    if let Some((address, rssi)) = parse_rssi_line(&line) {
                        trace!(address = %address, rssi, "rssi reading");
                        let now = tokio::time::Instant::now().into_std();
                        cache.record(Sample::new(address, rssi, now)).await;
                    }
                }
                Ok(None) => return PumpEnd::Closed("stdout closed".to_string()),
                Err(e) => return PumpEnd::Closed(e.to_string()),
            },
        }
    }
}

async fn shutdown_child(mut child: Child, stop_timeout: Duration) {
    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(b"scan off\nquit\n").await;
        let _ = stdin.flush().await;
    }
    match tokio::time::timeout(stop_timeout, child.wait()).await {
        Ok(Ok(status)) => debug!(%status, "scanner exited"),
        Ok(Err(e)) => warn!(error = %e, "waiting for scanner failed"),
        Err(_) => {
            warn!(
                stop_timeout_ms = stop_timeout.as_millis() as u64,
                "scanner ignored quit; killing"
            );
            let _ = child.kill().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_hex_rssi_lines() {
        let (a, r) = parse_rssi_line("[CHG] Device A4:C1:38:12:34:56 RSSI: -67").unwrap();
        assert_eq!(a.as_str(), "A4:C1:38:12:34:56");
        assert_eq!(r, -67.0);

        let colored = "[\x1b[0;93mCHG\x1b[0m] Device a4:c1:38:12:34:56 RSSI: 0xffffffbd (-67)";
        let (a, r) = parse_rssi_line(colored).unwrap();
        assert_eq!(a.as_str(), "A4:C1:38:12:34:56");
        assert_eq!(r, -67.0);
    }

    #[test]
    fn ignores_lines_without_rssi() {
        assert!(parse_rssi_line("[NEW] Device A4:C1:38:12:34:56 LYWSD03MMC").is_none());
        assert!(parse_rssi_line("[CHG] Device A4:C1:38:12:34:56 TxPower: 4").is_none());
        assert!(parse_rssi_line("Discovery started").is_none());
        assert!(parse_rssi_line("").is_none());
    }

    fn sh(script: &str) -> CommandSpec {
        let argv = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        CommandSpec::from_argv(&argv, &Default::default()).unwrap()
    }

    async fn wait_for_sample(
        scanner: &BluetoothctlScanner,
        address: &BeaconAddress,
    ) -> Option<Sample> {
        for _ in 0..100 {
            if let Some(s) = scanner.latest_sample(address).await {
                return Some(s);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        None
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn scanner_feeds_cache_and_quits_on_stop() {
        let script = r#"
read first
echo "[CHG] Device A4:C1:38:00:00:01 RSSI: -58"
while read line; do
  if [ "$line" = quit ]; then exit 0; fi
done
"#;
        let scanner =
            BluetoothctlScanner::new(sh(script), Duration::from_millis(50), Duration::from_secs(2));
        let handle = scanner.start_discovery().await.unwrap();
        let address = BeaconAddress::parse("A4:C1:38:00:00:01").unwrap();

        let sample = wait_for_sample(&scanner, &address).await.unwrap();
        assert_eq!(sample.rssi, -58.0);
        assert!(handle.is_running());

        scanner.stop_discovery(handle).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exited_child_is_respawned() {
        let script = r#"read first; echo "[CHG] Device A4:C1:38:00:00:02 RSSI: -71""#;
        let scanner =
            BluetoothctlScanner::new(sh(script), Duration::from_millis(20), Duration::from_secs(1));
        let handle = scanner.start_discovery().await.unwrap();
        let address = BeaconAddress::parse("A4:C1:38:00:00:02").unwrap();

        let first = wait_for_sample(&scanner, &address).await.unwrap();
        // A later reading can only come from a respawned child.
        let mut refreshed = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if let Some(s) = scanner.latest_sample(&address).await {
                if s.observed_at > first.observed_at {
                    refreshed = true;
                    break;
                }
            }
        }
        assert!(refreshed);
        assert!(handle.is_running());
        scanner.stop_discovery(handle).await.unwrap();
    }

    #[tokio::test]
    async fn missing_program_fails_start() {
        let argv = ["pxl-no-such-bluetoothctl".to_string()];
        let cmd = CommandSpec::from_argv(&argv, &Default::default()).unwrap();
        let scanner =
            BluetoothctlScanner::new(cmd, Duration::from_millis(10), Duration::from_millis(10));
        let err = scanner.start_discovery().await.unwrap_err();
        assert!(matches!(err, SenseError::Spawn { .. }));
    }
}
