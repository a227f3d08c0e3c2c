//! Collaborator boundary for the proximity lock daemon.
//!
//! This crate defines the three things the control loop talks to:
//! - [`RssiSampleSource`]: background discovery plus "latest reading for address"
//! - [`LockStateObserver`]: is the screen locked right now
//! - [`LockActuator`]: lock / unlock commands
//!
//! and the concrete Linux implementations: a `bluetoothctl` scanner feeding a
//! [`SampleCache`], and screensaver commands run as child processes.
//!
//! No decision logic belongs here. All of it lives in `pxl-engine`.

mod bluetoothctl;
mod command;
mod sample_cache;
mod screensaver;

pub use bluetoothctl::{parse_rssi_line, BluetoothctlScanner};
pub use command::{CommandOutput, CommandSpec};
pub use sample_cache::SampleCache;
pub use screensaver::{ScreensaverActuator, ScreensaverObserver};

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use pxl_engine::{BeaconAddress, Sample};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors a collaborator may return. None of them are fatal to the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenseError {
    /// A child process could not be started.
    Spawn { program: String, message: String },
    /// Reading from or writing to a child process failed.
    Io(String),
    /// The operation did not finish within its bound.
    Timeout { what: String, after: Duration },
    /// The command ran and exited unsuccessfully.
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
    /// Construction-time misconfiguration (bad pattern, empty argv).
    Config(String),
}

impl fmt::Display for SenseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SenseError::Spawn { program, message } => {
                write!(f, "failed to start {program}: {message}")
            }
            SenseError::Io(msg) => write!(f, "io error: {msg}"),
            SenseError::Timeout { what, after } => {
                write!(f, "{what} timed out after {}ms", after.as_millis())
            }
            SenseError::CommandFailed {
                program,
                code: Some(c),
                stderr,
            } => write!(f, "{program} exited with status {c}: {}", stderr.trim()),
            SenseError::CommandFailed {
                program,
                code: None,
                stderr,
            } => write!(f, "{program} terminated by signal: {}", stderr.trim()),
            SenseError::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for SenseError {}

// ---------------------------------------------------------------------------
// Discovery handle
// ---------------------------------------------------------------------------

/// Owns a running background discovery task.
///
/// Stopping sends a cooperative stop signal and waits up to a grace period
/// before aborting. Dropping an unstopped handle aborts the task.
#[derive(Debug)]
pub struct DiscoveryHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl DiscoveryHandle {
    /// Spawn `body` on the runtime. `body` receives the stop signal and must
    /// return promptly once it resolves.
    pub fn spawn<F, Fut>(body: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(body(stop_rx));
        Self {
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    /// A handle with nothing behind it, for sources that need no background work.
    pub fn inert() -> Self {
        Self {
            stop_tx: None,
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub async fn stop(mut self, grace: Duration) -> Result<(), SenseError> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        let Some(mut task) = self.task.take() else {
            return Ok(());
        };
        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(join_err)) => Err(SenseError::Io(format!(
                "discovery task ended abnormally: {join_err}"
            ))),
            Err(_) => {
                task.abort();
                Err(SenseError::Timeout {
                    what: "discovery shutdown".to_string(),
                    after: grace,
                })
            }
        }
    }
}

impl Drop for DiscoveryHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Continuous beacon discovery with an on-demand "latest reading" query.
///
/// Object-safe so the loop can hold an `Arc<dyn RssiSampleSource>`.
#[async_trait]
pub trait RssiSampleSource: Send + Sync {
    /// Short name for logs (e.g. `"bluetoothctl"`).
    fn name(&self) -> &'static str;

    async fn start_discovery(&self) -> Result<DiscoveryHandle, SenseError>;

    /// Most recent reading for `address`, or `None` if it has not been seen.
    async fn latest_sample(&self, address: &BeaconAddress) -> Option<Sample>;

    async fn stop_discovery(&self, handle: DiscoveryHandle) -> Result<(), SenseError>;
}

#[async_trait]
pub trait LockStateObserver: Send + Sync {
    async fn is_locked(&self) -> Result<bool, SenseError>;
}

#[async_trait]
pub trait LockActuator: Send + Sync {
    async fn lock(&self) -> Result<(), SenseError>;
    async fn unlock(&self) -> Result<(), SenseError>;
}
