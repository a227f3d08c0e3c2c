//! In-memory collaborators for driving the control loop in tests.
//!
//! - [`ScriptedSource`] hands out one scripted reading per `latest_sample`
//!   call; the final entry repeats once the script is exhausted.
//! - [`SimulatedScreen`] is both observer and actuator: lock/unlock flip its
//!   state, every call is recorded, and failures can be injected.
//!
//! Timestamps come from `tokio::time::Instant` so paused-clock tests see the
//! same time the loop sees.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pxl_engine::{BeaconAddress, Sample};
use pxl_sense::{DiscoveryHandle, LockActuator, LockStateObserver, RssiSampleSource, SenseError};
use tokio::sync::Mutex;

fn tokio_now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

// ---------------------------------------------------------------------------
// ScriptedSource
// ---------------------------------------------------------------------------

/// One scripted answer to `latest_sample`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Reading {
    /// Beacon not seen.
    Absent,
    /// Fresh reading observed "now".
    Rssi(f64),
    /// Reading observed `age` before the call.
    Aged { rssi: f64, age: Duration },
}

impl From<Option<f64>> for Reading {
    fn from(v: Option<f64>) -> Self {
        match v {
            Some(rssi) => Reading::Rssi(rssi),
            None => Reading::Absent,
        }
    }
}

#[derive(Debug)]
struct Script {
    queue: VecDeque<Reading>,
    last: Reading,
}

#[derive(Debug)]
pub struct ScriptedSource {
    address: BeaconAddress,
    script: Mutex<Script>,
    fail_start: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    queries: AtomicUsize,
}

impl ScriptedSource {
    pub fn new<I, R>(address: BeaconAddress, readings: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Reading>,
    {
        Self {
            address,
            script: Mutex::new(Script {
                queue: readings.into_iter().map(Into::into).collect(),
                last: Reading::Absent,
            }),
            fail_start: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
        }
    }

    /// Make `start_discovery` fail with a spawn error.
    pub fn failing_start(self) -> Self {
        self.fail_start.store(true, Ordering::SeqCst);
        self
    }

    pub async fn push(&self, reading: impl Into<Reading>) {
        self.script.lock().await.queue.push_back(reading.into());
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RssiSampleSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn start_discovery(&self) -> Result<DiscoveryHandle, SenseError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(SenseError::Spawn {
                program: "scripted".to_string(),
                message: "start refused".to_string(),
            });
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(DiscoveryHandle::inert())
    }

    async fn latest_sample(&self, address: &BeaconAddress) -> Option<Sample> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let reading = {
            let mut script = self.script.lock().await;
            if let Some(next) = script.queue.pop_front() {
                script.last = next;
            }
            script.last
        };
        if address != &self.address {
            return None;
        }
        let now = tokio_now();
        match reading {
            Reading::Absent => None,
            Reading::Rssi(rssi) => Some(Sample::new(self.address.clone(), rssi, now)),
            Reading::Aged { rssi, age } => {
                let observed_at = now.checked_sub(age).unwrap_or(now);
                Some(Sample::new(self.address.clone(), rssi, observed_at))
            }
        }
    }

    async fn stop_discovery(&self, handle: DiscoveryHandle) -> Result<(), SenseError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        handle.stop(Duration::from_secs(1)).await
    }
}

// ---------------------------------------------------------------------------
// SimulatedScreen
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScreenCall {
    Query,
    Lock,
    Unlock,
}

#[derive(Debug, Default)]
pub struct SimulatedScreen {
    locked: AtomicBool,
    fail_query: AtomicBool,
    fail_actions: AtomicBool,
    query_delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<ScreenCall>>,
}

impl SimulatedScreen {
    pub fn new(locked: bool) -> Self {
        let s = Self::default();
        s.locked.store(locked, Ordering::SeqCst);
        s
    }

    /// Change the state behind the daemon's back (a user locking manually).
    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }

    pub fn is_locked_now(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_query.store(fail, Ordering::SeqCst);
    }

    /// Lock/unlock return an error and leave the state unchanged.
    pub fn fail_actions(&self, fail: bool) {
        self.fail_actions.store(fail, Ordering::SeqCst);
    }

    /// Every query sleeps this long before answering.
    pub async fn delay_queries(&self, delay: Option<Duration>) {
        *self.query_delay.lock().await = delay;
    }

    pub async fn calls(&self) -> Vec<ScreenCall> {
        self.calls.lock().await.clone()
    }

    /// Lock and unlock calls only, in order.
    pub async fn actions(&self) -> Vec<ScreenCall> {
        self.calls
            .lock()
            .await
            .iter()
            .copied()
            .filter(|c| *c != ScreenCall::Query)
            .collect()
    }

    async fn act(&self, call: ScreenCall, locked_after: bool) -> Result<(), SenseError> {
        self.calls.lock().await.push(call);
        if self.fail_actions.load(Ordering::SeqCst) {
            return Err(SenseError::CommandFailed {
                program: "simulated-screen".to_string(),
                code: Some(1),
                stderr: "injected failure".to_string(),
            });
        }
        self.locked.store(locked_after, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl LockStateObserver for SimulatedScreen {
    async fn is_locked(&self) -> Result<bool, SenseError> {
        self.calls.lock().await.push(ScreenCall::Query);
        let delay = *self.query_delay.lock().await;
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if self.fail_query.load(Ordering::SeqCst) {
            return Err(SenseError::CommandFailed {
                program: "simulated-screen".to_string(),
                code: Some(1),
                stderr: "injected failure".to_string(),
            });
        }
        Ok(self.locked.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl LockActuator for SimulatedScreen {
    async fn lock(&self) -> Result<(), SenseError> {
        self.act(ScreenCall::Lock, true).await
    }

    async fn unlock(&self) -> Result<(), SenseError> {
        self.act(ScreenCall::Unlock, false).await
    }
}
