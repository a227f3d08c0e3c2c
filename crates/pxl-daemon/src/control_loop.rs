//! The periodic observe / decide / act loop.
//!
//! One task owns the [`ControlLoop`]; ticks are strictly sequential. Each tick:
//! 1. ask the observer whether the screen is locked (bounded; failure = unlocked)
//! 2. read the latest sample for the tracked beacon (stale = absent)
//! 3. step the decision engine
//! 4. on Lock / Unlock, call the actuator (bounded; failure is logged only)
//!
//! then sleeps a fixed period. Shutdown is observed only at the sleep point,
//! so an in-progress tick always completes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use chrono::Utc;
use pxl_config::ProxlockConfig;
use pxl_engine::{Action, BeaconAddress, Decision, DecisionEngine, Sample, Thresholds};
use pxl_sense::{LockActuator, LockStateObserver, RssiSampleSource};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::summary::{RunCounters, RunSummary};

/// Headroom on top of the command timeout for the loop-level bound.
const CALL_SLACK: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct LoopConfig {
    pub address: BeaconAddress,
    pub period: Duration,
    pub thresholds: Thresholds,
    /// Readings older than this are ignored. `None` disables the filter.
    pub stale_after: Option<Duration>,
    /// Upper bound on each observer / actuator call.
    pub call_timeout: Duration,
}

impl LoopConfig {
    pub fn from_config(cfg: &ProxlockConfig) -> Self {
        Self {
            address: cfg.service.address.clone(),
            period: cfg.service.period,
            thresholds: cfg.service.thresholds,
            stale_after: cfg.service.stale_after,
            call_timeout: cfg.commands.timeout + CALL_SLACK,
        }
    }
}

/// What a single tick saw and did.
#[derive(Clone, Debug, PartialEq)]
pub struct TickOutcome {
    /// Observer answer, `false` when the query failed.
    pub external_locked: bool,
    /// Reading handed to the engine.
    pub rssi: Option<f64>,
    pub decision: Decision,
    /// `Some(ok)` when the actuator was invoked.
    pub actuated: Option<bool>,
}

pub struct ControlLoop {
    cfg: LoopConfig,
    engine: DecisionEngine,
    source: Arc<dyn RssiSampleSource>,
    observer: Arc<dyn LockStateObserver>,
    actuator: Arc<dyn LockActuator>,
    counters: RunCounters,
}

impl ControlLoop {
    pub fn new(
        cfg: LoopConfig,
        source: Arc<dyn RssiSampleSource>,
        observer: Arc<dyn LockStateObserver>,
        actuator: Arc<dyn LockActuator>,
    ) -> Self {
        let engine = DecisionEngine::new(cfg.thresholds);
        Self {
            cfg,
            engine,
            source,
            observer,
            actuator,
            counters: RunCounters::default(),
        }
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn counters(&self) -> &RunCounters {
        &self.counters
    }

    /// Run one observe / decide / act cycle.
    ///
    /// Discovery must already be running for the source to have readings;
    /// [`ControlLoop::run`] takes care of that.
    pub async fn tick(&mut self) -> TickOutcome {
        self.counters.ticks += 1;

        let external_locked = self.observe().await;
        let sample = self.fresh_sample().await;

        let now = tokio_now();
        let decision = self.engine.step(sample.as_ref(), external_locked, now);
        if decision.action != Action::Hold {
            debug!(
                action = %decision.action,
                reason = ?decision.reason,
                external_locked,
                auto_locked = self.engine.state().auto_locked,
                "decision"
            );
        }

        let actuated = match decision.action {
            Action::Hold => None,
            Action::Lock => {
                self.counters.locks += 1;
                info!(address = %self.cfg.address, "will attempt to lock screen");
                Some(self.actuate(Action::Lock).await)
            }
            Action::Unlock => {
                self.counters.unlocks += 1;
                info!(address = %self.cfg.address, "will attempt to unlock screen");
                Some(self.actuate(Action::Unlock).await)
            }
        };

        TickOutcome {
            external_locked,
            rssi: sample.map(|s| s.rssi),
            decision,
            actuated,
        }
    }

    async fn observe(&mut self) -> bool {
        match tokio::time::timeout(self.cfg.call_timeout, self.observer.is_locked()).await {
            Ok(Ok(locked)) => locked,
            Ok(Err(e)) => {
                self.counters.observer_failures += 1;
                warn!(error = %e, "lock state query failed; assuming unlocked");
                false
            }
            Err(_) => {
                self.counters.observer_failures += 1;
                warn!(
                    timeout_ms = self.cfg.call_timeout.as_millis() as u64,
                    "lock state query timed out; assuming unlocked"
                );
                false
            }
        }
    }

    async fn fresh_sample(&mut self) -> Option<Sample> {
        let address = &self.cfg.address;
        let Some(sample) = self.source.latest_sample(address).await else {
            self.counters.samples_missing += 1;
            debug!(address = %address, "no reading");
            return None;
        };

        if let Some(limit) = self.cfg.stale_after {
            let age = sample.age(tokio_now());
            if age > limit {
                self.counters.stale_dropped += 1;
                self.counters.samples_missing += 1;
                debug!(
                    address = %address,
                    rssi = sample.rssi,
                    age_ms = age.as_millis() as u64,
                    "stale reading ignored"
                );
                return None;
            }
        }

        self.counters.samples_seen += 1;
        info!(address = %address, rssi = sample.rssi, "reading");
        Some(sample)
    }

    async fn actuate(&mut self, action: Action) -> bool {
        let call = match action {
            Action::Lock => self.actuator.lock(),
            Action::Unlock => self.actuator.unlock(),
            Action::Hold => return true,
        };
        match tokio::time::timeout(self.cfg.call_timeout, call).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                self.counters.actuator_failures += 1;
                warn!(action = %action, error = %e, "screen command failed");
                false
            }
            Err(_) => {
                self.counters.actuator_failures += 1;
                warn!(
                    action = %action,
                    timeout_ms = self.cfg.call_timeout.as_millis() as u64,
                    "screen command timed out"
                );
                false
            }
        }
    }

    /// Start discovery, tick every `period` until `shutdown` flips to true
    /// (or its sender goes away), then stop discovery.
    ///
    /// Only a failure to start discovery is an error.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<RunSummary> {
        let started_at = Utc::now();
        let handle = self
            .source
            .start_discovery()
            .await
            .map_err(|e| anyhow!("DISCOVERY_START_FAILED: {} source: {e}", self.source.name()))?;

        info!(
            address = %self.cfg.address,
            period_ms = self.cfg.period.as_millis() as u64,
            source = self.source.name(),
            "control loop started"
        );

        while !*shutdown.borrow() {
            self.tick().await;

            tokio::select! {
                _ = tokio::time::sleep(self.cfg.period) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("shutdown requested; stopping discovery");
        if let Err(e) = self.source.stop_discovery(handle).await {
            warn!(error = %e, "discovery did not stop cleanly");
        }

        Ok(RunSummary {
            address: self.cfg.address.to_string(),
            started_at,
            stopped_at: Utc::now(),
            counters: self.counters,
        })
    }
}

/// Monotonic now on the tokio clock, so paused-time tests stay consistent.
fn tokio_now() -> Instant {
    tokio::time::Instant::now().into_std()
}
