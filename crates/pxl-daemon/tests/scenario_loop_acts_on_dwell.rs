//! Scenario: the control loop locks and unlocks once a dwell completes
//!
//! # Invariants under test
//!
//! 1. Locked screen, beacon near (-60 > -65) at t=0, 0.2, 0.4, 0.6: the
//!    actuator is asked to unlock exactly once, at t=0.6.
//! 2. Unlocked screen, beacon far (-85 < -80) at t=0 and t=5.1: one lock at
//!    t=5.1; the beacon coming back then unlocks after min_dwell.
//! 3. A tick with no reading neither resets the near timer nor acts.
//! 4. A manual lock while the beacon is near is undone after min_dwell.
//!
//! All tests run on a paused tokio clock with in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use pxl_daemon::{ControlLoop, LoopConfig};
use pxl_engine::{Action, BeaconAddress, DecisionReason, Thresholds};
use pxl_testkit::{ScreenCall, ScriptedSource, SimulatedScreen};

fn addr() -> BeaconAddress {
    BeaconAddress::parse("A4:C1:38:00:00:01").unwrap()
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn loop_cfg() -> LoopConfig {
    LoopConfig {
        address: addr(),
        period: ms(500),
        thresholds: Thresholds::new(-65.0, ms(500), -80.0, Duration::from_secs(5)).unwrap(),
        stale_after: None,
        call_timeout: Duration::from_secs(3),
    }
}

fn control(source: &Arc<ScriptedSource>, screen: &Arc<SimulatedScreen>) -> ControlLoop {
    ControlLoop::new(loop_cfg(), source.clone(), screen.clone(), screen.clone())
}

#[tokio::test(start_paused = true)]
async fn near_beacon_unlocks_locked_screen_after_dwell() {
    let screen = Arc::new(SimulatedScreen::new(true));
    let source = Arc::new(ScriptedSource::new(addr(), [Some(-60.0)]));
    let mut cl = control(&source, &screen);

    for _ in 0..3 {
        let out = cl.tick().await;
        assert!(out.external_locked);
        assert_eq!(out.decision.action, Action::Hold);
        assert_eq!(out.actuated, None);
        tokio::time::advance(ms(200)).await;
    }

    let out = cl.tick().await;
    assert_eq!(out.decision.action, Action::Unlock);
    assert_eq!(out.actuated, Some(true));
    assert!(!screen.is_locked_now());

    // Same near reading again: nothing further to do.
    tokio::time::advance(ms(500)).await;
    let out = cl.tick().await;
    assert_eq!(out.decision.action, Action::Hold);
    assert_eq!(out.decision.reason, DecisionReason::NotFar);

    assert_eq!(screen.actions().await, vec![ScreenCall::Unlock]);
    assert_eq!(cl.counters().unlocks, 1);
    assert_eq!(cl.counters().locks, 0);
}

#[tokio::test(start_paused = true)]
async fn far_beacon_locks_then_return_unlocks() {
    let screen = Arc::new(SimulatedScreen::new(false));
    let source = Arc::new(ScriptedSource::new(addr(), [Some(-85.0)]));
    let mut cl = control(&source, &screen);

    assert_eq!(cl.tick().await.decision.reason, DecisionReason::FarDwelling);
    tokio::time::advance(ms(5100)).await;

    let out = cl.tick().await;
    assert_eq!(out.decision.action, Action::Lock);
    assert_eq!(out.actuated, Some(true));
    assert!(screen.is_locked_now());
    assert!(cl.engine().state().auto_locked);

    // Still far, now locked: hold.
    tokio::time::advance(ms(500)).await;
    assert_eq!(cl.tick().await.decision.reason, DecisionReason::NotNear);

    source.push(Some(-50.0)).await;
    tokio::time::advance(ms(500)).await;
    assert_eq!(cl.tick().await.decision.reason, DecisionReason::NearDwelling);
    tokio::time::advance(ms(500)).await;
    let out = cl.tick().await;
    assert_eq!(out.decision.action, Action::Unlock);
    assert!(!cl.engine().state().auto_locked);

    assert_eq!(
        screen.actions().await,
        vec![ScreenCall::Lock, ScreenCall::Unlock]
    );
}

#[tokio::test(start_paused = true)]
async fn missing_reading_does_not_reset_near_timer() {
    let screen = Arc::new(SimulatedScreen::new(true));
    let source = Arc::new(ScriptedSource::new(addr(), [Some(-60.0), None, Some(-60.0)]));
    let mut cl = control(&source, &screen);

    cl.tick().await;
    tokio::time::advance(ms(250)).await;
    let out = cl.tick().await;
    assert_eq!(out.rssi, None);
    assert_eq!(out.decision.reason, DecisionReason::NoSample);

    tokio::time::advance(ms(250)).await;
    let out = cl.tick().await;
    assert_eq!(out.decision.action, Action::Unlock);
    assert_eq!(cl.counters().samples_missing, 1);
    assert_eq!(cl.counters().samples_seen, 2);
}

#[tokio::test(start_paused = true)]
async fn manual_lock_with_beacon_near_is_undone() {
    let screen = Arc::new(SimulatedScreen::new(false));
    let source = Arc::new(ScriptedSource::new(addr(), [Some(-60.0)]));
    let mut cl = control(&source, &screen);

    assert_eq!(cl.tick().await.decision.action, Action::Hold);

    screen.set_locked(true);
    tokio::time::advance(ms(500)).await;
    assert_eq!(cl.tick().await.decision.reason, DecisionReason::NearDwelling);
    tokio::time::advance(ms(500)).await;
    assert_eq!(cl.tick().await.decision.action, Action::Unlock);
    assert!(!screen.is_locked_now());
}
