//! Scenario: an absent reading neither resets a timer nor produces an action.

use std::time::{Duration, Instant};

use pxl_engine::*;

fn engine() -> DecisionEngine {
    let th = Thresholds::new(-65.0, Duration::from_millis(500), -80.0, Duration::from_secs(5))
        .expect("valid thresholds");
    DecisionEngine::new(th)
}

fn at(rssi: f64, now: Instant) -> Sample {
    Sample::new(BeaconAddress::parse("A4:C1:38:00:00:01").unwrap(), rssi, now)
}

#[test]
fn gap_during_far_dwell_still_locks_on_next_reading() {
    let mut e = engine();
    let t0 = Instant::now();
    let s = |n: u64| t0 + Duration::from_secs(n);

    e.step(Some(&at(-90.0, s(0))), false, s(0));
    for n in 1..6 {
        let d = e.step(None, false, s(n));
        assert_eq!(d.action, Action::Hold);
        assert_eq!(d.reason, DecisionReason::NoSample);
    }
    assert_eq!(e.state().far_since, Some(s(0)));

    let d = e.step(Some(&at(-90.0, s(6))), false, s(6));
    assert_eq!(d.action, Action::Lock);
}

#[test]
fn missing_samples_never_act_even_with_elapsed_dwell() {
    let mut e = engine();
    let t0 = Instant::now();
    e.step(Some(&at(-60.0, t0)), true, t0);

    for n in 1..20u64 {
        let now = t0 + Duration::from_secs(n);
        assert_eq!(e.step(None, true, now).action, Action::Hold);
    }
    assert_eq!(e.state().near_since, Some(t0));
    assert_eq!(
        *e.state(),
        EngineState {
            near_since: Some(t0),
            far_since: None,
            auto_locked: false,
        }
    );
}
