use std::time::Instant;

use crate::{Action, Decision, DecisionReason, EngineState, Sample, Thresholds};

fn dwell_elapsed(since: Instant, now: Instant, dwell: std::time::Duration) -> bool {
    now.saturating_duration_since(since) >= dwell
}

/// Advance the engine by one tick.
///
/// Inputs:
/// - sample: latest reading for the tracked beacon, `None` if not visible
/// - external_locked: screen state reported by the observer this tick
/// - now: monotonic time, non-decreasing across calls
pub fn step(
    th: &Thresholds,
    st: &mut EngineState,
    sample: Option<&Sample>,
    external_locked: bool,
    now: Instant,
) -> Decision {
    // Missing evidence never moves a timer.
    let Some(sample) = sample else {
        return Decision::hold(DecisionReason::NoSample);
    };
    if !sample.rssi.is_finite() {
        return Decision::hold(DecisionReason::NoSample);
    }
    let rssi = sample.rssi;

    if st.effective_locked(external_locked) {
        // Unlock policy.
        if rssi > th.min_rssi() {
            let since = *st.near_since.get_or_insert(now);
            if dwell_elapsed(since, now, th.min_dwell()) {
                st.near_since = None;
                st.auto_locked = false;
                return Decision {
                    action: Action::Unlock,
                    reason: DecisionReason::NearDwellElapsed,
                };
            }
            Decision::hold(DecisionReason::NearDwelling)
        } else {
            st.near_since = None;
            Decision::hold(DecisionReason::NotNear)
        }
    } else {
        // Lock policy.
        if rssi < th.max_rssi() {
            let since = *st.far_since.get_or_insert(now);
            if dwell_elapsed(since, now, th.max_dwell()) {
                // auto_locked forces the unlock policy above, so it is clear here.
                debug_assert!(!st.auto_locked);
                st.far_since = None;
                st.auto_locked = true;
                return Decision {
                    action: Action::Lock,
                    reason: DecisionReason::FarDwellElapsed,
                };
            }
            Decision::hold(DecisionReason::FarDwelling)
        } else {
            st.far_since = None;
            Decision::hold(DecisionReason::NotFar)
        }
    }
}

/// Thresholds plus the state they drive.
///
/// `step` takes `&mut self`: the engine has exactly one caller per tick.
#[derive(Clone, Debug)]
pub struct DecisionEngine {
    thresholds: Thresholds,
    state: EngineState,
}

impl DecisionEngine {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            state: EngineState::new(),
        }
    }

    pub fn step(
        &mut self,
        sample: Option<&Sample>,
        external_locked: bool,
        now: Instant,
    ) -> Decision {
        step(&self.thresholds, &mut self.state, sample, external_locked, now)
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BeaconAddress;
    use std::time::Duration;

    fn engine() -> DecisionEngine {
        DecisionEngine::new(
            Thresholds::new(-65.0, ms(500), -80.0, Duration::from_secs(5)).unwrap(),
        )
    }

    fn sample(rssi: f64, at: Instant) -> Sample {
        Sample::new(BeaconAddress::parse("C0:FF:EE:00:00:01").unwrap(), rssi, at)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn none_sample_holds_and_keeps_timers() {
        let mut e = engine();
        let t0 = Instant::now();
        e.step(Some(&sample(-60.0, t0)), true, t0);
        assert_eq!(e.state().near_since, Some(t0));

        let d = e.step(None, true, t0 + ms(300));
        assert_eq!(d.action, Action::Hold);
        assert_eq!(d.reason, DecisionReason::NoSample);
        assert_eq!(e.state().near_since, Some(t0));
    }

    #[test]
    fn nan_rssi_is_treated_as_missing() {
        let mut e = engine();
        let t0 = Instant::now();
        e.step(Some(&sample(-90.0, t0)), false, t0);
        let d = e.step(Some(&sample(f64::NAN, t0)), false, t0 + ms(100));
        assert_eq!(d.reason, DecisionReason::NoSample);
        assert_eq!(e.state().far_since, Some(t0));
    }

    #[test]
    fn unlock_fires_exactly_at_min_dwell() {
        let mut e = engine();
        let t0 = Instant::now();
        assert_eq!(e.step(Some(&sample(-60.0, t0)), true, t0).action, Action::Hold);
        assert_eq!(e.step(Some(&sample(-60.0, t0)), true, t0 + ms(499)).action, Action::Hold);
        let d = e.step(Some(&sample(-60.0, t0)), true, t0 + ms(500));
        assert_eq!(d.action, Action::Unlock);
        assert_eq!(d.reason, DecisionReason::NearDwellElapsed);
        assert_eq!(e.state().near_since, None);
    }

    #[test]
    fn rssi_equal_to_min_is_not_near() {
        let mut e = engine();
        let t0 = Instant::now();
        e.step(Some(&sample(-60.0, t0)), true, t0);
        let d = e.step(Some(&sample(-65.0, t0)), true, t0 + ms(100));
        assert_eq!(d.reason, DecisionReason::NotNear);
        assert_eq!(e.state().near_since, None);
    }

    #[test]
    fn rssi_equal_to_max_is_not_far() {
        let mut e = engine();
        let t0 = Instant::now();
        e.step(Some(&sample(-85.0, t0)), false, t0);
        let d = e.step(Some(&sample(-80.0, t0)), false, t0 + ms(100));
        assert_eq!(d.reason, DecisionReason::NotFar);
        assert_eq!(e.state().far_since, None);
    }

    #[test]
    fn lock_sets_auto_locked_and_switches_policy() {
        let mut e = engine();
        let t0 = Instant::now();
        e.step(Some(&sample(-85.0, t0)), false, t0);
        let d = e.step(Some(&sample(-85.0, t0)), false, t0 + Duration::from_secs(5));
        assert_eq!(d.action, Action::Lock);
        assert!(e.state().auto_locked);
        assert_eq!(e.state().far_since, None);

        // Observer has not caught up yet: auto_locked alone keeps the unlock policy active.
        let d = e.step(Some(&sample(-85.0, t0)), false, t0 + Duration::from_secs(6));
        assert_eq!(d.action, Action::Hold);
        assert_eq!(d.reason, DecisionReason::NotNear);
    }

    #[test]
    fn far_beacon_after_lock_never_locks_twice() {
        let mut e = engine();
        let t0 = Instant::now();
        e.step(Some(&sample(-90.0, t0)), false, t0);
        let d = e.step(Some(&sample(-90.0, t0)), false, t0 + Duration::from_secs(5));
        assert_eq!(d.action, Action::Lock);

        // Whatever the observer says, far readings only hold while auto-locked.
        for (i, external) in [false, true, false, true].into_iter().enumerate() {
            let at = t0 + Duration::from_secs(10 + 5 * i as u64);
            let d = e.step(Some(&sample(-90.0, at)), external, at);
            assert_eq!(d.action, Action::Hold);
            assert_eq!(d.reason, DecisionReason::NotNear);
        }
        assert_eq!(e.state().far_since, None);
        assert!(e.state().auto_locked);
    }

    #[test]
    fn auto_lock_is_reversed_when_beacon_returns() {
        let mut e = engine();
        let t0 = Instant::now();
        e.step(Some(&sample(-85.0, t0)), false, t0);
        e.step(Some(&sample(-85.0, t0)), false, t0 + Duration::from_secs(5));
        assert!(e.state().auto_locked);

        // Beacon returns while the observer reports unlocked (auto flag drives policy).
        let t1 = t0 + Duration::from_secs(10);
        e.step(Some(&sample(-50.0, t1)), false, t1);
        let d = e.step(Some(&sample(-50.0, t1)), false, t1 + ms(500));
        assert_eq!(d.action, Action::Unlock);
        assert!(!e.state().auto_locked);
    }
}
