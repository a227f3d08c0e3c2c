use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Beacon address
// ---------------------------------------------------------------------------

/// Hardware address of the tracked beacon.
///
/// Always stored in canonical upper-case `AA:BB:CC:DD:EE:FF` form so that
/// scanner output and configuration compare equal regardless of case.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BeaconAddress(String);

impl BeaconAddress {
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let t = raw.trim();
        let octets: Vec<&str> = t.split(':').collect();
        if octets.len() != 6 {
            return Err(AddressError {
                raw: raw.to_string(),
            });
        }
        for o in &octets {
            if o.len() != 2 || !o.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(AddressError {
                    raw: raw.to_string(),
                });
            }
        }
        Ok(Self(t.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for BeaconAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for BeaconAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returned when a string is not six colon-separated hex octets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressError {
    pub raw: String,
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid beacon address {:?}: expected AA:BB:CC:DD:EE:FF",
            self.raw
        )
    }
}

impl std::error::Error for AddressError {}

// ---------------------------------------------------------------------------
// Sample
// ---------------------------------------------------------------------------

/// One signal-strength reading for a beacon.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub address: BeaconAddress,
    /// Negative; closer to zero means stronger / closer.
    pub rssi: f64,
    /// When the scanner saw this reading (monotonic).
    pub observed_at: Instant,
}

impl Sample {
    pub fn new(address: BeaconAddress, rssi: f64, observed_at: Instant) -> Self {
        Self {
            address,
            rssi,
            observed_at,
        }
    }

    /// Age of the reading relative to `now`; zero if `now` precedes it.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.observed_at)
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Immutable hysteresis configuration.
///
/// # Invariants
///
/// - `min_rssi > max_rssi`: the "near" threshold is strictly stronger than the
///   "far" threshold. Equal or inverted thresholds collapse the band and are
///   refused at construction.
/// - Both RSSI values are finite.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    min_rssi: f64,
    min_dwell: Duration,
    max_rssi: f64,
    max_dwell: Duration,
}

impl Thresholds {
    pub fn new(
        min_rssi: f64,
        min_dwell: Duration,
        max_rssi: f64,
        max_dwell: Duration,
    ) -> Result<Self, ThresholdError> {
        if !min_rssi.is_finite() {
            return Err(ThresholdError::NonFinite { field: "min_rssi" });
        }
        if !max_rssi.is_finite() {
            return Err(ThresholdError::NonFinite { field: "max_rssi" });
        }
        if min_rssi <= max_rssi {
            return Err(ThresholdError::Inverted { min_rssi, max_rssi });
        }
        Ok(Self {
            min_rssi,
            min_dwell,
            max_rssi,
            max_dwell,
        })
    }

    /// Signal must be strictly stronger than this to count as "near".
    pub fn min_rssi(&self) -> f64 {
        self.min_rssi
    }

    /// How long "near" must hold before unlocking.
    pub fn min_dwell(&self) -> Duration {
        self.min_dwell
    }

    /// Signal must be strictly weaker than this to count as "far".
    pub fn max_rssi(&self) -> f64 {
        self.max_rssi
    }

    /// How long "far" must hold before locking.
    pub fn max_dwell(&self) -> Duration {
        self.max_dwell
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ThresholdError {
    NonFinite { field: &'static str },
    Inverted { min_rssi: f64, max_rssi: f64 },
}

impl fmt::Display for ThresholdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdError::NonFinite { field } => write!(f, "{field} must be a finite number"),
            ThresholdError::Inverted { min_rssi, max_rssi } => write!(
                f,
                "min_rssi ({min_rssi}) must be greater than max_rssi ({max_rssi})"
            ),
        }
    }
}

impl std::error::Error for ThresholdError {}

// ---------------------------------------------------------------------------
// Engine state
// ---------------------------------------------------------------------------

/// Mutable engine state. Owned by a single caller; never persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineState {
    /// First "near" reading of the current locked-period streak.
    pub near_since: Option<Instant>,
    /// First "far" reading of the current unlocked-period streak.
    pub far_since: Option<Instant>,
    /// True only if this engine issued the most recent lock.
    pub auto_locked: bool,
}

impl EngineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn effective_locked(&self, external_locked: bool) -> bool {
        external_locked || self.auto_locked
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// What the caller must do after a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Lock,
    Unlock,
    /// No actuator call this tick.
    Hold,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Lock => "lock",
            Action::Unlock => "unlock",
            Action::Hold => "hold",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule that produced a decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecisionReason {
    /// No usable reading this tick; timers untouched.
    NoSample,
    /// Near, dwell still accumulating.
    NearDwelling,
    /// Near for at least `min_dwell`.
    NearDwellElapsed,
    /// At or below `min_rssi` while locked; near timer cleared.
    NotNear,
    /// Far, dwell still accumulating.
    FarDwelling,
    /// Far for at least `max_dwell`.
    FarDwellElapsed,
    /// At or above `max_rssi` while unlocked; far timer cleared.
    NotFar,
}

/// Output of one engine step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decision {
    pub action: Action,
    pub reason: DecisionReason,
}

impl Decision {
    pub(crate) fn hold(reason: DecisionReason) -> Self {
        Self {
            action: Action::Hold,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_normalised_to_upper_case() {
        let a = BeaconAddress::parse(" aa:bb:cc:0d:1e:ff ").unwrap();
        assert_eq!(a.as_str(), "AA:BB:CC:0D:1E:FF");
        assert_eq!(a, "AA:BB:CC:0D:1E:FF".parse().unwrap());
    }

    #[test]
    fn address_rejects_wrong_shape() {
        for raw in [
            "",
            "AA:BB:CC:DD:EE",
            "AA:BB:CC:DD:EE:FF:00",
            "AA-BB-CC-DD-EE-FF",
            "AA:BB:CC:DD:EE:GG",
            "AAA:B:CC:DD:EE:FF",
        ] {
            assert!(BeaconAddress::parse(raw).is_err(), "accepted {raw:?}");
        }
    }

    #[test]
    fn thresholds_reject_inverted_or_equal_band() {
        let d = Duration::from_secs(1);
        assert_eq!(
            Thresholds::new(-80.0, d, -65.0, d),
            Err(ThresholdError::Inverted {
                min_rssi: -80.0,
                max_rssi: -65.0
            })
        );
        assert!(Thresholds::new(-70.0, d, -70.0, d).is_err());
        assert!(Thresholds::new(-65.0, d, -80.0, d).is_ok());
    }

    #[test]
    fn thresholds_reject_non_finite() {
        let d = Duration::from_secs(1);
        assert_eq!(
            Thresholds::new(f64::NAN, d, -80.0, d),
            Err(ThresholdError::NonFinite { field: "min_rssi" })
        );
        assert_eq!(
            Thresholds::new(-65.0, d, f64::NEG_INFINITY, d),
            Err(ThresholdError::NonFinite { field: "max_rssi" })
        );
    }

    #[test]
    fn sample_age_saturates() {
        let t0 = Instant::now();
        let address = BeaconAddress::parse("00:11:22:33:44:55").unwrap();
        let s = Sample::new(address, -60.0, t0 + Duration::from_secs(1));
        assert_eq!(s.age(t0), Duration::ZERO);
        assert_eq!(s.age(t0 + Duration::from_secs(3)), Duration::from_secs(2));
    }
}
