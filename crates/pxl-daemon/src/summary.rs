use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters kept by the control loop for the life of one run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub ticks: u64,
    pub samples_seen: u64,
    pub samples_missing: u64,
    /// Readings older than `stale_after`; these also count as missing.
    pub stale_dropped: u64,
    pub observer_failures: u64,
    pub locks: u64,
    pub unlocks: u64,
    pub actuator_failures: u64,
}

/// What one run of the loop did; logged as JSON on exit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub address: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    #[serde(flatten)]
    pub counters: RunCounters,
}

impl RunSummary {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}
