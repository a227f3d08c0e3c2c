//! Registry of config pointers the daemon actually reads.
//!
//! Any leaf outside these prefixes is reported by `report_unused_keys`.
//! Keep this in step with `settings.rs`: a key added there must be added here.

pub static CONSUMED_POINTERS: &[&str] = &[
    "/service/mac_address",
    "/service/period",
    "/service/min_rssi",
    "/service/min_dwell",
    "/service/min_timestamp",
    "/service/max_rssi",
    "/service/max_dwell",
    "/service/max_timestamp",
    "/service/stale_after",
    // Screen observer / actuator commands.
    "/commands/query",
    "/commands/locked_pattern",
    "/commands/lock",
    "/commands/unlock",
    "/commands/env",
    "/commands/timeout",
    // Scanner process.
    "/scanner/program",
    "/scanner/restart_backoff",
    "/scanner/stop_timeout",
];
