//! Typed, validated settings built once at startup.
//!
//! # Contract
//! - Built **once** from the merged config via [`ProxlockConfig::from_loaded`].
//! - Immutable afterwards; passed by reference into constructors.
//! - A numeric value of exactly `0` for `period`, the RSSI thresholds or the
//!   dwell times means "unset" and falls back to the default.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use pxl_engine::{BeaconAddress, Thresholds};
use serde::Deserialize;
use serde_json::Value;

use crate::LoadedConfig;

const DEFAULT_PERIOD_SECS: f64 = 0.5;
/// Roughly 50cm for a typical BLE tag.
const DEFAULT_MIN_RSSI: f64 = -65.0;
const DEFAULT_MIN_DWELL_SECS: f64 = 0.5;
/// Roughly 5m for a typical BLE tag.
const DEFAULT_MAX_RSSI: f64 = -80.0;
const DEFAULT_MAX_DWELL_SECS: f64 = 5.0;

const DEFAULT_SCREENSAVER: &str = "xfce4-screensaver-command";
const DEFAULT_LOCKED_PATTERN: &str = r"\sactive";
const DEFAULT_COMMAND_TIMEOUT_SECS: f64 = 2.0;

const DEFAULT_SCANNER_PROGRAM: &str = "bluetoothctl";
const DEFAULT_RESTART_BACKOFF_SECS: f64 = 1.0;
const DEFAULT_STOP_TIMEOUT_SECS: f64 = 2.0;

// ---------------------------------------------------------------------------
// Raw (as written) sections
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDocument {
    service: RawService,
    commands: RawCommands,
    scanner: RawScanner,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawService {
    mac_address: Option<String>,
    period: Option<f64>,
    min_rssi: Option<f64>,
    #[serde(alias = "min_timestamp")]
    min_dwell: Option<f64>,
    max_rssi: Option<f64>,
    #[serde(alias = "max_timestamp")]
    max_dwell: Option<f64>,
    stale_after: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCommands {
    query: Option<Vec<String>>,
    locked_pattern: Option<String>,
    lock: Option<Vec<String>>,
    unlock: Option<Vec<String>>,
    env: Option<BTreeMap<String, String>>,
    timeout: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawScanner {
    program: Option<String>,
    restart_backoff: Option<f64>,
    stop_timeout: Option<f64>,
}

// ---------------------------------------------------------------------------
// Validated settings
// ---------------------------------------------------------------------------

/// Beacon identity, tick cadence and hysteresis band.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub address: BeaconAddress,
    pub period: Duration,
    pub thresholds: Thresholds,
    /// Readings older than this are treated as absent. `None` disables the filter.
    pub stale_after: Option<Duration>,
}

/// External commands used to observe and drive the screen lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandsConfig {
    pub query: Vec<String>,
    /// Regex matched against the query's stdout; a match means "locked".
    pub locked_pattern: String,
    pub lock: Vec<String>,
    pub unlock: Vec<String>,
    /// Added to (not replacing) the inherited environment of each command.
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerConfig {
    pub program: String,
    pub restart_backoff: Duration,
    pub stop_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProxlockConfig {
    pub service: ServiceConfig,
    pub commands: CommandsConfig,
    pub scanner: ScannerConfig,
}

impl ProxlockConfig {
    pub fn from_loaded(loaded: &LoadedConfig) -> Result<Self> {
        Self::from_json(&loaded.config_json)
    }

    pub fn from_json(config_json: &Value) -> Result<Self> {
        let raw: RawDocument = serde_json::from_value(config_json.clone())
            .context("CONFIG_SCHEMA_INVALID: config does not match the expected shape")?;

        Ok(Self {
            service: service_from_raw(raw.service)?,
            commands: commands_from_raw(raw.commands)?,
            scanner: scanner_from_raw(raw.scanner)?,
        })
    }
}

fn service_from_raw(raw: RawService) -> Result<ServiceConfig> {
    let Some(mac) = raw.mac_address.filter(|m| !m.trim().is_empty()) else {
        bail!("CONFIG_MAC_ADDRESS_MISSING: service.mac_address is required");
    };
    let address = BeaconAddress::parse(&mac)
        .map_err(|e| anyhow::anyhow!("CONFIG_MAC_ADDRESS_INVALID: {e}"))?;

    let period_secs = zero_means_default(raw.period, DEFAULT_PERIOD_SECS);
    if !period_secs.is_finite() || period_secs <= 0.0 {
        bail!(
            "CONFIG_PERIOD_INVALID: service.period must be a positive number of seconds, \
             got {period_secs}"
        );
    }
    let period = secs("service.period", period_secs)?;

    let min_dwell = secs(
        "service.min_dwell",
        zero_means_default(raw.min_dwell, DEFAULT_MIN_DWELL_SECS),
    )?;
    let max_dwell = secs(
        "service.max_dwell",
        zero_means_default(raw.max_dwell, DEFAULT_MAX_DWELL_SECS),
    )?;

    let thresholds = Thresholds::new(
        zero_means_default(raw.min_rssi, DEFAULT_MIN_RSSI),
        min_dwell,
        zero_means_default(raw.max_rssi, DEFAULT_MAX_RSSI),
        max_dwell,
    )
    .map_err(|e| anyhow::anyhow!("CONFIG_THRESHOLDS_INVALID: {e}"))?;

    let stale_after = match raw.stale_after {
        None => None,
        Some(v) if v == 0.0 => None,
        Some(v) => Some(secs("service.stale_after", v)?),
    };

    Ok(ServiceConfig {
        address,
        period,
        thresholds,
        stale_after,
    })
}

fn commands_from_raw(raw: RawCommands) -> Result<CommandsConfig> {
    let query = argv("commands.query", raw.query, &[DEFAULT_SCREENSAVER, "-q"])?;
    let lock = argv("commands.lock", raw.lock, &[DEFAULT_SCREENSAVER, "--lock"])?;
    let unlock = argv("commands.unlock", raw.unlock, &[DEFAULT_SCREENSAVER, "-d"])?;

    let locked_pattern = raw
        .locked_pattern
        .unwrap_or_else(|| DEFAULT_LOCKED_PATTERN.to_string());
    if let Err(e) = regex::Regex::new(&locked_pattern) {
        bail!("CONFIG_LOCKED_PATTERN_INVALID: commands.locked_pattern: {e}");
    }

    let env = raw.env.unwrap_or_else(|| {
        BTreeMap::from([
            ("XDG_RUNTIME_DIR".to_string(), "/run/user/1000".to_string()),
            ("DISPLAY".to_string(), ":0.0".to_string()),
        ])
    });

    let timeout = positive_secs(
        "commands.timeout",
        raw.timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS),
    )?;

    Ok(CommandsConfig {
        query,
        locked_pattern,
        lock,
        unlock,
        env,
        timeout,
    })
}

fn scanner_from_raw(raw: RawScanner) -> Result<ScannerConfig> {
    let program = raw
        .program
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SCANNER_PROGRAM.to_string());
    Ok(ScannerConfig {
        program,
        restart_backoff: secs(
            "scanner.restart_backoff",
            raw.restart_backoff.unwrap_or(DEFAULT_RESTART_BACKOFF_SECS),
        )?,
        stop_timeout: positive_secs(
            "scanner.stop_timeout",
            raw.stop_timeout.unwrap_or(DEFAULT_STOP_TIMEOUT_SECS),
        )?,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn zero_means_default(v: Option<f64>, default: f64) -> f64 {
    match v {
        Some(x) if x != 0.0 => x,
        _ => default,
    }
}

/// Non-negative, finite seconds.
fn secs(field: &str, v: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(v).map_err(|_| {
        anyhow::anyhow!(
            "CONFIG_DURATION_INVALID: {field} must be a non-negative number of seconds, got {v}"
        )
    })
}

fn positive_secs(field: &str, v: f64) -> Result<Duration> {
    let d = secs(field, v)?;
    if d.is_zero() {
        bail!("CONFIG_DURATION_INVALID: {field} must be greater than zero");
    }
    Ok(d)
}

fn argv(field: &str, v: Option<Vec<String>>, default: &[&str]) -> Result<Vec<String>> {
    let argv = v.unwrap_or_else(|| default.iter().map(|s| s.to_string()).collect());
    match argv.first() {
        Some(program) if !program.trim().is_empty() => Ok(argv),
        _ => bail!("CONFIG_COMMAND_EMPTY: {field} must name a program"),
    }
}
