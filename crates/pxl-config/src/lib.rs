//! pxl-config
//!
//! Layered YAML configuration for the proximity lock daemon.
//!
//! - Documents merge in order: earlier docs are base, later docs override.
//! - The merged document is canonicalised to JSON and hashed (SHA-256) so the
//!   effective configuration of a run can be identified in logs.
//! - [`ProxlockConfig::from_loaded`] turns the merged JSON into validated,
//!   immutable settings. Every failure is fatal at startup and carries a
//!   stable `CONFIG_*` prefix.

mod consumption;
mod settings;

pub use consumption::CONSUMED_POINTERS;
pub use settings::{CommandsConfig, ProxlockConfig, ScannerConfig, ServiceConfig};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;

/// Environment variable consulted when no `--config` path is given.
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

// ---------------------------------------------------------------------------
// Source resolution
// ---------------------------------------------------------------------------

/// Pick the config paths to load.
///
/// Explicit CLI paths win. Otherwise `env_value` (the raw `CONFIG_PATH`
/// value) is split on `:`. Neither present is a fatal startup error.
pub fn resolve_config_paths(cli_paths: &[String], env_value: Option<&str>) -> Result<Vec<String>> {
    if !cli_paths.is_empty() {
        return Ok(cli_paths.to_vec());
    }
    let from_env: Vec<String> = env_value
        .unwrap_or_default()
        .split(':')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    if from_env.is_empty() {
        bail!(
            "CONFIG_PATH_MISSING: pass --config <path> or set {} to a YAML config file",
            CONFIG_PATH_ENV
        );
    }
    Ok(from_env)
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

pub fn load_layered_yaml(paths: &[String]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::with_capacity(paths.len());
    for p in paths {
        let raw = fs::read_to_string(p)
            .with_context(|| format!("CONFIG_READ_FAILED: failed to read yaml path: {p}"))?;
        docs.push(raw);
    }

    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value =
            serde_yaml::from_str(raw).context("CONFIG_YAML_INVALID: invalid yaml")?;
        // An empty document parses as null; it contributes nothing.
        if v_yaml.is_null() {
            continue;
        }
        let v_json = serde_json::to_value(v_yaml)
            .context("CONFIG_YAML_INVALID: yaml->json conversion failed")?;
        merged = deep_merge(merged, v_json);
    }

    if !merged.is_object() {
        bail!("CONFIG_YAML_INVALID: top level must be a mapping");
    }

    // serde_json's default Map is ordered by key, so this is stable for equal inputs.
    let canonical_json =
        serde_json::to_string(&merged).context("canonical json serialize failed")?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Unused-key guard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    /// Minimal set of unused leaf pointers (sorted).
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// Report every leaf of `config_json` that no consumer reads.
///
/// A leaf is consumed when it sits under one of [`CONSUMED_POINTERS`]. With
/// `UnusedKeyPolicy::Fail` a non-clean report is an error; with `Warn` the
/// caller decides what to do with it (the daemon logs each pointer).
pub fn report_unused_keys(config_json: &Value, policy: UnusedKeyPolicy) -> Result<UnusedKeyReport> {
    let consumed: BTreeSet<String> =
        CONSUMED_POINTERS.iter().map(|p| normalize_pointer(p)).collect();

    let mut leaves: Vec<String> = Vec::new();
    collect_leaf_pointers(config_json, "", &mut leaves);

    let mut unused: Vec<String> = leaves
        .into_iter()
        .filter(|leaf| !consumed.iter().any(|cp| is_prefix_pointer(cp, leaf)))
        .collect();
    unused.sort();
    unused.dedup();

    let report = UnusedKeyReport {
        unused_leaf_pointers: unused,
    };

    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        bail!(
            "CONFIG_UNUSED_KEYS: {} unused config key(s): {:?}",
            report.unused_leaf_pointers.len(),
            report.unused_leaf_pointers
        );
    }

    Ok(report)
}

/// Leading "/" always, trailing "/" never (except the root pointer).
fn normalize_pointer(p: &str) -> String {
    let mut s = p.trim().to_string();
    if !s.starts_with('/') {
        s.insert(0, '/');
    }
    while s.len() > 1 && s.ends_with('/') {
        s.pop();
    }
    s
}

/// "/a/b" covers "/a/b" and "/a/b/c" but not "/a/bc".
fn is_prefix_pointer(prefix: &str, leaf: &str) -> bool {
    if prefix == "/" || leaf == prefix {
        return true;
    }
    leaf.strip_prefix(prefix)
        .map(|rest| rest.starts_with('/'))
        .unwrap_or(false)
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) if !map.is_empty() => {
            for (k, vv) in map {
                let token = k.replace('~', "~0").replace('/', "~1");
                collect_leaf_pointers(vv, &format!("{prefix}/{token}"), out);
            }
        }
        Value::Array(arr) if !arr.is_empty() => {
            for (i, vv) in arr.iter().enumerate() {
                collect_leaf_pointers(vv, &format!("{prefix}/{i}"), out);
            }
        }
        _ => out.push(if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.to_string()
        }),
    }
}
