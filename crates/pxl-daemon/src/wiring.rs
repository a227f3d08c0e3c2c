//! Concrete collaborators built from validated configuration.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use pxl_config::ProxlockConfig;
use pxl_sense::{
    BluetoothctlScanner, CommandSpec, LockActuator, LockStateObserver, RssiSampleSource,
    ScreensaverActuator, ScreensaverObserver,
};

pub struct Collaborators {
    pub source: Arc<dyn RssiSampleSource>,
    pub observer: Arc<dyn LockStateObserver>,
    pub actuator: Arc<dyn LockActuator>,
}

/// bluetoothctl scanner plus screensaver commands.
pub fn build_collaborators(cfg: &ProxlockConfig) -> Result<Collaborators> {
    let cmds = &cfg.commands;

    let scanner_cmd = CommandSpec::from_argv(&[cfg.scanner.program.clone()], &BTreeMap::new())
        .context("CONFIG_COMMAND_EMPTY: scanner.program")?;
    let source = BluetoothctlScanner::new(
        scanner_cmd,
        cfg.scanner.restart_backoff,
        cfg.scanner.stop_timeout,
    );

    let query = CommandSpec::from_argv(&cmds.query, &cmds.env)
        .context("CONFIG_COMMAND_EMPTY: commands.query")?;
    let lock = CommandSpec::from_argv(&cmds.lock, &cmds.env)
        .context("CONFIG_COMMAND_EMPTY: commands.lock")?;
    let unlock = CommandSpec::from_argv(&cmds.unlock, &cmds.env)
        .context("CONFIG_COMMAND_EMPTY: commands.unlock")?;

    let observer = ScreensaverObserver::new(query, &cmds.locked_pattern, cmds.timeout)
        .context("CONFIG_LOCKED_PATTERN_INVALID: commands.locked_pattern")?;
    let actuator = ScreensaverActuator::new(lock, unlock, cmds.timeout);

    Ok(Collaborators {
        source: Arc::new(source),
        observer: Arc::new(observer),
        actuator: Arc::new(actuator),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_the_linux_collaborators() {
        let cfg = ProxlockConfig::from_json(&serde_json::json!({
            "service": { "mac_address": "a4:c1:38:00:00:01" }
        }))
        .unwrap();
        let c = build_collaborators(&cfg).unwrap();
        assert_eq!(c.source.name(), "bluetoothctl");
    }
}
