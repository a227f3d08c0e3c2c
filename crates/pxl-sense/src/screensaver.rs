use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::{CommandSpec, LockActuator, LockStateObserver, SenseError};

/// Asks the screensaver whether it is active.
///
/// The query command must exit 0. The screen counts as locked when
/// `locked_pattern` matches anywhere in its stdout. Stderr is only logged.
#[derive(Debug, Clone)]
pub struct ScreensaverObserver {
    query: CommandSpec,
    locked: Regex,
    timeout: Duration,
}

impl ScreensaverObserver {
    pub fn new(
        query: CommandSpec,
        locked_pattern: &str,
        timeout: Duration,
    ) -> Result<Self, SenseError> {
        let locked = Regex::new(locked_pattern)
            .map_err(|e| SenseError::Config(format!("locked pattern {locked_pattern:?}: {e}")))?;
        Ok(Self {
            query,
            locked,
            timeout,
        })
    }

    pub fn is_locked_output(&self, stdout: &str) -> bool {
        self.locked.is_match(stdout)
    }
}

#[async_trait]
impl LockStateObserver for ScreensaverObserver {
    async fn is_locked(&self) -> Result<bool, SenseError> {
        let out = self.query.run(self.timeout).await?;
        let locked = self.is_locked_output(&out.stdout);
        debug!(
            stdout = %out.stdout.trim(),
            stderr = %out.stderr.trim(),
            locked,
            "screensaver query"
        );
        Ok(locked)
    }
}

#[derive(Debug, Clone)]
pub struct ScreensaverActuator {
    lock: CommandSpec,
    unlock: CommandSpec,
    timeout: Duration,
}

impl ScreensaverActuator {
    pub fn new(lock: CommandSpec, unlock: CommandSpec, timeout: Duration) -> Self {
        Self {
            lock,
            unlock,
            timeout,
        }
    }
}

#[async_trait]
impl LockActuator for ScreensaverActuator {
    async fn lock(&self) -> Result<(), SenseError> {
        self.lock.run(self.timeout).await.map(|_| ())
    }

    async fn unlock(&self) -> Result<(), SenseError> {
        self.unlock.run(self.timeout).await.map(|_| ())
    }
}
