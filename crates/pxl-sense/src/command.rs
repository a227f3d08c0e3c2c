use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::SenseError;

/// A program plus arguments and extra environment.
///
/// `env` is added on top of the daemon's own environment, it does not
/// replace it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandSpec {
    pub fn from_argv(argv: &[String], env: &BTreeMap<String, String>) -> Result<Self, SenseError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SenseError::Config("command argv is empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            env: env.clone(),
        })
    }

    /// Shell-ish rendering for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run to completion within `timeout`.
    ///
    /// Non-zero exit is `CommandFailed`. On timeout the child is killed.
    pub async fn run(&self, timeout: Duration) -> Result<CommandOutput, SenseError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SenseError::Spawn {
                program: self.program.clone(),
                message: e.to_string(),
            })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return Err(SenseError::Io(format!("{}: {e}", self.program))),
            Err(_) => {
                return Err(SenseError::Timeout {
                    what: self.display(),
                    after: timeout,
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(SenseError::CommandFailed {
                program: self.program.clone(),
                code: output.status.code(),
                stderr,
            });
        }
        Ok(CommandOutput { stdout, stderr })
    }
}
