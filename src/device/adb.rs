//! adb-backed device shell

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::trace;

use super::{DeviceShell, ProcessSpec, ShellOutput};
use crate::config::DeviceConfig;
use crate::error::{AppError, Result};

/// Runs device commands through `adb [-s SERIAL] shell ...`
#[derive(Debug, Clone)]
pub struct AdbShell {
    adb_path: String,
    serial: Option<String>,
    timeout: Duration,
}

impl AdbShell {
    pub fn new(adb_path: impl Into<String>, serial: Option<String>, timeout: Duration) -> Self {
        Self {
            adb_path: adb_path.into(),
            serial,
            timeout,
        }
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(
            config.adb_path.clone(),
            config.serial.clone(),
            Duration::from_millis(config.command_timeout_ms),
        )
    }

    /// Leading adb arguments selecting the target device
    fn target_args(&self) -> Vec<String> {
        match self.serial {
            Some(ref serial) if !serial.is_empty() => vec!["-s".to_string(), serial.clone()],
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl DeviceShell for AdbShell {
    fn name(&self) -> &'static str {
        "adb"
    }

    async fn run(&self, args: &[String]) -> Result<ShellOutput> {
        let mut full = self.target_args();
        full.push("shell".to_string());
        full.extend(args.iter().cloned());

        trace!("{} {}", self.adb_path, full.join(" "));

        let child = Command::new(&self.adb_path)
            .args(&full)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::DeviceCommand {
                command: args.join(" "),
                reason: format!("failed to start {}: {}", self.adb_path, e),
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| AppError::DeviceCommand {
                command: args.join(" "),
                reason: format!("timed out after {:?}", self.timeout),
            })??;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(ShellOutput {
            status: output.status.code(),
            combined,
        })
    }

    fn stream_spec(&self, args: &[String]) -> ProcessSpec {
        // exec-out skips pty allocation, which would mangle binary output
        let mut full = self.target_args();
        full.push("exec-out".to_string());
        full.extend(args.iter().cloned());
        ProcessSpec::new(self.adb_path.clone(), full)
    }
}
