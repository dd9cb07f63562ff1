//! Device shell abstraction
//!
//! Everything the service does to the device goes through [`DeviceShell`]:
//! display queries, input injection and the raw H.264 screen stream.
//! The default implementation drives `adb`.

pub mod adb;
pub mod resolution;

use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;

use crate::error::Result;

pub use adb::AdbShell;
pub use resolution::{probe_resolution, DeviceResolution, ResolutionScale, ResolutionSource};

/// Output of a finished shell command
#[derive(Debug, Clone, Default)]
pub struct ShellOutput {
    /// Exit code, `None` when terminated by a signal
    pub status: Option<i32>,
    /// stdout followed by stderr
    pub combined: String,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Description of an external process to launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build a tokio command with piped stdout and inherited stderr
    ///
    /// The child is killed if the handle is dropped without being reaped.
    pub fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }
}

impl fmt::Display for ProcessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Command interface to one device
#[async_trait]
pub trait DeviceShell: Send + Sync {
    /// Shell name for logs
    fn name(&self) -> &'static str;

    /// Run a shell command on the device and wait for it to finish
    ///
    /// Returns `Err` only when the command could not be run at all; a
    /// nonzero exit is reported through [`ShellOutput::status`].
    async fn run(&self, args: &[String]) -> Result<ShellOutput>;

    /// Process that runs `args` on the device with binary-safe stdout
    fn stream_spec(&self, args: &[String]) -> ProcessSpec;
}
