//! The primitives a device connection has to offer.
//!
//! A [`Transport`] is assumed reliable at the byte level only: commands can time out, the device
//! can disappear and a spawned stream can end at any moment. Recovering from that is the job of
//! the layers above it.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tokio::io::AsyncRead;

use crate::error::Result;

/// Raw result of one bulk copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutput {
    pub success: bool,
    /// Whatever the transport printed, kept for diagnostics
    pub output: String,
}

impl TransferOutput {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// A long-lived process (or any other producer) whose output is consumed as a byte stream.
///
/// Dropping it kills the underlying process.
pub struct StreamProcess {
    args: Vec<String>,
    child: Option<tokio::process::Child>,
    stdout: Box<dyn AsyncRead + Send + Unpin>,
}

impl std::fmt::Debug for StreamProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamProcess")
            .field("args", &self.args)
            .field("child", &self.child)
            .finish_non_exhaustive()
    }
}

impl StreamProcess {
    /// Wraps a spawned child, taking ownership of its piped stdout.
    pub fn from_child(args: Vec<String>, mut child: tokio::process::Child) -> Result<Self> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("spawned process {:?} has no piped stdout", &args))?;
        Ok(Self {
            args,
            child: Some(child),
            stdout: Box::new(stdout),
        })
    }

    /// Wraps a reader that is not backed by a process.
    pub fn from_reader(args: Vec<String>, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            args,
            child: None,
            stdout: Box::new(reader),
        }
    }

    /// Arguments the stream was spawned with, for respawning an identical one.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn stdout(&mut self) -> &mut (dyn AsyncRead + Send + Unpin) {
        self.stdout.as_mut()
    }

    /// Kills the process and reaps it. Best-effort.
    pub async fn kill(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        if let Err(error) = child.kill().await {
            tracing::debug!("failed to kill {:?}: {}", &self.args, error);
        }
    }
}

/// A bidirectional channel to a single device.
pub trait Transport: Send + Sync {
    /// Serial of the device this transport is bound to, if any.
    fn serial(&self) -> Option<&str>;

    /// Runs `command` in the device shell and returns its combined output.
    fn shell(&self, command: &str, timeout: Duration) -> impl Future<Output = Result<String>> + Send;

    /// Copies `host_path` (a file or a whole directory) to `device_path` in one operation.
    fn push(
        &self,
        host_path: &Path,
        device_path: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<TransferOutput>> + Send;

    /// Starts a long-lived process whose stdout is streamed back.
    fn spawn(&self, args: &[String]) -> impl Future<Output = Result<StreamProcess>> + Send;

    /// Whether the device is currently reachable.
    fn is_attached(&self) -> impl Future<Output = Result<bool>> + Send;
}
