//! Transport driving the `adb` executable.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use tokio::process::Command;
use tracing::instrument;

use crate::error::{Error, Result};
use crate::transport::{StreamProcess, TransferOutput, Transport};

/// Returns whether the output of `adb push` describes a successful transfer.
///
/// Success looks like `3035 KB/s (12512056 bytes in 4.025s)` on older adb releases and like
/// `foo: 1 file pushed, 0 skipped. ...` on newer ones. Errors look like `failed to copy ...`.
pub fn push_succeeded(output: &str) -> bool {
    let Some(last_line) = output.lines().rev().find(|line| !line.trim().is_empty()) else {
        return true;
    };
    if last_line.starts_with(|c: char| c.is_ascii_digit()) || last_line.contains(" pushed") {
        return true;
    }
    tracing::error!("PUSH FAILED: {}", output);
    false
}

#[derive(Debug, Clone)]
pub struct AdbTransport {
    adb: PathBuf,
    serial: Option<String>,
}

impl AdbTransport {
    /// Talks to `serial`, or to the only attached device when `None`.
    pub fn new(serial: Option<String>) -> Self {
        Self {
            adb: PathBuf::from("adb"),
            serial,
        }
    }

    #[must_use]
    pub fn with_adb_path(mut self, adb: PathBuf) -> Self {
        self.adb = adb;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.adb);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    async fn output(
        &self,
        mut cmd: Command,
        description: &str,
        timeout: Duration,
    ) -> Result<std::process::Output> {
        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(res) => Ok(res.with_context(|| format!("failed to run adb {description}"))?),
            Err(_) => Err(Error::CommandTimeout {
                command: description.to_string(),
                timeout,
            }),
        }
    }
}

impl Transport for AdbTransport {
    fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    #[instrument(skip(self))]
    async fn shell(&self, command: &str, timeout: Duration) -> Result<String> {
        let mut cmd = self.command();
        // keep stderr in order with stdout, the status sentinel has to stay last
        cmd.arg("shell").arg(format!("exec 2>&1; {command}"));
        let output = self.output(cmd, command, timeout).await?;
        Ok(crate::combined_output(&output))
    }

    #[instrument(skip(self))]
    async fn push(
        &self,
        host_path: &Path,
        device_path: &str,
        timeout: Duration,
    ) -> Result<TransferOutput> {
        let mut cmd = self.command();
        cmd.arg("push").arg(host_path).arg(device_path);
        let description = format!("push {} {}", host_path.display(), device_path);
        let output = self.output(cmd, &description, timeout).await?;
        let text = crate::combined_output(&output);
        if output.status.success() && push_succeeded(&text) {
            Ok(TransferOutput::succeeded(text))
        } else {
            Ok(TransferOutput::failed(text))
        }
    }

    #[instrument(skip(self))]
    async fn spawn(&self, args: &[String]) -> Result<StreamProcess> {
        let mut cmd = self.command();
        cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::null());
        let child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn adb {args:?}"))?;
        StreamProcess::from_child(args.to_vec(), child)
    }

    async fn is_attached(&self) -> Result<bool> {
        let mut cmd = self.command();
        cmd.arg("get-state");
        let output = self
            .output(cmd, "get-state", Duration::from_secs(20))
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim() == "device")
    }
}
