//! Loopback transport: the "device" is the host itself.
//!
//! Commands run through `sh -c`, pushes are overwriting tree copies and spawned streams are local
//! processes. Useful for exercising the whole stack without hardware.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use tokio::process::Command;
use tracing::instrument;

use crate::error::{Error, Result};
use crate::transport::{StreamProcess, TransferOutput, Transport};

#[derive(Debug, Clone, Default)]
pub struct LocalTransport {}

impl LocalTransport {
    pub fn new() -> Self {
        Self {}
    }
}

impl Transport for LocalTransport {
    fn serial(&self) -> Option<&str> {
        None
    }

    #[instrument(skip(self))]
    async fn shell(&self, command: &str, timeout: Duration) -> Result<String> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(format!("exec 2>&1; {command}"))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(res) => res.with_context(|| format!("failed to run {command:?}"))?,
            Err(_) => {
                return Err(Error::CommandTimeout {
                    command: command.to_string(),
                    timeout,
                });
            }
        };
        Ok(crate::combined_output(&output))
    }

    #[instrument(skip(self))]
    async fn push(
        &self,
        host_path: &Path,
        device_path: &str,
        timeout: Duration,
    ) -> Result<TransferOutput> {
        let copy = common::copy::copy_overwrite(host_path, Path::new(device_path));
        match tokio::time::timeout(timeout, copy).await {
            Ok(Ok(summary)) => Ok(TransferOutput::succeeded(summary.to_string())),
            Ok(Err(error)) => Ok(TransferOutput::failed(format!(
                "failed to copy {host_path:?} to {device_path:?}: {error:#}"
            ))),
            Err(_) => Err(Error::CommandTimeout {
                command: format!("push {} {}", host_path.display(), device_path),
                timeout,
            }),
        }
    }

    #[instrument(skip(self))]
    async fn spawn(&self, args: &[String]) -> Result<StreamProcess> {
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("cannot spawn an empty command line"))?;
        let child = Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {args:?}"))?;
        StreamProcess::from_child(args.to_vec(), child)
    }

    async fn is_attached(&self) -> Result<bool> {
        Ok(true)
    }
}
