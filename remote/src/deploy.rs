//! Helper binary deployment
//!
//! Some operations need a small program running on the device (the content hasher, for example).
//! This module locates the host-side copy of such a binary, pushes it to the device when the
//! device copy is missing or stale, and verifies the result with a SHA-256 checksum.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use sha2::Digest;
use tracing::instrument;

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Find a local binary suitable for deployment
///
/// Searches in the following order:
/// 1. The explicitly configured path, if any
/// 2. Same directory as the current executable
/// 3. PATH via `which <name>`
///
/// This covers development builds where all workspace binaries land in the same `target/`
/// directory as well as installed setups.
///
/// # Errors
///
/// Returns [`Error::HasherMissing`] naming the first searched location if no binary is found
pub fn find_local_binary(name: &str, explicit: Option<&Path>) -> Result<PathBuf> {
    let mut searched_paths = Vec::new();

    if let Some(path) = explicit {
        if path.is_file() {
            tracing::debug!("Using configured {} binary at {}", name, path.display());
            return Ok(path.to_path_buf());
        }
        return Err(Error::HasherMissing(path.to_path_buf()));
    }

    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(bin_dir) = current_exe.parent() {
            let path = bin_dir.join(name);
            if path.is_file() {
                tracing::debug!("Found local {} binary at {}", name, path.display());
                return Ok(path);
            }
            searched_paths.push(path);
        }
    }

    tracing::debug!("Trying to find {} in PATH", name);
    if let Ok(output) = std::process::Command::new("which").arg(name).output() {
        if output.status.success() {
            let path_str = String::from_utf8_lossy(&output.stdout);
            let path = PathBuf::from(path_str.trim());
            if !path_str.trim().is_empty() && path.is_file() {
                tracing::debug!("Found local {} binary in PATH: {}", name, path.display());
                return Ok(path);
            }
        }
    }

    tracing::error!(
        "no local {} binary found, searched: {:?} and PATH",
        name,
        searched_paths
    );
    Err(Error::HasherMissing(
        searched_paths
            .into_iter()
            .next()
            .unwrap_or_else(|| PathBuf::from(name)),
    ))
}

/// Compute hex encoded SHA-256 hash of data
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha2::Sha256::digest(data))
}

pub async fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(sha256_hex(&data))
}

/// Where a helper binary lives on the device and how to checksum it there.
#[derive(Debug, Clone)]
pub struct DeployTarget {
    pub device_path: String,
    /// Command printing `<sha256 hex> <path>`; `{path}` is replaced by the escaped device path
    pub checksum_command: String,
    pub push_timeout: Duration,
}

impl DeployTarget {
    fn checksum_command(&self) -> String {
        self.checksum_command
            .replace("{path}", &crate::shell_escape(&self.device_path))
    }
}

/// Returns the checksum reported by the device copy, if there is one.
async fn device_checksum<T: Transport>(
    channel: &Channel<T>,
    target: &DeployTarget,
) -> Result<Option<String>> {
    let result = channel
        .run_with_status(&target.checksum_command(), channel.settings().default_timeout)
        .await?;
    if !result.success() {
        return Ok(None);
    }
    Ok(result
        .output_lines
        .iter()
        .find_map(|line| line.split_whitespace().next())
        .map(str::to_string))
}

/// Makes sure the device copy of `local_path` is current.
///
/// Returns `true` if the binary had to be pushed.
#[instrument(skip(channel))]
pub async fn ensure_deployed<T: Transport>(
    channel: &Channel<T>,
    local_path: &Path,
    target: &DeployTarget,
) -> Result<bool> {
    let expected = sha256_file(local_path).await?;
    if device_checksum(channel, target).await?.as_deref() == Some(expected.as_str()) {
        tracing::debug!("{} is up to date on the device", target.device_path);
        return Ok(false);
    }
    tracing::info!(
        "Deploying {} to {}",
        local_path.display(),
        target.device_path
    );
    let dir = Path::new(&target.device_path)
        .parent()
        .and_then(Path::to_str)
        .context("device path must have a parent directory")?;
    let mkdir = channel
        .run_with_status(
            &format!("mkdir -p {}", crate::shell_escape(dir)),
            channel.settings().default_timeout,
        )
        .await?;
    if !mkdir.success() {
        return Err(anyhow::anyhow!(
            "failed to create {} on the device: {}",
            dir,
            mkdir.output_lines.join("\n")
        )
        .into());
    }
    let output = channel
        .push(local_path, &target.device_path, target.push_timeout)
        .await?;
    if !output.success {
        return Err(Error::PushFailed {
            host_path: local_path.to_path_buf(),
            device_path: target.device_path.clone(),
            attempts: 1,
            output: output.output,
        });
    }
    channel
        .run(&format!(
            "chmod 755 {}",
            crate::shell_escape(&target.device_path)
        ))
        .await?;
    match device_checksum(channel, target).await? {
        Some(actual) if actual == expected => Ok(true),
        actual => Err(anyhow::anyhow!(
            "checksum mismatch after transfer\n\
            \n\
            Expected: {}\n\
            Got:      {}",
            expected,
            actual.as_deref().unwrap_or("<nothing>")
        )
        .into()),
    }
}
