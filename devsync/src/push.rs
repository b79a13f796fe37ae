use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use common::retry::RetryPolicy;
use remote::deploy::DeployTarget;
use remote::{Channel, Error, Result, Transport, shell_escape};
use tracing::instrument;

use crate::diff::{self, Comparison, PendingPush};
use crate::hashsum;

/// Where the content hasher comes from and how it is run on the device.
#[derive(Debug, Clone)]
pub struct HasherSettings {
    /// Host-side build of `hashsum` to deploy; looked up next to the current executable and in
    /// PATH when unset
    pub host_dist: Option<PathBuf>,
    /// Device directory the hasher is installed into
    pub device_dir: String,
    /// Prefix for the hasher invocation, e.g. `LD_LIBRARY_PATH=/data/local/tmp/devsync`
    pub wrapper: Option<String>,
}

impl Default for HasherSettings {
    fn default() -> Self {
        Self {
            host_dist: None,
            device_dir: "/data/local/tmp/devsync".to_string(),
            wrapper: None,
        }
    }
}

impl HasherSettings {
    pub fn device_binary(&self) -> String {
        format!("{}/hashsum", self.device_dir.trim_end_matches('/'))
    }

    /// Hasher command line for an already escaped `path` argument.
    fn command(&self, path: &str) -> String {
        let binary = shell_escape(&self.device_binary());
        match &self.wrapper {
            Some(wrapper) => format!("{wrapper} {binary} {path}"),
            None => format!("{binary} {path}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PushSettings {
    /// Above this many changed files the whole source is copied in one operation
    pub max_individual_pushes: usize,
    /// Bulk copy is used when the changed files make up more than this share of the source size
    pub bulk_ratio: f64,
    pub push_timeout: Duration,
    pub hasher_timeout: Duration,
    pub remove_timeout: Duration,
    pub retry: RetryPolicy,
    pub hasher: HasherSettings,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            max_individual_pushes: 50,
            bulk_ratio: 0.5,
            push_timeout: Duration::from_secs(30 * 60),
            hasher_timeout: Duration::from_secs(2 * 60),
            remove_timeout: Duration::from_secs(2 * 60),
            retry: RetryPolicy::push(),
            hasher: HasherSettings::default(),
        }
    }
}

impl PushSettings {
    /// Whether `changed_size` bytes out of `total_size` are worth a bulk copy.
    pub fn prefers_bulk(&self, changed_size: u64, total_size: u64) -> bool {
        changed_size as f64 > self.bulk_ratio * total_size as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Single file unchanged since its last push, nothing was checked
    Cached,
    /// Device content already matches
    UpToDate,
    /// The whole source was copied in one operation
    Bulk,
    /// Only the changed files were copied
    Individual,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            Strategy::Cached => "cached",
            Strategy::UpToDate => "up to date",
            Strategy::Bulk => "bulk",
            Strategy::Individual => "individual",
        };
        write!(f, "{name}")
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PushSummary {
    pub strategy: Strategy,
    /// Number of files that differed from the device
    pub files_pushed: usize,
    /// Bytes accounted as transferred
    pub bytes_pushed: u64,
}

impl PushSummary {
    fn skipped(strategy: Strategy) -> Self {
        Self {
            strategy,
            files_pushed: 0,
            bytes_pushed: 0,
        }
    }
}

impl std::fmt::Display for PushSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "push strategy: {}\n\
            files pushed: {}\n\
            bytes pushed: {}",
            self.strategy,
            self.files_pushed,
            bytesize::ByteSize(self.bytes_pushed)
        )
    }
}

/// Incremental host to device synchronization.
///
/// Keeps the per-session state: the push cache of single files, the byte counters and the list
/// of every device path written to.
#[derive(Debug, Default)]
pub struct Pusher {
    settings: PushSettings,
    push_cache: HashMap<PathBuf, SystemTime>,
    pushed_paths: Vec<String>,
    potential_bytes: u64,
    actual_bytes: u64,
    hasher_ready: bool,
}

impl Pusher {
    pub fn new(settings: PushSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    pub fn settings(&self) -> &PushSettings {
        &self.settings
    }

    /// `(potential_bytes, actual_bytes)` accumulated over the lifetime of this pusher.
    pub fn push_size_info(&self) -> (u64, u64) {
        (self.potential_bytes, self.actual_bytes)
    }

    /// Every device path queued by [`Pusher::push`], in order.
    pub fn pushed_paths(&self) -> &[String] {
        &self.pushed_paths
    }

    /// Pushes `host_path` to `device_path`, copying only what differs.
    #[instrument(skip(self, channel))]
    pub async fn push<T: Transport>(
        &mut self,
        channel: &Channel<T>,
        host_path: &Path,
        device_path: &str,
    ) -> Result<PushSummary> {
        let Ok(metadata) = tokio::fs::metadata(host_path).await else {
            return Err(Error::LocalPathNotFound(host_path.to_path_buf()));
        };
        if !metadata.is_dir() {
            let key = tokio::fs::canonicalize(host_path).await?;
            let mtime = metadata.modified().ok();
            if mtime.is_some() && self.push_cache.get(&key) == mtime.as_ref() {
                tracing::debug!("{:?} unchanged since its last push", host_path);
                return Ok(PushSummary::skipped(Strategy::Cached));
            }
        }
        let size = common::du::disk_usage(host_path).await?;
        self.potential_bytes += size;
        self.pushed_paths.push(device_path.to_string());

        let changed = self
            .get_files_changed(channel, host_path, device_path, false)
            .await?;
        if changed.is_empty() {
            return Ok(PushSummary::skipped(Strategy::UpToDate));
        }
        let (strategy, bytes_pushed) = if changed.len() > self.settings.max_individual_pushes {
            (Strategy::Bulk, size)
        } else {
            let changed_hosts: Vec<&Path> = changed.iter().map(|p| p.host_path.as_path()).collect();
            let changed_size = common::du::total_disk_usage(&changed_hosts).await?;
            if self.settings.prefers_bulk(changed_size, size) {
                (Strategy::Bulk, size)
            } else {
                (Strategy::Individual, changed_size)
            }
        };
        tracing::info!(
            "{} of {} files changed, pushing {} ({})",
            changed.len(),
            host_path.display(),
            bytesize::ByteSize(bytes_pushed),
            strategy
        );
        self.actual_bytes += bytes_pushed;
        match strategy {
            Strategy::Bulk => {
                if metadata.is_dir() {
                    let mkdir = channel
                        .run_with_status(
                            &format!("mkdir -p {}", shell_escape(device_path)),
                            channel.settings().default_timeout,
                        )
                        .await?;
                    if !mkdir.success() {
                        tracing::warn!(
                            "mkdir -p {} failed: {}",
                            device_path,
                            mkdir.output_lines.join("\n")
                        );
                    }
                }
                self.transfer(channel, host_path, device_path).await?;
            }
            _ => {
                for pending in &changed {
                    self.transfer(channel, &pending.host_path, &pending.device_path)
                        .await?;
                }
            }
        }
        Ok(PushSummary {
            strategy,
            files_pushed: changed.len(),
            bytes_pushed,
        })
    }

    /// Copies one path, retrying failed transfers according to the configured policy.
    async fn transfer<T: Transport>(
        &mut self,
        channel: &Channel<T>,
        host_path: &Path,
        device_path: &str,
    ) -> Result<()> {
        let policy = self.settings.retry;
        let timeout = self.settings.push_timeout;
        let outcome = common::retry::retry(
            &format!("push of {}", host_path.display()),
            &policy,
            || async move {
                match channel.push(host_path, device_path, timeout).await {
                    Ok(output) if output.success => Ok(Ok(())),
                    Ok(output) => Err(output.output),
                    Err(error @ Error::CommandTimeout { .. }) => Err(error.to_string()),
                    Err(error) => Ok(Err(error)),
                }
            },
        )
        .await;
        match outcome {
            Ok(res) => res?,
            Err(output) => {
                return Err(Error::PushFailed {
                    host_path: host_path.to_path_buf(),
                    device_path: device_path.to_string(),
                    attempts: policy.max_attempts(),
                    output,
                });
            }
        }
        let metadata = tokio::fs::metadata(host_path).await?;
        if !metadata.is_file() {
            return Ok(());
        }
        if let Ok(mtime) = metadata.modified() {
            let key = tokio::fs::canonicalize(host_path).await?;
            self.push_cache.insert(key, mtime);
        }
        Ok(())
    }

    /// Lists host files under `host_path` whose content is missing from `device_path`.
    ///
    /// With `ignore_filenames` any device file with matching content counts, regardless of where
    /// it lives.
    #[instrument(skip(self, channel))]
    pub async fn get_files_changed<T: Transport>(
        &mut self,
        channel: &Channel<T>,
        host_path: &Path,
        device_path: &str,
        ignore_filenames: bool,
    ) -> Result<Vec<PendingPush>> {
        let Ok(real_host_path) = tokio::fs::canonicalize(host_path).await else {
            return Err(Error::LocalPathNotFound(host_path.to_path_buf()));
        };
        let host_is_dir = tokio::fs::metadata(&real_host_path).await?.is_dir();
        let resolved_device_path = self.resolve_device_path(channel, device_path).await?;
        // unreadable host files cannot be pushed either, hash_tree already warned about them
        let host_hashes = hashsum::hash_tree(&real_host_path).await?.hashes;
        let device_hashes = self.device_hashes(channel, &resolved_device_path).await?;
        let host_root = real_host_path.to_string_lossy();
        let comparison = Comparison {
            host_root: &host_root,
            host_is_dir,
            device_path,
            resolved_device_path: &resolved_device_path,
            ignore_filenames,
        };
        Ok(diff::changed_files(&comparison, &host_hashes, device_hashes))
    }

    /// Resolves symlinks in `device_path`, falling back to the path itself when that fails.
    async fn resolve_device_path<T: Transport>(
        &self,
        channel: &Channel<T>,
        device_path: &str,
    ) -> Result<String> {
        let result = channel
            .run_with_status(
                &format!("realpath {}", shell_escape(device_path)),
                channel.settings().default_timeout,
            )
            .await?;
        match result.output_lines.first() {
            Some(resolved) if result.success() && !resolved.trim().is_empty() => {
                Ok(resolved.trim().to_string())
            }
            _ => {
                tracing::debug!("cannot resolve {}, using it as is", device_path);
                Ok(device_path.to_string())
            }
        }
    }

    async fn ensure_hasher<T: Transport>(&mut self, channel: &Channel<T>) -> Result<()> {
        if self.hasher_ready {
            return Ok(());
        }
        let hasher = &self.settings.hasher;
        let local = remote::deploy::find_local_binary("hashsum", hasher.host_dist.as_deref())?;
        let target = DeployTarget {
            device_path: hasher.device_binary(),
            checksum_command: hasher.command("{path}"),
            push_timeout: self.settings.push_timeout,
        };
        remote::deploy::ensure_deployed(channel, &local, &target).await?;
        self.hasher_ready = true;
        Ok(())
    }

    async fn device_hashes<T: Transport>(
        &mut self,
        channel: &Channel<T>,
        device_path: &str,
    ) -> Result<Vec<hashsum::FileHash>> {
        self.ensure_hasher(channel).await?;
        let command = self.settings.hasher.command(&shell_escape(device_path));
        let lines = channel
            .run_with_timeout(&command, self.settings.hasher_timeout)
            .await?;
        Ok(hashsum::parse_output(&lines))
    }

    /// Removes every device path this pusher has written to. Failures are only logged.
    #[instrument(skip(self, channel))]
    pub async fn remove_pushed_files<T: Transport>(&self, channel: &Channel<T>) {
        for path in &self.pushed_paths {
            let command = format!("rm -r {}", shell_escape(path));
            if let Err(error) = channel
                .run_with_timeout(&command, self.settings.remove_timeout)
                .await
            {
                tracing::error!("failed to remove {}: {:#}", path, error);
            }
        }
    }
}
