use std::path::{Path, PathBuf};
use std::time::Duration;

use common::retry::{Backoff, RetryPolicy};
use rand::Rng;
use regex::Regex;
use remote::{Channel, Error, Result, Transport};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::instrument;

use crate::codec::{LineFraming, LineStream};

#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Shell command clearing the device log buffer
    pub clear_command: String,
    /// Command line of the tail process, filters are appended
    pub tail_args: Vec<String>,
    /// Filters used when the caller passes none
    pub default_filters: Vec<String>,
    /// Shell command writing a marker into the log; `{marker}` is replaced by the marker text
    pub marker_command: String,
    /// How long to wait for a marker to show up in the stream
    pub sync_timeout: Duration,
    /// Spawn attempts before monitoring is declared failed
    pub spawn_attempts: usize,
    /// Filter keeping the marker visible when the caller passes its own filters
    pub marker_filter: Option<String>,
    /// Delay between respawns of a stream that keeps ending during a wait
    pub respawn_policy: RetryPolicy,
    /// File receiving a copy of every line the monitor reads, with `\n` line endings
    pub mirror: Option<PathBuf>,
    pub framing: LineFraming,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            clear_command: "logcat -c".to_string(),
            tail_args: vec!["logcat".into(), "-v".into(), "threadtime".into()],
            default_filters: vec!["*:v".into()],
            marker_command: "log {marker}".to_string(),
            sync_timeout: Duration::from_secs(10),
            spawn_attempts: 4,
            marker_filter: Some("log:V".to_string()),
            respawn_policy: RetryPolicy {
                max_retries: 20,
                backoff: Backoff::Linear(Duration::from_millis(500)),
            },
            mirror: None,
            framing: LineFraming::default(),
        }
    }
}

impl LogSettings {
    /// Full command line of the tail process for `filters`.
    pub fn spawn_args(&self, filters: &[String]) -> Vec<String> {
        let filters = if filters.is_empty() {
            &self.default_filters
        } else {
            filters
        };
        self.tail_args.iter().chain(filters).cloned().collect()
    }

    /// Like [`LogSettings::spawn_args`], keeping the marker tag visible under explicit filters.
    pub fn monitor_args(&self, filters: &[String]) -> Vec<String> {
        let mut args = self.spawn_args(filters);
        if let Some(marker_filter) = &self.marker_filter
            && !filters.is_empty()
            && !filters.contains(marker_filter)
        {
            args.push(marker_filter.clone());
        }
        args
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
    /// Overall budget of one wait, measured from the start of the call
    pub timeout: Duration,
    /// Clear the device log when the wait has to attach to the stream first
    pub clear: bool,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            clear: false,
        }
    }
}

/// A fresh synchronization marker, unique per call.
pub fn new_marker() -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let suffix: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("logcat_sync_{millis}_{suffix}")
}

async fn spawn_stream<T: Transport>(
    channel: &Channel<T>,
    args: &[String],
    framing: LineFraming,
) -> Result<LineStream> {
    let process = channel.transport().spawn(args).await?;
    Ok(LineStream::new(process, framing))
}

/// Writes a marker into the device log and waits for `stream` to show it.
async fn sync_stream<T: Transport>(
    channel: &Channel<T>,
    stream: &mut LineStream,
    settings: &LogSettings,
) -> Result<bool> {
    let marker = new_marker();
    channel
        .run(&settings.marker_command.replace("{marker}", &marker))
        .await?;
    match tokio::time::timeout(settings.sync_timeout, stream.scan_for(&marker)).await {
        Ok(Ok(true)) => Ok(true),
        Ok(Ok(false)) => {
            tracing::warn!("log stream ended before marker {} showed up", marker);
            Ok(false)
        }
        Ok(Err(error)) => {
            tracing::warn!("failed reading the log stream: {}", error);
            Ok(false)
        }
        Err(_) => {
            tracing::warn!(
                "marker {} did not show up within {:?}",
                marker,
                settings.sync_timeout
            );
            Ok(false)
        }
    }
}

/// Spawns the tail process and synchronizes with it, retrying with fresh spawns.
async fn spawn_synced<T: Transport>(
    channel: &Channel<T>,
    args: &[String],
    settings: &LogSettings,
) -> Result<LineStream> {
    let policy = RetryPolicy::attempts(settings.spawn_attempts);
    let outcome = common::retry::retry("log stream synchronization", &policy, || async move {
        let mut stream = match spawn_stream(channel, args, settings.framing).await {
            Ok(stream) => stream,
            Err(error) => return Ok(Err(error)),
        };
        match sync_stream(channel, &mut stream, settings).await {
            Ok(true) => Ok(Ok(stream)),
            Ok(false) => {
                stream.kill().await;
                Err("marker not observed")
            }
            Err(error) => Ok(Err(error)),
        }
    })
    .await;
    match outcome {
        Ok(res) => res,
        Err(_) => {
            tracing::error!(
                "error reading from the log stream after {} attempts",
                policy.max_attempts()
            );
            Err(Error::MonitorFailed {
                attempts: policy.max_attempts(),
            })
        }
    }
}

/// Appends stream lines to a file, normalized to `\n` line endings.
#[derive(Debug)]
struct Mirror {
    path: PathBuf,
    file: Option<tokio::fs::File>,
}

impl Mirror {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file: None,
        }
    }

    async fn write_line(&mut self, line: &str) {
        if let Err(error) = self.try_write_line(line).await {
            tracing::warn!("failed writing log mirror {:?}: {}", self.path, error);
            self.file = None;
        }
    }

    async fn try_write_line(&mut self, line: &str) -> std::io::Result<()> {
        if self.file.is_none() {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            self.file = Some(file);
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.trim_end_matches(['\r', '\n']).as_bytes());
        buf.push(b'\n');
        file.write_all(&buf).await?;
        file.flush().await
    }
}

/// Follows the device log and waits for patterns to show up in it.
///
/// Every session starts with a marker handshake: a unique marker is logged on the device and the
/// stream is consumed up to it, so nothing logged before the handshake is ever matched.
#[derive(Debug, Default)]
pub struct LogMonitor {
    settings: LogSettings,
    stream: Option<LineStream>,
    mirror: Option<Mirror>,
}

impl LogMonitor {
    pub fn new(settings: LogSettings) -> Self {
        let mirror = settings.mirror.as_deref().map(Mirror::new);
        Self {
            settings,
            stream: None,
            mirror,
        }
    }

    pub fn settings(&self) -> &LogSettings {
        &self.settings
    }

    pub fn is_attached(&self) -> bool {
        self.stream.is_some()
    }

    /// Starts following the device log, optionally clearing it first.
    ///
    /// Empty `filters` select the configured default filters. Explicit filters get the marker
    /// filter appended so the handshake can still see its marker.
    #[instrument(skip(self, channel))]
    pub async fn start_monitoring<T: Transport>(
        &mut self,
        channel: &Channel<T>,
        clear: bool,
        filters: &[String],
    ) -> Result<()> {
        self.stop_monitoring().await;
        if clear {
            channel.run(&self.settings.clear_command).await?;
        }
        let args = self.settings.monitor_args(filters);
        self.stream = Some(spawn_synced(channel, &args, &self.settings).await?);
        Ok(())
    }

    /// Tears the session down and starts a new one with the same arguments.
    pub async fn restart<T: Transport>(&mut self, channel: &Channel<T>) -> Result<()> {
        let args = match self.stream.as_ref() {
            Some(stream) => stream.args().to_vec(),
            None => self.settings.spawn_args(&[]),
        };
        self.stop_monitoring().await;
        self.stream = Some(spawn_synced(channel, &args, &self.settings).await?);
        Ok(())
    }

    pub async fn stop_monitoring(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.kill().await;
        }
    }

    /// Blocks until a line matching `success` or `error` shows up.
    ///
    /// Returns the matching line for `success` and `None` for `error`, which is checked first. A
    /// stream that ends is respawned with the same arguments without extending the budget, waiting
    /// longer before each consecutive respawn.
    #[instrument(skip(self, channel, success, error), fields(pattern = success.as_str()))]
    pub async fn wait_for_match<T: Transport>(
        &mut self,
        channel: &Channel<T>,
        success: &Regex,
        error: Option<&Regex>,
        options: &WaitOptions,
    ) -> Result<Option<String>> {
        tracing::info!("<<< Waiting for log pattern: {}", success.as_str());
        let deadline = Instant::now() + options.timeout;
        let timed_out = || Error::LogTimeout {
            pattern: success.as_str().to_string(),
            timeout: options.timeout,
        };
        let mut respawns = 0;
        loop {
            if self.stream.is_none() {
                self.start_monitoring(channel, options.clear, &[]).await?;
            }
            let Some(stream) = self.stream.as_mut() else {
                continue;
            };
            if Instant::now() >= deadline {
                return Err(timed_out());
            }
            let line = match tokio::time::timeout_at(deadline, stream.next_line()).await {
                Err(_) => return Err(timed_out()),
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) | Ok(Err(_)) => {
                    let args = stream.args().to_vec();
                    self.stop_monitoring().await;
                    respawns += 1;
                    let policy = &self.settings.respawn_policy;
                    if respawns > policy.max_retries {
                        tracing::error!("device log stream keeps ending, giving up");
                        return Err(Error::MonitorFailed { attempts: respawns });
                    }
                    let delay = policy.delay(respawns);
                    tracing::error!(
                        "Found end of stream in the device log, restarting in {:?}",
                        delay
                    );
                    tokio::time::sleep_until(deadline.min(Instant::now() + delay)).await;
                    if Instant::now() >= deadline {
                        return Err(timed_out());
                    }
                    self.stream = Some(spawn_stream(channel, &args, self.settings.framing).await?);
                    continue;
                }
            };
            respawns = 0;
            if let Some(mirror) = self.mirror.as_mut() {
                mirror.write_line(&line).await;
            }
            if error.is_some_and(|error| error.is_match(&line)) {
                return Ok(None);
            }
            if success.is_match(&line) {
                return Ok(Some(line));
            }
            tracing::debug!("<<< Skipped log line: {}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_are_unique() {
        let a = new_marker();
        let b = new_marker();
        assert!(a.starts_with("logcat_sync_"));
        assert_ne!(a, b);
    }

    #[test]
    fn default_spawn_args() {
        let settings = LogSettings::default();
        assert_eq!(
            settings.spawn_args(&[]),
            vec!["logcat", "-v", "threadtime", "*:v"]
        );
        assert_eq!(
            settings.spawn_args(&["chromium:I".to_string(), "*:S".to_string()]),
            vec!["logcat", "-v", "threadtime", "chromium:I", "*:S"]
        );
    }

    #[test]
    fn explicit_filters_keep_the_marker_tag() {
        let settings = LogSettings::default();
        assert_eq!(
            settings.monitor_args(&[]),
            vec!["logcat", "-v", "threadtime", "*:v"]
        );
        assert_eq!(
            settings.monitor_args(&["chromium:I".to_string(), "*:S".to_string()]),
            vec!["logcat", "-v", "threadtime", "chromium:I", "*:S", "log:V"]
        );
        assert_eq!(
            settings.monitor_args(&["log:V".to_string(), "*:S".to_string()]),
            vec!["logcat", "-v", "threadtime", "log:V", "*:S"]
        );
        let settings = LogSettings {
            marker_filter: None,
            ..Default::default()
        };
        assert_eq!(
            settings.monitor_args(&["chromium:I".to_string()]),
            vec!["logcat", "-v", "threadtime", "chromium:I"]
        );
    }

    #[tokio::test]
    async fn mirror_normalizes_line_endings() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("mirror.log");
        let mut mirror = Mirror::new(&path);
        mirror.write_line("first\r").await;
        mirror.write_line("second").await;
        assert_eq!(tokio::fs::read_to_string(&path).await?, "first\nsecond\n");
        Ok(())
    }
}
