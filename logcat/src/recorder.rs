//! Recording the device log into a temporary file and searching the recording.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use remote::{Channel, Result, StreamProcess, Transport};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;
use tracing::instrument;

use crate::monitor::LogSettings;

/// Upper bound for reading what a killed capture process left in its pipe.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

static LOG_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)(\d+)\s+(\d+)\s+([A-Z])\s+([A-Za-z]+)\s*:(.*)$").unwrap()
});

/// One parsed log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub thread_id: u32,
    pub proc_id: u32,
    pub log_level: char,
    pub component: String,
    pub message: String,
}

/// Criteria for [`search_record`]. Unset fields match anything, set fields must all match.
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    /// Substring the message has to contain
    pub message: String,
    pub thread_id: Option<u32>,
    pub proc_id: Option<u32>,
    pub log_level: Option<char>,
    pub component: Option<String>,
}

impl RecordQuery {
    fn matches(&self, entry: &LogEntry) -> bool {
        self.thread_id.is_none_or(|tid| tid == entry.thread_id)
            && self.proc_id.is_none_or(|pid| pid == entry.proc_id)
            && self.log_level.is_none_or(|level| level == entry.log_level)
            && self
                .component
                .as_deref()
                .is_none_or(|component| component == entry.component)
            && entry.message.contains(&self.message)
    }
}

/// Returns every entry of `record` that satisfies `query`, in log order.
///
/// Lines that are not of the form `<tid> <pid> <LEVEL> <component>: <message>` are ignored.
pub fn search_record(record: &str, query: &RecordQuery) -> Vec<LogEntry> {
    LOG_LINE
        .captures_iter(record)
        .filter_map(|caps| {
            Some(LogEntry {
                thread_id: caps[1].parse().ok()?,
                proc_id: caps[2].parse().ok()?,
                log_level: caps[3].chars().next()?,
                component: caps[4].to_string(),
                message: caps[5].trim_start().trim_end_matches('\r').to_string(),
            })
        })
        .filter(|entry| query.matches(entry))
        .collect()
}

#[derive(Debug)]
struct Recording {
    file: tempfile::NamedTempFile,
    stop_tx: oneshot::Sender<()>,
    pump: tokio::task::JoinHandle<anyhow::Result<()>>,
}

async fn pump(
    mut process: StreamProcess,
    mut writer: tokio::fs::File,
    mut stop_rx: oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let mut buffer = vec![0; 8 * 1024];
    let mut stopping = false;
    loop {
        let n = if stopping {
            match tokio::time::timeout(DRAIN_TIMEOUT, process.stdout().read(&mut buffer)).await {
                Ok(res) => res?,
                Err(_) => break,
            }
        } else {
            tokio::select! {
                res = process.stdout().read(&mut buffer) => res?,
                _ = &mut stop_rx => {
                    process.kill().await;
                    stopping = true;
                    continue;
                }
            }
        };
        if n == 0 {
            break;
        }
        writer.write_all(&buffer[..n]).await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Captures the device log into a temporary file, independently of any [`crate::LogMonitor`].
#[derive(Debug, Default)]
pub struct LogRecorder {
    settings: LogSettings,
    recording: Option<Recording>,
}

impl LogRecorder {
    pub fn new(settings: LogSettings) -> Self {
        Self {
            settings,
            recording: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Starts a new recording, discarding a previous one.
    #[instrument(skip(self, channel))]
    pub async fn start<T: Transport>(
        &mut self,
        channel: &Channel<T>,
        clear: bool,
        filters: &[String],
    ) -> Result<()> {
        self.stop().await?;
        if clear {
            channel.run(&self.settings.clear_command).await?;
        }
        let args = self.settings.spawn_args(filters);
        let process = channel.transport().spawn(&args).await?;
        let file = tempfile::NamedTempFile::new()?;
        let writer = tokio::fs::File::from_std(file.reopen()?);
        tracing::debug!("recording {:?} into {:?}", args, file.path());
        let (stop_tx, stop_rx) = oneshot::channel();
        let pump = tokio::spawn(pump(process, writer, stop_rx));
        self.recording = Some(Recording {
            file,
            stop_tx,
            pump,
        });
        Ok(())
    }

    /// Everything recorded so far, `None` when not recording.
    pub async fn current(&self) -> Result<Option<String>> {
        let Some(recording) = &self.recording else {
            return Ok(None);
        };
        let data = tokio::fs::read(recording.file.path()).await?;
        Ok(Some(String::from_utf8_lossy(&data).into_owned()))
    }

    /// Stops recording and returns the whole recording, or an empty string if not recording.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<String> {
        let Some(recording) = self.recording.take() else {
            return Ok(String::new());
        };
        // the pump is gone already if the capture process ended on its own
        let _ = recording.stop_tx.send(());
        match recording.pump.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => tracing::warn!("log recording ended with an error: {:#}", error),
            Err(error) => tracing::warn!("log recording task failed: {}", error),
        }
        let data = tokio::fs::read(recording.file.path()).await?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = "\
--------- beginning of main\r
01-02 03:04:05.678  1234  1240 I chromium: [INFO:tab.cc] page loaded\r
01-02 03:04:05.679  1234  1241 W chromium: [WARNING:net.cc] slow request\r
01-02 03:04:05.680  4321  4321 E ActivityManager: ANR in org.chromium\r
01-02 03:04:05.681  1234  1240 I cr_Tab: page loaded again\r
garbage line without structure\r
";

    #[test]
    fn empty_query_returns_every_structured_line() {
        let entries = search_record(RECORD, &RecordQuery::default());
        // "cr_Tab" is not a letters-only tag, so that line is not structured
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|entry| entry.component != "cr_Tab"));
        assert_eq!(
            entries[0],
            LogEntry {
                thread_id: 1234,
                proc_id: 1240,
                log_level: 'I',
                component: "chromium".to_string(),
                message: "[INFO:tab.cc] page loaded".to_string(),
            }
        );
    }

    #[test]
    fn message_substring() {
        let query = RecordQuery {
            message: "page loaded".to_string(),
            ..Default::default()
        };
        let entries = search_record(RECORD, &query);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].component, "chromium");
    }

    #[test]
    fn filters_combine() {
        let query = RecordQuery {
            thread_id: Some(1234),
            log_level: Some('W'),
            ..Default::default()
        };
        let entries = search_record(RECORD, &query);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].proc_id, 1241);

        let query = RecordQuery {
            proc_id: Some(4321),
            component: Some("ActivityManager".to_string()),
            ..Default::default()
        };
        assert_eq!(search_record(RECORD, &query).len(), 1);

        let query = RecordQuery {
            proc_id: Some(4321),
            component: Some("chromium".to_string()),
            ..Default::default()
        };
        assert!(search_record(RECORD, &query).is_empty());
    }

    #[test]
    fn entries_serialize() -> anyhow::Result<()> {
        let entries = search_record(
            RECORD,
            &RecordQuery {
                log_level: Some('E'),
                ..Default::default()
            },
        );
        let json = serde_json::to_value(&entries)?;
        assert_eq!(json[0]["log_level"], "E");
        assert_eq!(json[0]["message"], "ANR in org.chromium");
        Ok(())
    }
}
