use std::path::PathBuf;
use std::time::Duration;

/// Failures surfaced by the device control layer.
///
/// Every variant carries the raw context (command text, output, timeout) needed to diagnose the
/// failure without re-running it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport reports the device as gone. Never retried.
    #[error("device {device} is unresponsive: {reason}")]
    DeviceUnresponsive { device: String, reason: String },

    #[error("local path not found: {0:?}")]
    LocalPathNotFound(PathBuf),

    /// The host-side distribution of the content hasher does not exist.
    #[error("content hasher binary not found at {0:?}, please build it")]
    HasherMissing(PathBuf),

    /// A transfer still failed after exhausting its retries.
    #[error("push of {host_path:?} to {device_path} failed after {attempts} attempts: {output}")]
    PushFailed {
        host_path: PathBuf,
        device_path: String,
        attempts: usize,
        output: String,
    },

    /// No line matched within the wait budget.
    #[error("timeout ({timeout:?}) exceeded waiting for pattern \"{pattern}\"")]
    LogTimeout { pattern: String, timeout: Duration },

    /// The log stream never echoed back the synchronization marker.
    #[error("failed to synchronize with the log stream after {attempts} attempts")]
    MonitorFailed { attempts: usize },

    /// A command that has a structured alternative was issued directly in strict mode.
    #[error("{command} cannot be run directly, instead use: {preferred}")]
    InvalidCommand {
        command: String,
        preferred: &'static str,
    },

    #[error("cannot parse exit status of {command:?} from output {output:?}")]
    MalformedStatus { command: String, output: Vec<String> },

    #[error("command {command:?} timed out after {timeout:?}")]
    CommandTimeout { command: String, timeout: Duration },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
