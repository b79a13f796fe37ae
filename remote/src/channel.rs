//! Shell command execution with exit status recovery.
//!
//! Device shells only hand back output. The exit status is recovered by appending a sentinel
//! (`; echo %$?`) and peeling it off the last output line.

use std::path::Path;
use std::time::Duration;

use tracing::instrument;

use crate::error::{Error, Result};
use crate::transport::{TransferOutput, Transport};

const STATUS_SENTINEL: &str = "; echo %$?";

#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// Reject commands that have a structured alternative instead of warning about them
    pub strict: bool,
    /// Log the output of every command at INFO
    pub log_results: bool,
    pub default_timeout: Duration,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            strict: false,
            log_results: false,
            default_timeout: Duration::from_secs(20),
        }
    }
}

/// Output of one command together with its exit status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_status: i32,
    pub output_lines: Vec<String>,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Caller {
    Direct,
    RootHelper,
}

/// Validates a command before it is sent to the device.
///
/// Returns the structured alternative the command should have used, if any.
fn preferred_alternative(command: &str, caller: Caller) -> Option<&'static str> {
    match command.split_whitespace().next()? {
        "getprop" | "setprop" => Some("system property accessors"),
        "su" if caller != Caller::RootHelper => Some("Channel::run_as_root"),
        _ => None,
    }
}

/// Splits the status sentinel off `lines`.
///
/// The status is the text after the rightmost `%` of the last line. Anything in front of the `%`
/// is output the command printed without a trailing newline and stays as the last line.
pub fn parse_status(command: &str, mut lines: Vec<String>) -> Result<CommandResult> {
    let malformed = |output: Vec<String>| Error::MalformedStatus {
        command: command.to_string(),
        output,
    };
    let Some(last_line) = lines.pop() else {
        return Err(malformed(lines));
    };
    let Some(pos) = last_line.rfind('%') else {
        lines.push(last_line);
        return Err(malformed(lines));
    };
    let Ok(exit_status) = last_line[pos + 1..].trim().parse::<i32>() else {
        lines.push(last_line);
        return Err(malformed(lines));
    };
    if pos > 0 {
        lines.push(last_line[..pos].to_string());
    }
    Ok(CommandResult {
        exit_status,
        output_lines: lines,
    })
}

fn is_device_not_found(lines: &[String]) -> bool {
    match lines {
        [line] => {
            let line = line.trim();
            line.starts_with("error: device") && line.ends_with("not found")
        }
        _ => false,
    }
}

/// Command/status channel to one device.
#[derive(Debug)]
pub struct Channel<T> {
    transport: T,
    settings: ChannelSettings,
}

impl<T: Transport> Channel<T> {
    pub fn new(transport: T, settings: ChannelSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    /// Short device tag used as log prefix: the last 4 characters of the serial.
    pub fn device_tag(&self) -> String {
        match self.transport.serial() {
            Some(serial) => {
                let skip = serial.chars().count().saturating_sub(4);
                serial.chars().skip(skip).collect()
            }
            None => "????".to_string(),
        }
    }

    fn device_name(&self) -> String {
        self.transport.serial().unwrap_or("<default>").to_string()
    }

    fn check_command(&self, command: &str, caller: Caller) -> Result<()> {
        if command.contains('\'') {
            tracing::warn!(
                "command {:?} contains a single quote, make sure it survives the device shell",
                command
            );
        }
        let Some(preferred) = preferred_alternative(command, caller) else {
            return Ok(());
        };
        if self.settings.strict {
            return Err(Error::InvalidCommand {
                command: command.to_string(),
                preferred,
            });
        }
        tracing::warn!("{} should not be run directly, instead use: {}", command, preferred);
        Ok(())
    }

    async fn exec(&self, command: &str, timeout: Duration) -> Result<Vec<String>> {
        tracing::info!("[{}]> {}", self.device_tag(), command);
        let output = self.transport.shell(command, timeout).await?;
        let lines: Vec<String> = output.lines().map(str::to_string).collect();
        if is_device_not_found(&lines) {
            return Err(Error::DeviceUnresponsive {
                device: self.device_name(),
                reason: lines.join(""),
            });
        }
        if self.settings.log_results {
            tracing::info!("{}", lines.join("\n"));
        }
        Ok(lines)
    }

    /// Runs `command` with the default timeout and returns its output lines.
    pub async fn run(&self, command: &str) -> Result<Vec<String>> {
        self.run_with_timeout(command, self.settings.default_timeout)
            .await
    }

    pub async fn run_with_timeout(&self, command: &str, timeout: Duration) -> Result<Vec<String>> {
        self.check_command(command, Caller::Direct)?;
        self.exec(command, timeout).await
    }

    /// Runs `command` and recovers its exit status.
    #[instrument(skip(self))]
    pub async fn run_with_status(&self, command: &str, timeout: Duration) -> Result<CommandResult> {
        self.check_command(command, Caller::Direct)?;
        let lines = self
            .exec(&format!("{command}{STATUS_SENTINEL}"), timeout)
            .await?;
        parse_status(command, lines)
    }

    /// Runs `command` as the superuser through `su -c`.
    pub async fn run_as_root(&self, command: &str, timeout: Duration) -> Result<Vec<String>> {
        self.check_command(command, Caller::Direct)?;
        let wrapped = format!("su -c {command}");
        self.check_command(&wrapped, Caller::RootHelper)?;
        self.exec(&wrapped, timeout).await
    }

    /// Copies `host_path` to `device_path` with the transport's bulk primitive.
    pub async fn push(
        &self,
        host_path: &Path,
        device_path: &str,
        timeout: Duration,
    ) -> Result<TransferOutput> {
        tracing::info!(
            "[{}]> push {} {}",
            self.device_tag(),
            host_path.display(),
            device_path
        );
        let output = self.transport.push(host_path, device_path, timeout).await?;
        if is_device_not_found(&[output.output.trim().to_string()]) {
            return Err(Error::DeviceUnresponsive {
                device: self.device_name(),
                reason: output.output.trim().to_string(),
            });
        }
        Ok(output)
    }

    pub async fn is_online(&self) -> Result<bool> {
        self.transport.is_attached().await
    }
}
