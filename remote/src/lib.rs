//! Device transports and the command/status channel.
//!
//! A [`Transport`] moves bytes to and from one device: one-shot shell commands, bulk copies and
//! long-lived streamed processes. A [`Channel`] sits on top of it and turns raw shell output into
//! [`CommandResult`]s carrying a reliable exit status.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> remote::Result<()> {
//! use remote::{Channel, ChannelSettings, LocalTransport};
//!
//! let channel = Channel::new(LocalTransport::new(), ChannelSettings::default());
//! let result = channel
//!     .run_with_status("ls /", channel.settings().default_timeout)
//!     .await?;
//! assert_eq!(result.exit_status, 0);
//! # Ok(())
//! # }
//! ```

pub mod adb;
pub mod channel;
pub mod deploy;
pub mod error;
pub mod local;
pub mod transport;

pub use adb::AdbTransport;
pub use channel::{Channel, ChannelSettings, CommandResult};
pub use error::{Error, Result};
pub use local::LocalTransport;
pub use transport::{StreamProcess, TransferOutput, Transport};

/// Quotes `s` for safe use as a single word in a POSIX shell command line.
pub fn shell_escape(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:,@%".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Joins stdout and stderr of a finished process, stdout first.
pub(crate) fn combined_output(output: &std::process::Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}
