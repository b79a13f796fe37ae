//! Device log monitoring
//!
//! Three pieces live here:
//!
//! - [`LogMonitor`] follows the device log and blocks until a line matching a pattern shows up.
//!   Each session starts with a marker handshake so that nothing logged earlier is matched.
//! - [`LogRecorder`] captures the device log into a temporary file in the background.
//! - [`search_record`] parses a recording into [`LogEntry`] values and filters them.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> remote::Result<()> {
//! use logcat::{LogMonitor, LogSettings, WaitOptions};
//! use remote::{AdbTransport, Channel, ChannelSettings};
//!
//! let channel = Channel::new(AdbTransport::new(None), ChannelSettings::default());
//! let mut monitor = LogMonitor::new(LogSettings::default());
//! monitor.start_monitoring(&channel, true, &[]).await?;
//! let success = regex::Regex::new("Displayed org.chromium").unwrap();
//! let line = monitor
//!     .wait_for_match(&channel, &success, None, &WaitOptions::default())
//!     .await?;
//! println!("{line:?}");
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod monitor;
pub mod recorder;

pub use codec::LineFraming;
pub use monitor::{LogMonitor, LogSettings, WaitOptions};
pub use recorder::{LogEntry, LogRecorder, RecordQuery, search_record};
