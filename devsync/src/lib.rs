//! Incremental file synchronization from the host to a device
//!
//! [`Pusher::push`] hashes both sides with the `hashsum` content hasher (linked in-process on the
//! host, deployed as a binary on the device), and copies only the files whose content is not
//! already present. Large or mostly-changed trees are copied in one bulk operation instead.
//!
//! Device-only files are never deleted. Failed transfers are retried with a linear backoff.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> remote::Result<()> {
//! use remote::{AdbTransport, Channel, ChannelSettings};
//!
//! let channel = Channel::new(AdbTransport::new(None), ChannelSettings::default());
//! let mut pusher = devsync::Pusher::new(devsync::PushSettings::default());
//! let summary = pusher
//!     .push(&channel, std::path::Path::new("out/lib"), "/data/local/tmp/lib")
//!     .await?;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```

pub mod diff;
pub mod hashsum;
mod push;

pub use diff::PendingPush;
pub use push::{HasherSettings, PushSettings, PushSummary, Pusher, Strategy};
