//! Shared host-side utilities for the devctl tools
//!
//! This crate carries the pieces every devctl binary and library needs but that have nothing to do
//! with a particular device protocol:
//!
//! - [`run`] builds the tokio runtime, installs the tracing subscriber and reports the outcome of
//!   the tool's async entry point
//! - [`retry`] is the bounded retry-with-backoff helper shared by file pushes and log stream spawns
//! - [`du`] measures host trees the way `du -sb` does
//! - [`copy`] performs an overwriting tree copy, used by the loopback transport
//!
//! # Logging
//!
//! Verbosity follows the usual `-v` convention: ERROR by default, `-v` INFO, `-vv` DEBUG and
//! `-vvv` TRACE. `RUST_LOG` overrides the computed filter when set. Logs go to stderr so that
//! command output printed on stdout can be piped.

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub mod config;
pub mod copy;
pub mod du;
pub mod retry;

#[cfg(test)]
mod testutils;

pub use config::{OutputConfig, RuntimeConfig, TracingConfig};

fn level_filter(output: &OutputConfig) -> &'static str {
    if output.quiet {
        return "off";
    }
    match output.verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn init_tracing(output: &OutputConfig, tracing: &TracingConfig) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level_filter(output)));
    let registry = tracing_subscriber::registry().with(filter);
    match &tracing.debug_log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("failed to create debug log file {path:?}"))?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(std::sync::Mutex::new(file)),
                )
                .try_init()
                .context("failed to install tracing subscriber")?;
        }
        None => {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .try_init()
                .context("failed to install tracing subscriber")?;
        }
    }
    Ok(())
}

fn build_runtime(runtime: &RuntimeConfig) -> anyhow::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    builder.build().context("failed to build tokio runtime")
}

/// Runs a tool's async entry point on a freshly built runtime.
///
/// Returns `None` when setup or the entry point failed; the error has already been printed to
/// stderr unless `output.quiet` is set. On success the summary is printed to stdout when
/// `output.print_summary` is set.
pub fn run<Fut, Summary, Error>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    tracing: TracingConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Summary: std::fmt::Display,
    Error: std::fmt::Display,
    Fut: std::future::Future<Output = Result<Summary, Error>>,
{
    if let Err(error) = init_tracing(&output, &tracing) {
        eprintln!("{error:#}");
        return None;
    }
    let runtime = match build_runtime(&runtime) {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("{error:#}");
            return None;
        }
    };
    let res = runtime.block_on(func());
    match res {
        Ok(summary) => {
            if output.print_summary {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            if !output.quiet {
                eprintln!("{error:#}");
            }
            None
        }
    }
}
