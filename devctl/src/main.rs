use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use logcat::{LineFraming, LogMonitor, LogRecorder, LogSettings, RecordQuery, WaitOptions};
use remote::{AdbTransport, Channel, ChannelSettings, LocalTransport, Transport};
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "devctl",
    version,
    about = "Drive an attached device: run commands, sync files and follow its log",
    long_about = "`devctl` drives a single device attached over adb (or the host itself with --local).

EXAMPLE:
    # Run a command and fail unless it exits with 0
    devctl shell --status -- ls /data/local/tmp

    # Sync a build output directory, transferring only changed files
    devctl --summary push out/Release/apks /data/local/tmp/apks

    # Wait up to 30 seconds for an activity to come up
    devctl wait-log --timeout 30s 'Displayed org.chromium'"
)]
struct Args {
    // Device selection
    /// Serial of the device to use, needed when more than one device is attached
    #[arg(short = 's', long, value_name = "SERIAL", help_heading = "Device selection")]
    serial: Option<String>,

    /// Use the host itself as the device, no adb involved
    #[arg(long, conflicts_with_all = ["serial", "adb"], help_heading = "Device selection")]
    local: bool,

    /// Path to the adb executable
    #[arg(long, value_name = "PATH", help_heading = "Device selection")]
    adb: Option<PathBuf>,

    // Command channel
    /// Refuse commands that have a structured alternative instead of only warning about them
    #[arg(long, help_heading = "Command channel")]
    strict: bool,

    /// Log the output of every device command
    #[arg(long, help_heading = "Command channel")]
    log_results: bool,

    /// Timeout of device commands that don't set their own
    ///
    /// This option accepts a human readable duration, e.g. "500ms", "20s", "2min" etc.
    #[arg(
        long,
        default_value = "20s",
        value_name = "DELAY",
        value_parser = humantime::parse_duration,
        help_heading = "Command channel"
    )]
    command_timeout: Duration,

    // Progress & output
    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "PATH", help_heading = "Advanced settings")]
    debug_log_file: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Run a shell command on the device and print its output
    Shell(ShellArgs),
    /// Push files or directories to the device, transferring only what changed
    Push(PushArgs),
    /// Wait for a line matching a pattern to show up in the device log
    WaitLog(WaitLogArgs),
    /// Record the device log for a while, then print or search the recording
    RecordLog(RecordLogArgs),
}

#[derive(clap::Args, Debug, Clone)]
struct ShellArgs {
    /// Fail unless the command exits with status 0
    #[arg(long, conflicts_with = "root")]
    status: bool,

    /// Run the command as root
    #[arg(long)]
    root: bool,

    /// Timeout of this command, defaults to --command-timeout
    #[arg(long, value_name = "DELAY", value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Command to run, joined with spaces
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[derive(clap::Args, Debug, Clone)]
struct PushArgs {
    /// List the files that differ from the device without transferring anything
    #[arg(long, help_heading = "Push options")]
    dry_run: bool,

    /// With --dry-run, treat any device file with identical content as present, wherever it lives
    #[arg(long, requires = "dry_run", help_heading = "Push options")]
    ignore_filenames: bool,

    /// Above this many changed files everything is pushed in one bulk transfer
    #[arg(long, default_value = "50", value_name = "N", help_heading = "Push options")]
    max_individual_pushes: usize,

    /// Above this share of changed bytes everything is pushed in one bulk transfer
    #[arg(long, default_value = "0.5", value_name = "RATIO", help_heading = "Push options")]
    bulk_ratio: f64,

    /// Timeout of a single transfer
    #[arg(
        long,
        default_value = "30min",
        value_name = "DELAY",
        value_parser = humantime::parse_duration,
        help_heading = "Push options"
    )]
    push_timeout: Duration,

    /// Number of retries of a failed transfer, sleeping 5s, 10s, 15s... in between
    #[arg(long, default_value = "3", value_name = "N", help_heading = "Push options")]
    retries: usize,

    /// Host build of the `hashsum` content hasher, looked up next to devctl and in PATH when unset
    #[arg(long, value_name = "PATH", help_heading = "Content hasher")]
    hasher: Option<PathBuf>,

    /// Device directory the content hasher is installed into
    #[arg(
        long,
        default_value = "/data/local/tmp/devsync",
        value_name = "DIR",
        help_heading = "Content hasher"
    )]
    hasher_dir: String,

    /// Source path(s) and destination path; with several sources the destination is a directory
    #[arg(required = true, num_args = 2..)]
    paths: Vec<String>,
}

#[derive(clap::Args, Debug, Clone)]
struct LogArgs {
    /// Clear the device log before starting
    #[arg(long, help_heading = "Log options")]
    clear: bool,

    /// Log filter spec (can be specified multiple times), e.g. "chromium:I" or "*:S"
    #[arg(long = "filter", value_name = "SPEC", action = clap::ArgAction::Append, help_heading = "Log options")]
    filters: Vec<String>,

    /// Command line of the log tail process, split on whitespace; no default filters are added
    #[arg(long, value_name = "CMD", help_heading = "Log options")]
    log_command: Option<String>,

    /// Shell command writing a synchronization marker into the log; "{marker}" is replaced
    #[arg(long, value_name = "CMD", help_heading = "Log options")]
    marker_command: Option<String>,

    /// Log is read through a pseudo-terminal, with "\r\n" line endings
    #[arg(long, help_heading = "Log options")]
    pty: bool,
}

impl LogArgs {
    fn settings(&self) -> LogSettings {
        let mut settings = LogSettings::default();
        if let Some(command) = &self.log_command {
            settings.tail_args = command.split_whitespace().map(str::to_string).collect();
            settings.default_filters.clear();
            settings.marker_filter = None;
        }
        if let Some(command) = &self.marker_command {
            settings.marker_command = command.clone();
        }
        if self.pty {
            settings.framing = LineFraming::Pty;
        }
        settings
    }
}

#[derive(clap::Args, Debug, Clone)]
struct WaitLogArgs {
    #[command(flatten)]
    log: LogArgs,

    /// Give up after this long
    #[arg(long, default_value = "10s", value_name = "DELAY", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// Fail as soon as a line matching this pattern shows up
    #[arg(long, value_name = "REGEX")]
    error_pattern: Option<String>,

    /// Append every log line read while waiting to this file
    #[arg(long, value_name = "PATH")]
    mirror: Option<PathBuf>,

    /// Pattern to wait for
    pattern: String,
}

#[derive(clap::Args, Debug, Clone)]
struct RecordLogArgs {
    #[command(flatten)]
    log: LogArgs,

    /// How long to record; Ctrl-C stops early
    #[arg(long, default_value = "10s", value_name = "DELAY", value_parser = humantime::parse_duration)]
    duration: Duration,

    /// Only print entries whose message contains this text
    #[arg(long, value_name = "TEXT", help_heading = "Search")]
    message: Option<String>,

    /// Only print entries of this thread id
    #[arg(long, value_name = "TID", help_heading = "Search")]
    tid: Option<u32>,

    /// Only print entries of this process id
    #[arg(long, value_name = "PID", help_heading = "Search")]
    pid: Option<u32>,

    /// Only print entries of this level, e.g. E
    #[arg(long, value_name = "LEVEL", help_heading = "Search")]
    level: Option<char>,

    /// Only print entries of this component (log tag)
    #[arg(long, value_name = "TAG", help_heading = "Search")]
    component: Option<String>,

    /// Print matching entries as JSON
    #[arg(long, help_heading = "Search")]
    json: bool,
}

impl RecordLogArgs {
    /// Search criteria, `None` when the whole recording should be printed.
    fn query(&self) -> Option<RecordQuery> {
        let query = RecordQuery {
            message: self.message.clone().unwrap_or_default(),
            thread_id: self.tid,
            proc_id: self.pid,
            log_level: self.level,
            component: self.component.clone(),
        };
        let searching = self.message.is_some()
            || query.thread_id.is_some()
            || query.proc_id.is_some()
            || query.log_level.is_some()
            || query.component.is_some();
        (searching || self.json).then_some(query)
    }
}

#[instrument(skip(channel))]
async fn shell<T: Transport>(channel: &Channel<T>, args: ShellArgs) -> Result<String> {
    let command = args.command.join(" ");
    let timeout = args.timeout.unwrap_or(channel.settings().default_timeout);
    if args.status {
        let result = channel.run_with_status(&command, timeout).await?;
        for line in &result.output_lines {
            println!("{line}");
        }
        if !result.success() {
            return Err(anyhow!(
                "command {:?} exited with status {}",
                command,
                result.exit_status
            ));
        }
        return Ok(format!("exit status: {}", result.exit_status));
    }
    let lines = if args.root {
        channel.run_as_root(&command, timeout).await?
    } else {
        channel.run_with_timeout(&command, timeout).await?
    };
    for line in &lines {
        println!("{line}");
    }
    Ok(format!("output lines: {}", lines.len()))
}

/// Pairs every source with its device destination.
fn push_targets(paths: &[String]) -> Result<Vec<(PathBuf, String)>> {
    let (dst, srcs) = paths
        .split_last()
        .ok_or_else(|| anyhow!("You must specify at least one source and destination path!"))?;
    if let [src] = srcs {
        return Ok(vec![(PathBuf::from(src), dst.clone())]);
    }
    srcs.iter()
        .map(|src| {
            let name = Path::new(src)
                .file_name()
                .with_context(|| format!("Source {src:?} has no file name"))?;
            let device_path = format!("{}/{}", dst.trim_end_matches('/'), name.to_string_lossy());
            Ok((PathBuf::from(src), device_path))
        })
        .collect()
}

#[instrument(skip(channel))]
async fn push<T: Transport>(channel: &Channel<T>, args: PushArgs) -> Result<String> {
    let settings = devsync::PushSettings {
        max_individual_pushes: args.max_individual_pushes,
        bulk_ratio: args.bulk_ratio,
        push_timeout: args.push_timeout,
        retry: common::retry::RetryPolicy {
            max_retries: args.retries,
            ..common::retry::RetryPolicy::push()
        },
        hasher: devsync::HasherSettings {
            host_dist: args.hasher.clone(),
            device_dir: args.hasher_dir.clone(),
            wrapper: None,
        },
        ..Default::default()
    };
    let mut pusher = devsync::Pusher::new(settings);
    let mut report = vec![];
    for (host_path, device_path) in push_targets(&args.paths)? {
        if args.dry_run {
            let changed = pusher
                .get_files_changed(channel, &host_path, &device_path, args.ignore_filenames)
                .await?;
            for pending in &changed {
                println!("{} -> {}", pending.host_path.display(), pending.device_path);
            }
            report.push(format!("{}: {} files differ", host_path.display(), changed.len()));
            continue;
        }
        let summary = pusher.push(channel, &host_path, &device_path).await?;
        tracing::info!("pushed {:?} to {}: {}", host_path, device_path, summary.strategy);
        report.push(format!("{} -> {}\n{}", host_path.display(), device_path, summary));
    }
    let (potential, actual) = pusher.push_size_info();
    report.push(format!(
        "bytes considered: {}\nbytes transferred: {}",
        bytesize::ByteSize(potential),
        bytesize::ByteSize(actual)
    ));
    Ok(report.join("\n\n"))
}

#[instrument(skip(channel))]
async fn wait_log<T: Transport>(channel: &Channel<T>, args: WaitLogArgs) -> Result<String> {
    let success = regex::Regex::new(&args.pattern)
        .with_context(|| format!("invalid pattern {:?}", args.pattern))?;
    let error = args
        .error_pattern
        .as_deref()
        .map(regex::Regex::new)
        .transpose()
        .context("invalid error pattern")?;
    let mut monitor = LogMonitor::new(LogSettings {
        mirror: args.mirror.clone(),
        ..args.log.settings()
    });
    monitor
        .start_monitoring(channel, args.log.clear, &args.log.filters)
        .await?;
    let options = WaitOptions {
        timeout: args.timeout,
        clear: false,
    };
    let res = monitor
        .wait_for_match(channel, &success, error.as_ref(), &options)
        .await;
    monitor.stop_monitoring().await;
    match res? {
        Some(line) => {
            println!("{line}");
            Ok(format!("matched: {}", args.pattern))
        }
        None => Err(anyhow!(
            "error pattern {:?} showed up in the device log",
            args.error_pattern.unwrap_or_default()
        )),
    }
}

#[instrument(skip(channel))]
async fn record_log<T: Transport>(channel: &Channel<T>, args: RecordLogArgs) -> Result<String> {
    let mut recorder = LogRecorder::new(args.log.settings());
    recorder
        .start(channel, args.log.clear, &args.log.filters)
        .await?;
    tokio::select! {
        _ = tokio::time::sleep(args.duration) => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted, stopping the recording"),
    }
    let record = recorder.stop().await?;
    let Some(query) = args.query() else {
        print!("{record}");
        return Ok(format!("recorded lines: {}", record.lines().count()));
    };
    let entries = logcat::search_record(&record, &query);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for entry in &entries {
            println!(
                "{} {} {} {}: {}",
                entry.thread_id, entry.proc_id, entry.log_level, entry.component, entry.message
            );
        }
    }
    Ok(format!("matching entries: {}", entries.len()))
}

async fn dispatch<T: Transport>(channel: Channel<T>, command: Command) -> Result<String> {
    match command {
        Command::Shell(args) => shell(&channel, args).await,
        Command::Push(args) => push(&channel, args).await,
        Command::WaitLog(args) => wait_log(&channel, args).await,
        Command::RecordLog(args) => record_log(&channel, args).await,
    }
}

#[instrument]
async fn async_main(args: Args) -> Result<String> {
    let settings = ChannelSettings {
        strict: args.strict,
        log_results: args.log_results,
        default_timeout: args.command_timeout,
    };
    if args.local {
        return dispatch(Channel::new(LocalTransport::new(), settings), args.command).await;
    }
    let mut transport = AdbTransport::new(args.serial);
    if let Some(adb) = args.adb {
        transport = transport.with_adb_path(adb);
    }
    dispatch(Channel::new(transport, settings), args.command).await
}

fn main() -> Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let tracing = common::TracingConfig {
        debug_log_file: args.debug_log_file,
    };
    let res = common::run(output, runtime, tracing, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
