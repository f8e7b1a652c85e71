use anyhow::Context;
use bucketsync::storage::{gcs::DEFAULT_ENDPOINT, GcsClient};
use bucketsync::{execute, Direction, TransferConfig};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "bucketsync")]
#[command(about = "Upload files to, or download files from, a Cloud Storage bucket", long_about = None)]
#[command(version)]
struct Args {
    /// Path, directory or comma-separated glob patterns to upload
    /// (download: bucket[/prefix] to list)
    #[arg(short, long, env = "PLUGIN_SOURCE")]
    source: String,

    /// Comma-separated patterns of files to skip
    #[arg(short, long, env = "PLUGIN_IGNORE", default_value = "")]
    ignore: String,

    /// Destination bucket[/prefix] (download: local directory)
    #[arg(short, long, env = "PLUGIN_TARGET", default_value = "")]
    target: String,

    /// Extra key segment appended after the target prefix
    #[arg(long, env = "PLUGIN_FOLDER", default_value = "")]
    folder: String,

    /// Download objects instead of uploading files
    #[arg(long, env = "PLUGIN_DOWNLOAD")]
    download: bool,

    /// Access rules as entity:role (comma-separated)
    #[arg(long, env = "PLUGIN_ACL", value_delimiter = ',')]
    acl: Vec<String>,

    /// File extensions to gzip before upload (comma-separated, e.g. "js,css")
    #[arg(long, env = "PLUGIN_GZIP", value_delimiter = ',')]
    gzip: Vec<String>,

    /// Cache-Control header stored on every object
    #[arg(long, env = "PLUGIN_CACHE_CONTROL", default_value = "")]
    cache_control: String,

    /// Custom metadata as a JSON object of strings
    #[arg(long, env = "PLUGIN_METADATA", default_value = "")]
    metadata: String,

    /// OAuth2 bearer token for the storage API
    #[arg(long, env = "PLUGIN_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Storage API base URL
    #[arg(long, env = "PLUGIN_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("bucketsync={}", log_level))
        .init();

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("❌ Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every file transferred.
async fn run(args: Args) -> anyhow::Result<bool> {
    let started = Instant::now();
    let config = TransferConfig {
        source: args.source,
        ignore: args.ignore,
        target: args.target,
        folder: args.folder,
        acl: args.acl,
        gzip: args.gzip,
        cache_control: args.cache_control,
        metadata: TransferConfig::parse_metadata(&args.metadata)?,
        direction: if args.download {
            Direction::Download
        } else {
            Direction::Upload
        },
    };
    config.validate()?;

    info!("🚀 bucketsync {:?}", config.direction);
    info!("Source: {}", config.source);
    info!("Target: {}", config.target);

    let store = Arc::new(
        GcsClient::new(&args.endpoint, args.token).context("failed to create storage client")?,
    );
    let report = execute(&config, store, progress_bar()?)
        .await
        .context("transfer failed")?;

    let elapsed = humantime::format_duration(std::time::Duration::from_secs(
        started.elapsed().as_secs(),
    ));
    if report.is_success() {
        info!(
            "✅ {} file(s) transferred in {}",
            report.succeeded(),
            elapsed
        );
    } else {
        error!(
            "❌ {} file(s) failed, {} transferred in {}",
            report.failures().count(),
            report.succeeded(),
            elapsed
        );
    }
    Ok(report.is_success())
}

/// A progress bar on stderr, hidden when stderr is not a terminal.
fn progress_bar() -> anyhow::Result<ProgressBar> {
    if !atty::is(atty::Stream::Stderr) {
        return Ok(ProgressBar::hidden());
    }
    let progress_bar = ProgressBar::new(0);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg} | {elapsed_precise} elapsed")?
            .progress_chars("█▓▒░ "),
    );
    Ok(progress_bar)
}
