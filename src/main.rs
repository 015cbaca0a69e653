use anyhow::Context;
use clap::Parser;
use s3mirror::{start_s3, StoreConfig, StoreOverrides, SyncConfig, SyncHandle, SyncMode};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "s3mirror")]
#[command(about = "Mirror an S3 bucket prefix into a local directory, optionally with versioned backups", long_about = None)]
#[command(version)]
struct Args {
    /// Bucket to mirror
    #[arg(short, long)]
    bucket: String,

    /// Key prefix inside the bucket
    #[arg(short, long, default_value = "")]
    prefix: String,

    /// Local directory for the mirror
    #[arg(short, long, default_value = "./s3_mirror")]
    dir: PathBuf,

    /// Monitor (interval in seconds) or backup (interval in minutes, versioned)
    #[arg(short, long, value_enum, default_value = "monitor")]
    mode: SyncMode,

    /// Delay between cycles, in seconds (monitor) or minutes (backup)
    #[arg(short, long, default_value_t = 30)]
    interval: u64,

    /// Only mirror these extensions (comma-separated, e.g. ".pdf,.txt")
    #[arg(long, value_delimiter = ',')]
    extensions: Vec<String>,

    /// Skip MD5 hashing of downloaded files
    #[arg(long)]
    no_hash: bool,

    /// Access key (overrides AWS_ACCESS_KEY_ID)
    #[arg(long)]
    access_key_id: Option<String>,

    /// Secret key (overrides AWS_SECRET_ACCESS_KEY)
    #[arg(long)]
    secret_access_key: Option<String>,

    /// Region (overrides AWS_DEFAULT_REGION)
    #[arg(long)]
    region: Option<String>,

    /// S3-compatible endpoint (overrides S3_ENDPOINT_URL)
    #[arg(long)]
    endpoint: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing; engine events reach the terminal through the log tail instead
    let log_level = if args.verbose { "debug" } else { "info" };
    let interactive = atty::is(atty::Stream::Stderr);
    tracing_subscriber::fmt()
        .with_env_filter(format!("s3mirror={},s3mirror::activity=off", log_level))
        .with_writer(std::io::stderr)
        .with_ansi(interactive)
        .init();

    info!("🚀 s3mirror - S3 bucket mirror");
    info!("Bucket: {} (prefix: '{}')", args.bucket, args.prefix);
    info!("Mode: {:?}, every {} {}", args.mode, args.interval, args.mode.unit_name());
    info!("Local directory: {:?}", args.dir);

    let store_config = StoreConfig::from_env(StoreOverrides {
        access_key_id: args.access_key_id,
        secret_access_key: args.secret_access_key,
        region: args.region,
        endpoint: args.endpoint,
        force_path_style: None,
    })
    .context("collecting storage credentials")?;

    let config = SyncConfig {
        bucket: args.bucket,
        prefix: args.prefix,
        local_root: args.dir,
        interval: args.interval,
        mode: args.mode,
        verbose: args.verbose,
        allowed_extensions: (!args.extensions.is_empty()).then_some(args.extensions),
        compute_hash: !args.no_hash,
        ..SyncConfig::default()
    };

    let mut handle = start_s3(config, &store_config)
        .await
        .context("starting mirror task")?;

    display_until_interrupted(&mut handle, interactive).await;

    handle.stop();
    let remaining = handle.join().await.context("waiting for mirror task")?;
    for line in remaining {
        eprintln!("{}", line);
    }
    Ok(())
}

/// Polls the task's counters and log tail until Ctrl-C or the task exits.
async fn display_until_interrupted(handle: &mut SyncHandle, interactive: bool) {
    let spinner = interactive.then(|| {
        let pb = indicatif::ProgressBar::new_spinner();
        pb.set_style(
            indicatif::ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg} | {elapsed_precise} elapsed")
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Stop requested, finishing current cycle");
                break;
            }
            _ = ticker.tick() => {}
        }

        for line in handle.drain_log() {
            match &spinner {
                Some(pb) => pb.println(line),
                None => println!("{}", line),
            }
        }

        let stats = handle.stats();
        if let Some(pb) = &spinner {
            pb.set_message(format!(
                "{:?} | checked {} | downloaded {} | errors {} | cycles {}",
                handle.state(),
                stats.files_checked,
                stats.files_downloaded,
                stats.errors,
                stats.cycles_completed
            ));
        }

        if handle.is_finished() {
            break;
        }
    }

    if let Some(pb) = spinner {
        let stats = handle.stats();
        pb.finish_with_message(format!(
            "✅ {} files downloaded, {} errors over {} cycles",
            stats.files_downloaded, stats.errors, stats.cycles_completed
        ));
    }
}
