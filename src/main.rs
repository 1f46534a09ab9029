use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use treesync::{
    generate_tree, serve, HttpEndpoint, ProviderConfig, SyncClient, SyncConfig, SyncError,
    DEFAULT_SEED_FILES, DEFAULT_SEED_SIZE,
};

#[derive(Parser, Debug)]
#[command(name = "treesync")]
#[command(about = "Mirror a directory tree over HTTP using a content manifest", long_about = None)]
#[command(version)]
struct Args {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the manifest for a directory and serve it with its files
    Serve {
        /// Directory to publish
        #[arg(short, long, default_value = "data")]
        root: PathBuf,

        /// Where the manifest is persisted
        #[arg(short, long, default_value = "manifest.txt")]
        manifest: PathBuf,

        /// Address to listen on
        #[arg(short, long, default_value = "0.0.0.0:8080")]
        listen: SocketAddr,

        /// Fill the root with random test files before building the manifest
        #[arg(long)]
        seed: bool,
    },
    /// Fetch a provider's manifest and reconstruct its tree locally
    Sync {
        /// Provider base URL
        #[arg(short, long, default_value = "http://localhost:8080")]
        url: String,

        /// Local directory to reconstruct the tree in
        #[arg(short, long, default_value = "data")]
        output: PathBuf,

        /// Maximum number of files transferred at once
        #[arg(short, long, default_value_t = 1)]
        jobs: usize,

        /// Accept fetched files without checking them against the manifest
        #[arg(long)]
        skip_verify: bool,

        /// Attempt every file and report failures at the end instead of stopping at the first
        #[arg(long)]
        keep_going: bool,

        /// Per-request timeout (e.g. "30s", "2m")
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,

        /// Write a JSON report of every file's outcome
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("treesync={},tower_http={}", log_level, log_level))
        .init();

    let result = match args.command {
        Command::Serve {
            root,
            manifest,
            listen,
            seed,
        } => run_provider(root, manifest, listen, seed).await,
        Command::Sync {
            url,
            output,
            jobs,
            skip_verify,
            keep_going,
            timeout,
            report,
        } => {
            let config = SyncConfig {
                local_root: output,
                verify: !skip_verify,
                max_concurrent_transfers: jobs.max(1),
                fail_fast: !keep_going,
                ..Default::default()
            };
            run_fetcher(&url, config, timeout, report).await
        }
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run_provider(
    root: PathBuf,
    manifest_path: PathBuf,
    listen_addr: SocketAddr,
    seed: bool,
) -> Result<(), SyncError> {
    if seed {
        generate_tree(&root, DEFAULT_SEED_FILES, DEFAULT_SEED_SIZE)?;
    }

    let config = ProviderConfig {
        root,
        manifest_path,
        listen_addr,
    };

    serve(&config, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down");
    })
    .await
}

async fn run_fetcher(
    url: &str,
    config: SyncConfig,
    timeout: Option<Duration>,
    report_path: Option<PathBuf>,
) -> Result<(), SyncError> {
    info!("Provider: {}", url);
    info!("Output directory: {:?}", config.local_root);

    let pb = if atty::is(atty::Stream::Stderr) {
        indicatif::ProgressBar::new(0)
    } else {
        indicatif::ProgressBar::hidden()
    };
    pb.set_style(
        indicatif::ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg} | {elapsed_precise} elapsed")
            .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
            .progress_chars("█▓▒░ "),
    );

    let endpoint = HttpEndpoint::new(url, timeout)?;
    let client = SyncClient::new(endpoint, config).with_progress(pb);
    let report = client.run().await?;

    if let Some(path) = report_path {
        std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
        info!("Wrote report to {:?}", path);
    }

    let failed = report.failures().count();
    if failed > 0 {
        return Err(SyncError::Incomplete(format!(
            "{} of {} files failed",
            failed,
            report.files.len()
        )));
    }

    info!("✅ Sync completed successfully!");
    Ok(())
}
