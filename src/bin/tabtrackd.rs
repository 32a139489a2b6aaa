//! tabtrack daemon - browser session boundaries and productivity tracking
//!
//! The browser adapter runs this binary and talks to it over stdio:
//! newline-delimited JSON requests on stdin, replies and lifecycle events on
//! stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Track sessions with the default config and state file
//! tabtrackd
//!
//! # Custom config, state kept in memory only
//! tabtrackd --config ~/.config/tabtrack/config.toml --no-persist
//!
//! # Validate a config file and print the effective settings
//! tabtrackd check-config ~/.config/tabtrack/config.toml
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio::io::{BufReader, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tabtrack_core::TrackingConfig;
use tabtrackd::{run_ingest, spawn_tracker, JsonFileStore, SessionStore};

/// How long to wait for blocked stdin reads when shutting down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// tabtrack daemon - browser session tracker
#[derive(Parser, Debug)]
#[command(name = "tabtrackd", version, about, args_conflicts_with_subcommands = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a config file and print the effective settings
    CheckConfig {
        /// Path to the TOML config
        path: PathBuf,
    },
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    /// Tracking config (TOML); built-in defaults when absent
    #[arg(short, long, env = "TABTRACK_CONFIG")]
    config: Option<PathBuf>,

    /// State file (default: <state dir>/tabtrack/state.json)
    #[arg(long, env = "TABTRACK_STATE")]
    state: Option<PathBuf>,

    /// Keep sessions in memory only
    #[arg(long, conflicts_with = "state")]
    no_persist: bool,
}

fn default_state_path() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("tabtrack")
        .join("state.json")
}

fn load_config(path: Option<&Path>) -> Result<TrackingConfig> {
    let Some(path) = path else {
        return Ok(TrackingConfig::default());
    };
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    TrackingConfig::from_toml_str(&content)
        .with_context(|| format!("Invalid config {}", path.display()))
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Some(Command::CheckConfig { path }) => {
            let config = load_config(Some(&path))?;
            println!("Config OK: {}", path.display());
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        None => run(args.run),
    }
}

fn run(args: RunArgs) -> Result<()> {
    init_logging()?;

    let config = load_config(args.config.as_deref())?;
    let store: Option<Arc<dyn SessionStore>> = if args.no_persist {
        None
    } else {
        let path = args.state.unwrap_or_else(default_state_path);
        info!(path = %path.display(), "Using state file");
        Some(Arc::new(JsonFileStore::new(path)))
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let result = runtime.block_on(serve(config, store));
    // stdin reads block a pool thread that never returns on its own.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

fn init_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tabtrackd=info".parse()?)
                .add_directive("tabtrack_core=info".parse()?)
                .add_directive("tabtrack_protocol=info".parse()?),
        )
        .init();
    Ok(())
}

async fn serve(config: TrackingConfig, store: Option<Arc<dyn SessionStore>>) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        enabled = config.enable_session_tracking,
        "tabtrack daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let tracker = spawn_tracker(config, store).context("Failed to start tracker")?;
    let session = tracker
        .initialize()
        .await
        .context("Failed to initialize tracker")?;
    info!(session_id = ?session.as_ref().map(|id| id.as_str()), "Tracker ready");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = BufWriter::new(tokio::io::stdout());
    let ingest = run_ingest(stdin, &mut stdout, tracker.clone(), cancel_token).await;

    if let Err(e) = tracker.shutdown().await {
        warn!(error = %e, "Tracker already stopped");
    }

    let summary = ingest.context("Adapter stream failed")?;
    info!(
        messages = summary.messages,
        rejected = summary.rejected,
        "tabtrack daemon stopped"
    );
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
