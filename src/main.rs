use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use prometheus::Registry;
use tracing_subscriber::{fmt, EnvFilter};

use probeoor::client::http::HttpClient;
use probeoor::config::Config;
use probeoor::export::MetricsServer;
use probeoor::probe::WriteReadSeriesProbe;
use probeoor::runner::Runner;

/// Continuous correctness prober for Prometheus-compatible TSDBs.
#[derive(Parser)]
#[command(name = "probeoor", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

/// Build-time version info, injected via RUSTFLAGS or build.rs.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // The version subcommand needs neither logging nor a config file.
    if let Some(Command::Version) = &cli.command {
        println!("probeoor {}", version::full());
        return Ok(());
    }

    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;
    fmt().with_env_filter(filter).with_target(true).init();

    let config_path = cli
        .config
        .context("--config is required (use --help for usage)")?;
    let cfg = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "probeoor starting",
    );

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?
        .block_on(run(cfg))
}

async fn run(cfg: Config) -> Result<()> {
    let registry = Registry::new();

    // Serve metrics before probing begins so scrapes never miss.
    let server = MetricsServer::new(registry.clone(), &cfg.metrics.addr);
    server.start().await.context("starting metrics server")?;

    let client = HttpClient::new(&cfg.remote).context("building remote client")?;
    let probe = WriteReadSeriesProbe::new(cfg.test.clone(), client, &registry)
        .context("building write/read prober")?;

    let runner = Runner::new(probe, cfg.test.run_interval, cfg.test.smoke_test);

    // Tie process signals to the runner's own cancellation token: the
    // run loop stops after its current iteration.
    let cancel = runner.cancel_token();
    tokio::spawn(async move {
        shutdown_requested().await;
        cancel.cancel();
    });

    let result = runner.run().await;

    server.stop().await?;

    tracing::info!("probeoor stopped");

    result
}

/// Resolves once the process receives SIGINT or SIGTERM.
async fn shutdown_requested() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("installing SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(signal = "SIGINT", "shutdown requested");
        }
        _ = sigterm.recv() => {
            tracing::info!(signal = "SIGTERM", "shutdown requested");
        }
    }
}
