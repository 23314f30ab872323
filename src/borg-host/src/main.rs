//! borgd - the Borg plugin host.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use borg_host::{HostConfig, run_with_shutdown};

/// Borg plugin host
#[derive(Parser)]
#[command(name = "borgd")]
#[command(about = "Hosts Borg plugins and routes chat messages to their commands")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "BORG_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address for the host API
    #[arg(short, long)]
    listen: Option<String>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,

    /// Plugin executable to load at startup (repeatable)
    #[arg(long = "plugin", value_name = "PATH")]
    plugins: Vec<PathBuf>,

    /// Do not load the built-in plugins
    #[arg(long)]
    no_builtins: bool,
}

fn setup_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // stdout belongs to the console tenant
    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(args: &Args) -> anyhow::Result<HostConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config = HostConfig::load(path)?;
            config.apply_env(|name| std::env::var(name).ok())?;
            config
        }
        None => HostConfig::from_env()?,
    };

    if let Some(listen) = &args.listen {
        config.listen_addr = listen.clone();
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json = true;
    }
    config.plugins.extend(args.plugins.iter().cloned());
    if args.no_builtins {
        config.builtin_plugins.clear();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("borgd: invalid configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    setup_logging(&config.logging.level, config.logging.json);

    info!("Starting borgd on {}", config.listen_addr);
    info!("Press Ctrl+C to stop");

    let shutdown = async {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, unloading plugins..."),
            _ = terminate => info!("Received SIGTERM, unloading plugins..."),
        }
    };

    if let Err(e) = run_with_shutdown(config, shutdown).await {
        error!("Host error: {:#}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
