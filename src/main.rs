//! Preview Sandbox - live previews of uploaded front-end projects
//!
//! Run with `preview-sandbox` or `preview-sandbox --help` for usage.

use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use preview_sandbox::{APP_NAME, Reaper, SessionManager, VERSION, config::Config, server};

#[derive(Parser)]
#[command(name = APP_NAME)]
#[command(version = VERSION)]
#[command(about = "Hosts isolated, short-lived front-end project previews for iframes")]
#[command(long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Path to config file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the preview server (default)
    Serve {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to bind
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show configuration
    Config {
        /// Initialize config file with defaults
        #[arg(long)]
        init: bool,
    },
}

fn setup_logging(debug: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        // Use info level for our crate, warn for dependencies
        EnvFilter::new("info")
            .add_directive("hyper=warn".parse()?)
            .add_directive("tower_http=warn".parse()?)
            .add_directive("tokio=warn".parse()?)
    };

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;

            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(file).with_target(false))
                .with(filter)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(false))
                .with(filter)
                .init();
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn run_server(config: Config) -> Result<()> {
    config.ensure_directories()?;

    info!("Starting {} v{}", APP_NAME, VERSION);
    info!("Workspaces in {:?}", config.workspaces_dir());

    let sweep_interval = config.sweep_interval();
    let manager = Arc::new(SessionManager::with_dev_server(config));
    let reaper = Reaper::start(manager.clone(), sweep_interval);

    let served = server::serve(manager.clone(), shutdown_signal()).await;

    reaper.stop().await;
    let drained = manager.shutdown().await;
    info!("Stopped after draining {} sessions", drained);

    Ok(served?)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install color-eyre error hooks
    color_eyre::install()?;

    let cli = Cli::parse();

    // Load configuration
    let loaded = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let config = loaded.unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config, using defaults: {}", e);
        Config::default()
    });

    match cli.command {
        None => {
            setup_logging(cli.debug || config.debug, config.log_file.as_deref())?;
            run_server(config).await?;
        }

        Some(Commands::Serve { host, port }) => {
            setup_logging(cli.debug || config.debug, config.log_file.as_deref())?;

            let mut config = config;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            run_server(config).await?;
        }

        Some(Commands::Config { init }) => {
            setup_logging(cli.debug, None)?;

            let config_path = match cli.config {
                Some(path) => path,
                None => Config::config_file_path()?,
            };

            if init {
                config.save_to(&config_path)?;
                println!("Configuration initialized at {:?}", config_path);
            } else {
                println!("Configuration:");
                println!("{}", toml::to_string_pretty(&config)?);
                println!("\nConfig file: {:?}", config_path);
                println!("Workspaces dir: {:?}", config.workspaces_dir());
            }
        }
    }

    Ok(())
}
