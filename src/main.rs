//! netlab daemon binary
//!
//! Loads configuration, binds the control listener, and runs the
//! orchestration engine until a shutdown signal arrives.

use clap::Parser;
use netlab::{Config, Daemon, NullHookRunner, NullProvisioner, NullServiceRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Network emulation control-plane daemon
#[derive(Parser, Debug)]
#[command(name = "netlabd", version, about)]
struct Args {
    /// Path to configuration file (overrides default search paths)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides configuration)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Control-channel port (overrides configuration)
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let args = Args::parse();

    info!("netlabd starting");

    let (mut config, loaded_paths) = if let Some(config_path) = &args.config {
        match Config::load_file(config_path) {
            Ok(config) => (config, vec![config_path.clone()]),
            Err(e) => {
                error!("Failed to load configuration from {}: {}", config_path.display(), e);
                std::process::exit(1);
            }
        }
    } else {
        match Config::load() {
            Ok(result) => result,
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        }
    };

    if loaded_paths.is_empty() {
        info!("No config files found, using defaults");
    } else {
        for path in &loaded_paths {
            info!(path = %path.display(), "Loaded config file");
        }
    }

    if args.listen.is_some() {
        config.daemon.listen_addr = args.listen;
    }
    if args.port.is_some() {
        config.daemon.port = args.port;
    }

    for server in &config.servers {
        info!(name = %server.name, endpoint = %server.endpoint(), "Emulation server configured");
    }

    let daemon = match Daemon::new(
        config.clone(),
        Arc::new(NullProvisioner::default()),
        Arc::new(NullServiceRegistry),
        Arc::new(NullHookRunner),
    ) {
        Ok(daemon) => daemon,
        Err(e) => {
            error!("Failed to create daemon: {}", e);
            std::process::exit(1);
        }
    };

    info!(addr = %config.daemon.bind_addr(), "Listening for control channels");

    tokio::select! {
        result = daemon.run() => {
            if let Err(e) = result {
                error!("Daemon exited with error: {}", e);
                std::process::exit(1);
            }
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
        }
    }

    info!("netlabd shutdown complete");
}
