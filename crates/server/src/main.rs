//! usbip-dap server
//!
//! Exports a CMSIS-DAP debug probe over USB/IP so it can be attached from a
//! remote machine with the stock `usbip` tools.

use anyhow::{Context, Result};
use clap::Parser;
use common::{PipelineStats, setup_logging};
use server::config::ServerConfig;
use server::usb::SwoTrace;
use server::{InfoProcessor, UsbIpServer, spawn_dap_worker};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "usbip-dap-server")]
#[command(
    author,
    version,
    about = "USB/IP server exporting a CMSIS-DAP debug probe"
)]
#[command(long_about = "
Exports a single CMSIS-DAP v2 debug probe over USB/IP (TCP port 3240).

EXAMPLES:
    # Run with default config
    usbip-dap-server

    # Listen on a different address
    usbip-dap-server --bind 127.0.0.1:3240

    # On the host machine
    usbip list -r <server>
    usbip attach -r <server> -b 1-1

CONFIGURATION:
    The server looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usbip-dap/server.toml
    3. /etc/usbip-dap/server.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Listen address (overrides config)
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = ServerConfig::default();
        let path = ServerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        ServerConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        ServerConfig::load_or_default()
    };

    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    if let Some(level) = args.log_level {
        config.server.log_level = level;
    }
    config.validate().context("Invalid configuration")?;

    setup_logging(&config.server.log_level).context("Failed to setup logging")?;

    info!("usbip-dap server v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", config.server.log_level);

    let stats = Arc::new(PipelineStats::new());
    let processor = InfoProcessor::new(&config.device, config.pipeline.queue_depth);
    let (pipeline, worker_handle) = spawn_dap_worker(processor, &config.pipeline, stats)
        .context("Failed to spawn DAP worker thread")?;

    let trace = config.trace.enabled.then(SwoTrace::new);

    let result = match UsbIpServer::bind(&config, pipeline, trace).await {
        Ok(server) => run(server).await,
        Err(e) => Err(e),
    };

    // The server owned the pipeline; the worker exits once it is dropped
    info!("Waiting for DAP worker to stop...");
    if let Err(e) = worker_handle.join() {
        error!("DAP worker thread panicked: {:?}", e);
    }

    info!("Server shutdown complete");
    result
}

/// Serve until Ctrl+C or a fatal server error
async fn run(server: UsbIpServer) -> Result<()> {
    info!("Press Ctrl+C to shutdown");

    tokio::select! {
        result = server.run() => result,
        signal = signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
                Err(e) => error!("Error waiting for Ctrl+C: {}", e),
            }
            Ok(())
        }
    }
}
