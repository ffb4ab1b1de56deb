// Licensed under the Apache-2.0 license

use anyhow::{anyhow, Result};
use clap::Parser;
use log::{info, LevelFilter};
use se_host_sim_config::SimConfig;
use se_host_sim_device::{DeviceServer, ServerConfig, SimDevice};
use simple_logger::SimpleLogger;

#[derive(Parser)]
#[command(name = "se-host-sim-device")]
#[command(about = "Simulated secure element served over UDP")]
struct Args {
    /// Address to bind to (overrides the config file)
    #[arg(short, long)]
    server: Option<String>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = args
        .log_level
        .parse::<LevelFilter>()
        .map_err(|e| anyhow!("Invalid log level {}: {}", args.log_level, e))?;
    SimpleLogger::new()
        .with_level(level)
        .init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;

    let mut config = match &args.config {
        Some(path) => SimConfig::from_file(path)?,
        None => SimConfig::load_default()?,
    };
    if let Some(server) = args.server {
        config.network.bind_address = server;
    }

    let mut device = SimDevice::from_config(&config)?;
    let mut server = DeviceServer::new(ServerConfig::from_sim_config(&config)?)?;
    info!("Serving on {}", server.local_addr()?);

    server.run(|frame| device.transceive(frame))
}
