// Licensed under the Apache-2.0 license

//! Secure-Element Simulator Client
//!
//! Talks to a running `se-host-sim-device` over UDP through the host library.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use se_host::{Oid, Protection, RandomType};
use se_host_sim_client::{SeClient, UdpTransport, Validator};
use se_host_sim_config::SimConfig;
use simple_logger::SimpleLogger;

#[derive(Parser)]
#[command(name = "se-host-sim-client")]
#[command(about = "Drive the simulated secure element through the host library")]
#[command(version)]
struct Args {
    /// Server socket address (overrides the config file)
    #[arg(short, long)]
    server: Option<SocketAddr>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Protect commands and responses with the secure channel
    #[arg(short, long)]
    protected: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every end-to-end check
    Validate {
        /// Print one line per check
        #[arg(short, long)]
        verbose: bool,
    },
    /// Draw random bytes from the device
    Random {
        #[arg(default_value_t = 32)]
        length: u16,
    },
    /// Read a data object
    Read {
        /// Object identifier, hex
        #[arg(value_parser = parse_oid)]
        oid: Oid,
        #[arg(long, default_value_t = 0)]
        offset: u16,
        #[arg(long, default_value_t = 256)]
        length: usize,
    },
}

fn parse_oid(value: &str) -> Result<Oid, String> {
    let digits = value.trim_start_matches("0x").trim_start_matches("0X");
    Oid::from_str_radix(digits, 16).map_err(|e| format!("invalid OID {}: {}", value, e))
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

    let config = match &args.config {
        Some(path) => SimConfig::from_file(path)?,
        None => SimConfig::load_default()?,
    };
    let server = match args.server {
        Some(server) => server,
        None => config
            .network
            .server_address
            .parse()
            .with_context(|| "Invalid server address in config")?,
    };
    info!("Connecting to {}", server);

    let transport =
        UdpTransport::new(server).with_timeout(Duration::from_millis(config.network.timeout_ms));
    let mut client = SeClient::from_config(&config, Box::new(transport))?;
    if args.protected {
        client.set_protection(Protection::Full, false)?;
    }

    match args.command {
        Command::Validate { verbose } => {
            let protection = if args.protected {
                Protection::Full
            } else {
                Protection::None
            };
            let results = Validator::new()
                .with_protection(protection)
                .set_verbose(verbose)
                .run(&mut client)?;
            client.shutdown()?;
            if results.iter().all(|r| r.passed) {
                println!("All {} checks passed", results.len());
            } else {
                for failed in results.iter().filter(|r| !r.passed) {
                    println!(
                        "{} failed: {}",
                        failed.test_name,
                        failed.error_message.as_deref().unwrap_or("unknown error")
                    );
                }
                std::process::exit(1);
            }
        }
        Command::Random { length } => {
            let output = client.call(|engine, id| engine.get_random(id, RandomType::Trng, length))?;
            println!("{}", hex::encode(output.data().unwrap_or_default()));
            client.shutdown()?;
        }
        Command::Read {
            oid,
            offset,
            length,
        } => {
            let output = client.call(|engine, id| engine.read_data(id, oid, offset, length))?;
            println!("{}", hex::encode(output.data().unwrap_or_default()));
            client.shutdown()?;
        }
    }
    Ok(())
}
