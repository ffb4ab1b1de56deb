// Licensed under the Apache-2.0 license

//! UDP front end of the simulated device
//!
//! One datagram carries one frame in each direction. A dropped response is
//! simply never sent; the client sees a receive timeout.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, trace, warn};
use se_host_sim_config::SimConfig;

pub const DEFAULT_PORT: u16 = 62300;

/// Largest datagram accepted from a client
const DEFAULT_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub timeout: Option<Duration>,
    pub buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            timeout: Some(Duration::from_secs(30)),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn from_sim_config(config: &SimConfig) -> Result<Self> {
        let bind_addr: SocketAddr = config
            .network
            .bind_address
            .parse()
            .with_context(|| "Invalid bind address in config")?;
        Ok(Self {
            bind_addr,
            ..Self::default()
        })
    }
}

pub struct DeviceServer {
    socket: UdpSocket,
    buffer: Vec<u8>,
}

impl DeviceServer {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let socket = UdpSocket::bind(config.bind_addr)
            .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

        if let Some(timeout) = config.timeout {
            socket
                .set_read_timeout(Some(timeout))
                .context("Failed to set read timeout")?;
            socket
                .set_write_timeout(Some(timeout))
                .context("Failed to set write timeout")?;
        }

        info!("Simulated device listening on {}", config.bind_addr);

        Ok(Self {
            socket,
            buffer: vec![0u8; config.buffer_size],
        })
    }

    /// Serve frames forever; `handler` returns `None` to drop a response
    pub fn run<F>(&mut self, mut handler: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>>,
    {
        loop {
            if let Err(e) = self.handle_request(&mut handler) {
                warn!("Error handling request: {:#}", e);
            }
        }
    }

    /// Receive one frame and answer it
    pub fn handle_request<F>(&mut self, handler: &mut F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>>,
    {
        let (received, client_addr) = match self.socket.recv_from(&mut self.buffer) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                trace!("No request within the read timeout");
                return Ok(());
            }
            Err(e) => return Err(e).context("Failed to receive data"),
        };
        debug!("Received {} bytes from {}", received, client_addr);

        let Some(response) = handler(&self.buffer[..received]) else {
            debug!("Response to {} dropped", client_addr);
            return Ok(());
        };

        self.socket
            .send_to(&response, client_addr)
            .with_context(|| format!("Failed to send response to {}", client_addr))?;
        debug!("Sent {} byte response to {}", response.len(), client_addr);
        Ok(())
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .context("Failed to get local address")
    }
}
