// Licensed under the Apache-2.0 license

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use log::{debug, trace, warn};
use se_host::transport::{copy_response, TransportError, TransportResult};
use se_host::Transport;

const RECEIVE_BUFFER_SIZE: usize = 4096;

/// UDP link to a simulated device; one datagram per frame
pub struct UdpTransport {
    socket: Option<UdpSocket>,
    server_addr: SocketAddr,
    bind_addr: SocketAddr,
    timeout: Duration,
    buffer: Vec<u8>,
}

impl UdpTransport {
    pub fn new(server_addr: SocketAddr) -> Self {
        Self {
            socket: None,
            server_addr,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            timeout: Duration::from_secs(2),
            buffer: vec![0u8; RECEIVE_BUFFER_SIZE],
        }
    }

    pub fn with_bind_addr(mut self, bind_addr: SocketAddr) -> Self {
        self.bind_addr = bind_addr;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }
}

impl Transport for UdpTransport {
    fn open(&mut self) -> TransportResult<()> {
        let socket = UdpSocket::bind(self.bind_addr)
            .map_err(|_| TransportError::OpenFailed(Some("bind failed")))?;
        socket
            .set_read_timeout(Some(self.timeout))
            .map_err(|_| TransportError::ConfigurationError("read timeout"))?;
        debug!("UDP transport to {} opened", self.server_addr);
        self.socket = Some(socket);
        Ok(())
    }

    fn close(&mut self) -> TransportResult<()> {
        self.socket = None;
        Ok(())
    }

    fn transceive(&mut self, tx: &[u8], rx: &mut [u8]) -> TransportResult<usize> {
        let socket = self.socket.as_ref().ok_or(TransportError::Closed)?;

        socket
            .send_to(tx, self.server_addr)
            .map_err(|_| TransportError::SendFailed(None))?;
        trace!("Sent {} bytes to {}", tx.len(), self.server_addr);

        loop {
            let (received, from) = match socket.recv_from(&mut self.buffer) {
                Ok(received) => received,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(TransportError::Timeout);
                }
                Err(_) => return Err(TransportError::ReceiveFailed(None)),
            };
            if from != self.server_addr {
                warn!("Ignoring datagram from {}", from);
                continue;
            }
            return copy_response(&self.buffer[..received], rx);
        }
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }
}
