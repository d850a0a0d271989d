//! Live UDP telemetry source.

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use super::{Datagram, TelemetrySource};
use crate::error::{Result, SrError};
use crate::packet::MAX_PACKET_BYTES;

/// The game's default per-packet send rate.
pub const DEFAULT_SEND_RATE_HZ: f64 = 20.0;

pub struct UdpSource {
    socket: UdpSocket,
    local_addr: SocketAddr,
    buf: Box<[u8; MAX_PACKET_BYTES]>,
    peer: Option<SocketAddr>,
    send_rate_hz: f64,
}

impl UdpSource {
    /// Bind to `addr`. Failure to bind is fatal for the caller.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket =
            UdpSocket::bind(addr).await.map_err(|source| SrError::Bind { addr, source })?;
        let local_addr = socket.local_addr().map_err(|source| SrError::Bind { addr, source })?;
        info!(%local_addr, "listening for telemetry");
        Ok(Self {
            socket,
            local_addr,
            buf: Box::new([0u8; MAX_PACKET_BYTES]),
            peer: None,
            send_rate_hz: DEFAULT_SEND_RATE_HZ,
        })
    }

    pub fn with_send_rate(mut self, hz: f64) -> Self {
        if hz.is_finite() && hz > 0.0 {
            self.send_rate_hz = hz;
        }
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl TelemetrySource for UdpSource {
    async fn next_datagram(&mut self) -> Result<Option<Datagram>> {
        let (len, from) = self.socket.recv_from(&mut self.buf[..]).await.map_err(|e| {
            SrError::Source { reason: "UDP receive failed".to_string(), source: Some(e) }
        })?;

        if self.peer != Some(from) {
            if self.peer.is_none() {
                info!(peer = %from, "receiving telemetry");
            } else {
                debug!(peer = %from, "telemetry sender changed");
            }
            self.peer = Some(from);
        }

        Ok(Some(Datagram::now(self.buf[..len].to_vec())))
    }

    fn describe(&self) -> String {
        format!("udp://{}", self.local_addr)
    }

    fn send_rate_hz(&self) -> f64 {
        self.send_rate_hz
    }
}
