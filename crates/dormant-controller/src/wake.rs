//! Wake-on-LAN magic packets.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;

use tokio::net::UdpSocket;
use tracing::info;

use dormant_core::MacAddress;

use crate::error::EscalationError;

pub type WakeFuture<'a> = Pin<Box<dyn Future<Output = Result<(), EscalationError>> + Send + 'a>>;

/// Sends a wake signal to a sleeping host.
pub trait WakeSender: Send + Sync {
    fn wake(&self, mac: MacAddress, target: SocketAddr) -> WakeFuture<'_>;
}

/// Six `0xff` bytes followed by the MAC repeated sixteen times.
pub fn magic_packet(mac: MacAddress) -> [u8; 102] {
    let mut packet = [0xffu8; 102];
    for chunk in packet[6..].chunks_exact_mut(6) {
        chunk.copy_from_slice(&mac.0);
    }
    packet
}

/// UDP broadcast sender.
#[derive(Debug, Clone, Copy, Default)]
pub struct MagicPacketSender;

impl MagicPacketSender {
    async fn send(mac: MacAddress, target: SocketAddr) -> Result<(), EscalationError> {
        let wake_err = |e: std::io::Error| EscalationError::Wake(e.to_string());
        let bind: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind).await.map_err(wake_err)?;
        socket.set_broadcast(true).map_err(wake_err)?;
        socket
            .send_to(&magic_packet(mac), target)
            .await
            .map_err(wake_err)?;
        info!(%mac, %target, "wake-on-lan packet sent");
        Ok(())
    }
}

impl WakeSender for MagicPacketSender {
    fn wake(&self, mac: MacAddress, target: SocketAddr) -> WakeFuture<'_> {
        Box::pin(Self::send(mac, target))
    }
}
