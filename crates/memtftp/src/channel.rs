//! Transfer channels: one ephemeral UDP endpoint bound to one client for the
//! lifetime of one transfer.
//!
//! RFC 1350 identifies a transfer by the port pair in use (the TID). Packets
//! arriving on a transfer's socket from any other port are answered with an
//! "Unknown transfer ID" error and otherwise ignored.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::audit::AuditLogger;
use crate::config::DeadlinePolicy;
use crate::error::{Result, TftpError};
use crate::packet::{ErrorCode, encode_error};

/// The capability set a transfer state machine needs from its socket.
#[async_trait]
pub trait TransferChannel: Send + Sync {
    /// Send one datagram to the channel's remote address. No retry.
    async fn send(&self, packet: &[u8]) -> Result<()>;

    /// Wait for the next datagram until `deadline`. Returns the received
    /// length and whoever sent it. A deadline already in the past is a
    /// timeout even when a datagram is queued.
    async fn recv_until(&self, buf: &mut [u8], deadline: Instant) -> Result<(usize, SocketAddr)>;

    /// The deadline the next wait on this channel is bound by.
    fn next_deadline(&self) -> Instant;

    fn remote_addr(&self) -> SocketAddr;

    /// A one-off channel on the same local endpoint addressed to `peer`.
    fn redirect(&self, peer: SocketAddr) -> Self
    where
        Self: Sized;

    /// Wait for the next datagram, bounded by the channel deadline.
    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let deadline = self.next_deadline();
        self.recv_until(buf, deadline).await
    }
}

/// Production channel over a bound tokio UDP socket.
#[derive(Debug, Clone)]
pub struct UdpTransferChannel {
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    timeout: Duration,
    /// Fixed absolute deadline under [`DeadlinePolicy::Transfer`].
    deadline: Option<Instant>,
}

impl UdpTransferChannel {
    /// Bind a fresh ephemeral socket on `local_ip` for a transfer with `remote`.
    pub async fn bind(
        local_ip: std::net::IpAddr,
        remote: SocketAddr,
        timeout: Duration,
        policy: DeadlinePolicy,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::new(local_ip, 0)).await?;
        Ok(Self::new(Arc::new(socket), remote, timeout, policy))
    }

    pub fn new(
        socket: Arc<UdpSocket>,
        remote: SocketAddr,
        timeout: Duration,
        policy: DeadlinePolicy,
    ) -> Self {
        let deadline = match policy {
            DeadlinePolicy::Transfer => Some(Instant::now() + timeout),
            DeadlinePolicy::Receive => None,
        };
        Self {
            socket,
            remote,
            timeout,
            deadline,
        }
    }

    pub fn socket(&self) -> &Arc<UdpSocket> {
        &self.socket
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl TransferChannel for UdpTransferChannel {
    async fn send(&self, packet: &[u8]) -> Result<()> {
        self.socket.send_to(packet, self.remote).await?;
        Ok(())
    }

    async fn recv_until(&self, buf: &mut [u8], deadline: Instant) -> Result<(usize, SocketAddr)> {
        // An expired deadline wins over a datagram already queued.
        if Instant::now() >= deadline {
            return Err(TftpError::Timeout);
        }
        match tokio::time::timeout_at(deadline, self.socket.recv_from(buf)).await {
            Ok(received) => Ok(received?),
            Err(_) => Err(TftpError::Timeout),
        }
    }

    fn next_deadline(&self) -> Instant {
        self.deadline
            .unwrap_or_else(|| Instant::now() + self.timeout)
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn redirect(&self, peer: SocketAddr) -> Self {
        Self {
            socket: Arc::clone(&self.socket),
            remote: peer,
            timeout: self.timeout,
            deadline: self.deadline,
        }
    }
}

/// Receive the next datagram from the transfer's own peer.
///
/// Datagrams whose source port differs from the established TID are answered
/// with `UnknownTransferId` on a redirected channel and dropped. The wait for
/// the legitimate peer keeps the deadline fixed on entry, so strays cannot
/// extend it.
pub async fn recv_from_peer<C: TransferChannel>(
    channel: &C,
    buf: &mut [u8],
    audit_enabled: bool,
) -> Result<usize> {
    let expected = channel.remote_addr();
    let deadline = channel.next_deadline();

    loop {
        let (len, sender) = channel.recv_until(buf, deadline).await?;
        if sender.port() == expected.port() {
            return Ok(len);
        }

        warn!(
            expected = %expected,
            stray = %sender,
            "Packet from unknown transfer ID"
        );
        if audit_enabled {
            AuditLogger::unknown_transfer_id(expected, sender);
        }

        let stray = channel.redirect(sender);
        let reply = encode_error(
            ErrorCode::UnknownTransferId,
            &TftpError::UnexpectedPeer(sender).to_string(),
        );
        if let Err(e) = stray.send(&reply).await {
            debug!(stray = %sender, "Failed to reject stray packet: {}", e);
        }
    }
}
