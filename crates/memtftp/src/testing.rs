// In-memory TransferChannel for driving the state machines without sockets.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::channel::TransferChannel;
use crate::error::{Result, TftpError};

/// Replays canned inbound datagrams and records every send. Once the script
/// runs dry, `recv` reports a timeout.
#[derive(Debug, Clone)]
pub(crate) struct ScriptedChannel {
    remote: SocketAddr,
    inbound: Arc<Mutex<VecDeque<(SocketAddr, Vec<u8>)>>>,
    sent: Arc<Mutex<Vec<(SocketAddr, Bytes)>>>,
}

impl ScriptedChannel {
    pub(crate) fn new(remote: SocketAddr) -> Self {
        Self {
            remote,
            inbound: Arc::default(),
            sent: Arc::default(),
        }
    }

    /// Queue a datagram from the channel's own peer.
    pub(crate) fn push(&self, packet: &[u8]) {
        self.push_from(self.remote, packet);
    }

    pub(crate) fn push_from(&self, from: SocketAddr, packet: &[u8]) {
        self.inbound
            .lock()
            .unwrap()
            .push_back((from, packet.to_vec()));
    }

    pub(crate) fn sent(&self) -> Vec<(SocketAddr, Bytes)> {
        self.sent.lock().unwrap().clone()
    }

    /// Packets sent to the channel's own peer, in order.
    pub(crate) fn sent_to_peer(&self) -> Vec<Bytes> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| *to == self.remote)
            .map(|(_, packet)| packet)
            .collect()
    }
}

#[async_trait]
impl TransferChannel for ScriptedChannel {
    async fn send(&self, packet: &[u8]) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((self.remote, Bytes::copy_from_slice(packet)));
        Ok(())
    }

    async fn recv_until(&self, buf: &mut [u8], _deadline: Instant) -> Result<(usize, SocketAddr)> {
        let next = self.inbound.lock().unwrap().pop_front();
        let Some((from, packet)) = next else {
            return Err(TftpError::Timeout);
        };
        let len = packet.len().min(buf.len());
        buf[..len].copy_from_slice(&packet[..len]);
        Ok((len, from))
    }

    fn next_deadline(&self) -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn redirect(&self, peer: SocketAddr) -> Self {
        Self {
            remote: peer,
            inbound: Arc::clone(&self.inbound),
            sent: Arc::clone(&self.sent),
        }
    }
}
