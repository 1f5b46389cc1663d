//! Minimal octet-mode client for the server in this crate.
//!
//! The client is stop-and-wait like the server. After the first reply it
//! locks onto the server's transfer port and rejects packets from any other
//! port with "Unknown transfer ID".

use bytes::Bytes;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::channel::{TransferChannel, UdpTransferChannel, recv_from_peer};
use crate::config::DeadlinePolicy;
use crate::error::{Result, TftpError};
use crate::packet::{
    BLOCK_SIZE, MAX_PACKET_SIZE, OCTET_MODE, Opcode, decode_ack, decode_data, encode_ack,
    encode_data, encode_request,
};
use crate::transfer::client_abort;

#[derive(Debug, Clone)]
pub struct TftpClient {
    server: SocketAddr,
    timeout: Duration,
}

impl TftpClient {
    pub fn new(server: SocketAddr, timeout: Duration) -> Self {
        Self { server, timeout }
    }

    /// Download `filename`.
    ///
    /// The server ends a download whose length is a multiple of 512 without
    /// a short block, so a quiet period after a full block also completes
    /// the download.
    pub async fn get(&self, filename: &str) -> Result<Vec<u8>> {
        let request = encode_request(Opcode::ReadRequest, filename, OCTET_MODE);
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let (channel, mut len) = self.open(&request, &mut buf).await?;

        let mut blob = Vec::new();
        let mut expected: u16 = 1;

        loop {
            if let Some(aborted) = client_abort(&buf[..len]) {
                return Err(aborted);
            }

            let data = decode_data(&buf, len)?;
            if data.block == expected {
                blob.extend_from_slice(data.payload);
                channel.send(&encode_ack(data.block)).await?;
                debug!(block = data.block, bytes = data.payload.len(), "Received DATA");
                if data.is_final() {
                    return Ok(blob);
                }
                expected = expected.wrapping_add(1);
            } else {
                debug!(block = data.block, expected, "Ignoring out of order DATA");
            }

            len = match recv_from_peer(&channel, &mut buf, false).await {
                Ok(len) => len,
                Err(TftpError::Timeout) if !blob.is_empty() && blob.len() % BLOCK_SIZE == 0 => {
                    return Ok(blob);
                }
                Err(e) => return Err(e),
            };
        }
    }

    /// Upload `data` as `filename`.
    pub async fn put(&self, filename: &str, data: &[u8]) -> Result<()> {
        let request = encode_request(Opcode::WriteRequest, filename, OCTET_MODE);
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let (channel, len) = self.open(&request, &mut buf).await?;
        expect_ack(&buf[..len], 0)?;

        let mut blocks: Vec<&[u8]> = data.chunks(BLOCK_SIZE).collect();
        if data.len() % BLOCK_SIZE == 0 {
            blocks.push(&[]);
        }

        let mut block: u16 = 0;
        for payload in blocks {
            block = block.wrapping_add(1);
            channel.send(&encode_data(block, payload)).await?;

            loop {
                let len = recv_from_peer(&channel, &mut buf, false).await?;
                if expect_ack(&buf[..len], block)? {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Send the initial request and wait for the server's first reply, which
    /// fixes the transfer's remote address.
    async fn open(
        &self,
        request: &Bytes,
        buf: &mut [u8],
    ) -> Result<(UdpTransferChannel, usize)> {
        let unspecified = match self.server.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let socket = UdpSocket::bind(SocketAddr::new(unspecified, 0)).await?;
        socket.send_to(request, self.server).await?;

        let (len, peer) = tokio::time::timeout(self.timeout, socket.recv_from(buf))
            .await
            .map_err(|_| TftpError::Timeout)??;
        debug!(server = %self.server, transfer = %peer, "Server replied");

        let channel =
            UdpTransferChannel::new(Arc::new(socket), peer, self.timeout, DeadlinePolicy::Receive);
        Ok((channel, len))
    }
}

/// `Ok(true)` for the ACK of `block`, `Ok(false)` for a stale ACK.
fn expect_ack(packet: &[u8], block: u16) -> Result<bool> {
    if let Some(aborted) = client_abort(packet) {
        return Err(aborted);
    }
    let ack = decode_ack(packet)?;
    if ack.block == block {
        Ok(true)
    } else if ack.block == block.wrapping_sub(1) {
        Ok(false)
    } else {
        Err(TftpError::IllegalOperation(format!(
            "Server acknowledged block {} while block {} is in flight",
            ack.block, block
        )))
    }
}
