use bytes::BytesMut;
use tracing::debug;

use super::{TransferOptions, TransferSummary, client_abort, reject};
use crate::audit::AuditLogger;
use crate::channel::{TransferChannel, recv_from_peer};
use crate::error::{Result, TftpError};
use crate::packet::{MAX_PACKET_SIZE, OCTET_MODE, decode_data, encode_ack};
use crate::store::MemoryStore;

/// Serve a write request: acknowledge block 0, then accept DATA blocks in
/// order until a short block arrives, and store the assembled blob.
///
/// A block other than the next expected one is answered by re-sending the
/// last ACK; its payload is dropped. Future blocks are never buffered.
/// Nothing reaches the store unless the transfer completes.
pub async fn serve_write<C: TransferChannel>(
    channel: &C,
    store: &MemoryStore,
    filename: &str,
    mode: &str,
    options: &TransferOptions,
) -> Result<TransferSummary> {
    if mode != OCTET_MODE {
        return Err(reject(channel, TftpError::UnsupportedMode(mode.to_string())).await);
    }

    channel.send(&encode_ack(0)).await?;

    let mut received = BytesMut::new();
    let mut last_acked: u16 = 0;
    let mut blocks: u64 = 0;
    let mut buf = [0u8; MAX_PACKET_SIZE];

    loop {
        let len = recv_from_peer(channel, &mut buf, options.audit_enabled).await?;

        // A client ERROR ends the transfer silently instead of drawing an
        // IllegalOperation reply; RFC 1350 errors are never acknowledged.
        if let Some(aborted) = client_abort(&buf[..len]) {
            return Err(aborted);
        }

        let data = match decode_data(&buf, len) {
            Ok(data) => data,
            Err(e) => return Err(reject(channel, e).await),
        };

        let expected = last_acked.wrapping_add(1);
        if data.block != expected {
            debug!(
                block = data.block,
                expected, "Out of order DATA, re-sending last ACK"
            );
            channel.send(&encode_ack(last_acked)).await?;
            continue;
        }

        let limit = options.max_file_size_bytes;
        if limit > 0 && (received.len() + data.payload.len()) as u64 > limit {
            if options.audit_enabled {
                AuditLogger::file_size_limit_exceeded(channel.remote_addr(), filename, limit);
            }
            return Err(reject(channel, TftpError::FileTooLarge { limit }).await);
        }

        received.extend_from_slice(data.payload);
        channel.send(&encode_ack(data.block)).await?;
        debug!(block = data.block, bytes = data.payload.len(), "Acknowledged DATA");

        last_acked = data.block;
        blocks += 1;

        if data.is_final() {
            break;
        }
    }

    let summary = TransferSummary {
        bytes: received.len() as u64,
        blocks,
    };
    store.put(filename, received.freeze()).await;
    Ok(summary)
}
