use tracing::debug;

use super::{TransferOptions, TransferSummary, client_abort, reject};
use crate::channel::{TransferChannel, recv_from_peer};
use crate::error::{Result, TftpError};
use crate::packet::{BLOCK_SIZE, MAX_PACKET_SIZE, OCTET_MODE, decode_ack, encode_data};
use crate::store::MemoryStore;

/// Serve a read request: stream the stored blob to the client in 512-byte
/// blocks, waiting for each block's ACK before sending the next.
///
/// The transfer ends once every byte has been acknowledged. A blob whose
/// length is an exact multiple of 512 (including an empty blob) is not
/// followed by a terminating short block.
pub async fn serve_read<C: TransferChannel>(
    channel: &C,
    store: &MemoryStore,
    filename: &str,
    mode: &str,
    options: &TransferOptions,
) -> Result<TransferSummary> {
    if mode != OCTET_MODE {
        return Err(reject(channel, TftpError::UnsupportedMode(mode.to_string())).await);
    }

    let Some(data) = store.get(filename).await else {
        return Err(reject(channel, TftpError::NotFound(filename.to_string())).await);
    };

    let mut block: u16 = 1;
    let mut offset = 0;
    let mut summary = TransferSummary::default();
    let mut buf = [0u8; MAX_PACKET_SIZE];

    while offset < data.len() {
        let end = data.len().min(offset + BLOCK_SIZE);
        channel.send(&encode_data(block, &data[offset..end])).await?;
        debug!(block, bytes = end - offset, "Sent DATA");

        let acked = await_ack(channel, block, &mut buf, options.audit_enabled).await?;

        summary.bytes += (end - offset) as u64;
        summary.blocks += 1;
        offset = end;
        block = acked.wrapping_add(1);
    }

    Ok(summary)
}

/// Wait for the ACK of `block`. Duplicate ACKs for earlier blocks are
/// skipped; anything else that is not the expected ACK fails the transfer.
async fn await_ack<C: TransferChannel>(
    channel: &C,
    block: u16,
    buf: &mut [u8],
    audit_enabled: bool,
) -> Result<u16> {
    loop {
        let len = recv_from_peer(channel, buf, audit_enabled).await?;
        let packet = &buf[..len];

        // A client ERROR ends the transfer silently instead of drawing an
        // IllegalOperation reply; RFC 1350 errors are never acknowledged.
        if let Some(aborted) = client_abort(packet) {
            return Err(aborted);
        }

        let ack = match decode_ack(packet) {
            Ok(ack) => ack,
            Err(e) => return Err(reject(channel, e).await),
        };

        if ack.block == block {
            return Ok(ack.block);
        }

        if is_earlier(ack.block, block) {
            debug!(ack = ack.block, expected = block, "Ignoring duplicate ACK");
            continue;
        }

        let err = TftpError::IllegalOperation(format!(
            "ACK for block {} while block {} is in flight",
            ack.block, block
        ));
        return Err(reject(channel, err).await);
    }
}

/// `candidate` precedes `current` in wrapping block order.
fn is_earlier(candidate: u16, current: u16) -> bool {
    let distance = current.wrapping_sub(candidate);
    distance != 0 && distance < 0x8000
}
