//! Per-transfer state machines.
//!
//! Both directions are stop-and-wait: at most one DATA/ACK pair is in flight
//! and nothing is retransmitted. Any timeout abandons the transfer.
//!
//! Block numbers are plain `u16` counters and wrap at 65536 like the wire
//! format; transfers beyond 65535 blocks alias block numbers.

mod read;
mod write;

pub use read::serve_read;
pub use write::serve_write;

use tracing::warn;

use crate::channel::TransferChannel;
use crate::error::TftpError;
use crate::packet::{Opcode, decode_error, encode_error};

/// Settings shared by every transfer a worker runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferOptions {
    /// Largest blob a write may store. 0 disables the limit.
    pub max_file_size_bytes: u64,
    pub audit_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferSummary {
    pub bytes: u64,
    pub blocks: u64,
}

/// Send the ERROR packet matching `err`, if it has one, and hand `err` back
/// so the caller can terminate with it.
pub(crate) async fn reject<C: TransferChannel>(channel: &C, err: TftpError) -> TftpError {
    if let Some(code) = err.error_code() {
        let packet = encode_error(code, &err.to_string());
        if let Err(send_err) = channel.send(&packet).await {
            warn!(
                client = %channel.remote_addr(),
                "Failed to send ERROR packet: {}", send_err
            );
        }
    }
    err
}

/// An ERROR packet from the client ends the transfer without a reply.
pub(crate) fn client_abort(packet: &[u8]) -> Option<TftpError> {
    if Opcode::peek(packet) != Some(Opcode::Error) {
        return None;
    }
    let aborted = match decode_error(packet) {
        Ok(error) => TftpError::PeerAborted {
            code: error.code,
            message: error.message,
        },
        Err(e) => e,
    };
    Some(aborted)
}
