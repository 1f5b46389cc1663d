//! memtftp: a TFTP (RFC 1350, octet mode) server over an in-memory blob store.
//!
//! A single dispatcher reads the well-known UDP socket and queues raw
//! requests for a fixed pool of workers. Each worker answers its request from
//! a fresh ephemeral socket and drives a stop-and-wait read or write transfer
//! against the shared [`MemoryStore`].

pub mod audit;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod packet;
pub mod pool;
pub mod server;
pub mod store;
pub mod transfer;

#[cfg(test)]
mod testing;

pub use channel::{TransferChannel, UdpTransferChannel, recv_from_peer};
pub use client::TftpClient;
pub use config::{DeadlinePolicy, TftpConfig};
pub use error::{Result, TftpError};
pub use packet::{BLOCK_SIZE, ErrorCode, MAX_PACKET_SIZE, OCTET_MODE, Opcode};
pub use server::TftpServer;
pub use store::MemoryStore;
