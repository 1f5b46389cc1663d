use std::net::SocketAddr;

use thiserror::Error;

use crate::packet::ErrorCode;

#[derive(Error, Debug)]
pub enum TftpError {
    #[error("Illegal TFTP operation: {0}")]
    IllegalOperation(String),

    #[error("Invalid filename specified")]
    InvalidFilename,

    #[error("Invalid mode specified")]
    InvalidMode,

    #[error("Unsupported mode '{0}'. Will only support octet mode")]
    UnsupportedMode(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("File exceeds the {limit} byte limit")]
    FileTooLarge { limit: u64 },

    #[error("Packet from unknown transfer ID {0}")]
    UnexpectedPeer(SocketAddr),

    #[error("Peer sent error {code:?}: {message}")]
    PeerAborted { code: ErrorCode, message: String },

    #[error("Timed out waiting for the client")]
    Timeout,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TftpError {
    /// Error code to report to the client for this failure, if any.
    ///
    /// Timeouts, client aborts and socket errors are never answered.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            TftpError::IllegalOperation(_) | TftpError::InvalidFilename | TftpError::InvalidMode => {
                Some(ErrorCode::IllegalOperation)
            }
            TftpError::UnsupportedMode(_) => Some(ErrorCode::Undefined),
            TftpError::NotFound(_) => Some(ErrorCode::NotFound),
            TftpError::FileTooLarge { .. } => Some(ErrorCode::DiskFull),
            TftpError::UnexpectedPeer(_) => Some(ErrorCode::UnknownTransferId),
            TftpError::PeerAborted { .. }
            | TftpError::Timeout
            | TftpError::Config(_)
            | TftpError::Io(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TftpError>;
