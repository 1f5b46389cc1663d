use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{Level, event};

/// Which way the blob moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Read,
    Write,
}

/// Security audit event types for SIEM integration
///
/// Every event is serialized to a single JSON object and emitted through
/// `tracing` under the `audit_event` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Server startup event
    ServerStarted {
        #[serde(flatten)]
        common: CommonFields,
        bind_addr: String,
        workers: usize,
        preloaded_files: usize,
    },

    /// Server shutdown event
    ServerShutdown {
        #[serde(flatten)]
        common: CommonFields,
        reason: String,
    },

    /// Blob read request received
    ReadRequest {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        filename: String,
        mode: String,
    },

    /// Blob write request received
    WriteRequest {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        filename: String,
        mode: String,
    },

    /// Transfer completed successfully
    TransferCompleted {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        filename: String,
        direction: Direction,
        bytes_transferred: u64,
        blocks: u64,
        duration_ms: u64,
        /// Transfer throughput in bytes per second
        throughput_bps: u64,
    },

    /// Transfer abandoned
    TransferFailed {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        filename: String,
        direction: Direction,
        error: String,
    },

    /// Datagram on a transfer socket from a port other than the TID
    UnknownTransferId {
        #[serde(flatten)]
        common: CommonFields,
        expected_addr: String,
        stray_addr: String,
    },

    /// Malformed or unexpected packet
    ProtocolViolation {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        violation: String,
    },

    /// Write rejected for exceeding the configured size limit
    FileSizeLimitExceeded {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        filename: String,
        max_allowed: u64,
    },
}

/// Common fields present in all audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonFields {
    /// ISO 8601 timestamp
    pub timestamp: String,
    /// Hostname or system identifier
    pub hostname: String,
    /// Service name
    pub service: String,
    /// Severity level (info, warn, error)
    pub severity: String,
}

impl CommonFields {
    pub fn new(severity: &str) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            hostname: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
            service: "memtftp".to_string(),
            severity: severity.to_string(),
        }
    }
}

impl AuditEvent {
    /// Log this audit event using structured tracing
    pub fn log(&self) {
        let json = serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"error\": \"Failed to serialize audit event: {:?}\"}}",
                self
            )
        });

        match self.common().severity.as_str() {
            "error" => event!(Level::ERROR, audit_event = %json),
            "warn" => event!(Level::WARN, audit_event = %json),
            _ => event!(Level::INFO, audit_event = %json),
        }
    }

    pub fn common(&self) -> &CommonFields {
        match self {
            AuditEvent::ServerStarted { common, .. }
            | AuditEvent::ServerShutdown { common, .. }
            | AuditEvent::ReadRequest { common, .. }
            | AuditEvent::WriteRequest { common, .. }
            | AuditEvent::TransferCompleted { common, .. }
            | AuditEvent::TransferFailed { common, .. }
            | AuditEvent::UnknownTransferId { common, .. }
            | AuditEvent::ProtocolViolation { common, .. }
            | AuditEvent::FileSizeLimitExceeded { common, .. } => common,
        }
    }
}

/// Audit logger for TFTP operations
pub struct AuditLogger;

impl AuditLogger {
    pub fn server_started(bind_addr: SocketAddr, workers: usize, preloaded_files: usize) {
        AuditEvent::ServerStarted {
            common: CommonFields::new("info"),
            bind_addr: bind_addr.to_string(),
            workers,
            preloaded_files,
        }
        .log();
    }

    pub fn server_shutdown(reason: &str) {
        AuditEvent::ServerShutdown {
            common: CommonFields::new("info"),
            reason: reason.to_string(),
        }
        .log();
    }

    pub fn request(direction: Direction, client_addr: SocketAddr, filename: &str, mode: &str) {
        let common = CommonFields::new("info");
        let client_addr = client_addr.to_string();
        let filename = filename.to_string();
        let mode = mode.to_string();
        match direction {
            Direction::Read => AuditEvent::ReadRequest {
                common,
                client_addr,
                filename,
                mode,
            },
            Direction::Write => AuditEvent::WriteRequest {
                common,
                client_addr,
                filename,
                mode,
            },
        }
        .log();
    }

    pub fn transfer_completed(
        direction: Direction,
        client_addr: SocketAddr,
        filename: &str,
        bytes_transferred: u64,
        blocks: u64,
        elapsed: Duration,
    ) {
        let duration_ms = elapsed.as_millis() as u64;
        let throughput_bps = if duration_ms > 0 {
            bytes_transferred * 1000 / duration_ms
        } else {
            bytes_transferred
        };

        AuditEvent::TransferCompleted {
            common: CommonFields::new("info"),
            client_addr: client_addr.to_string(),
            filename: filename.to_string(),
            direction,
            bytes_transferred,
            blocks,
            duration_ms,
            throughput_bps,
        }
        .log();
    }

    pub fn transfer_failed(
        direction: Direction,
        client_addr: SocketAddr,
        filename: &str,
        error: &str,
    ) {
        AuditEvent::TransferFailed {
            common: CommonFields::new("warn"),
            client_addr: client_addr.to_string(),
            filename: filename.to_string(),
            direction,
            error: error.to_string(),
        }
        .log();
    }

    pub fn unknown_transfer_id(expected_addr: SocketAddr, stray_addr: SocketAddr) {
        AuditEvent::UnknownTransferId {
            common: CommonFields::new("warn"),
            expected_addr: expected_addr.to_string(),
            stray_addr: stray_addr.to_string(),
        }
        .log();
    }

    pub fn protocol_violation(client_addr: SocketAddr, violation: &str) {
        AuditEvent::ProtocolViolation {
            common: CommonFields::new("warn"),
            client_addr: client_addr.to_string(),
            violation: violation.to_string(),
        }
        .log();
    }

    pub fn file_size_limit_exceeded(client_addr: SocketAddr, filename: &str, max_allowed: u64) {
        AuditEvent::FileSizeLimitExceeded {
            common: CommonFields::new("warn"),
            client_addr: client_addr.to_string(),
            filename: filename.to_string(),
            max_allowed,
        }
        .log();
    }
}
