use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::audit::AuditLogger;
use crate::config::TftpConfig;
use crate::error::Result;
use crate::packet::MAX_PACKET_SIZE;
use crate::pool::{IncomingRequest, WorkerContext, WorkerPool};
use crate::store::MemoryStore;
use crate::transfer::TransferOptions;

/// Dispatcher statistics
#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub datagrams_received: AtomicU64,
    pub receive_errors: AtomicU64,
}

/// The well-known listener plus the worker pool it feeds.
pub struct TftpServer {
    socket: Arc<UdpSocket>,
    config: TftpConfig,
    store: MemoryStore,
    shutdown: CancellationToken,
    stats: Arc<DispatcherStats>,
}

impl TftpServer {
    /// Bind the well-known socket. Failure here is fatal to the server.
    pub async fn bind(config: TftpConfig, store: MemoryStore) -> Result<Self> {
        let socket = UdpSocket::bind(config.bind_addr).await?;
        info!("TFTP server listening on {}", socket.local_addr()?);

        Ok(Self {
            socket: Arc::new(socket),
            config,
            store,
            shutdown: CancellationToken::new(),
            stats: Arc::new(DispatcherStats::default()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Cancelling this token stops the dispatcher; in-flight transfers run
    /// to completion before [`TftpServer::run`] returns.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> Arc<DispatcherStats> {
        Arc::clone(&self.stats)
    }

    pub async fn run(self) -> Result<()> {
        let local_addr = self.socket.local_addr()?;
        let workers = self.config.workers.max(1);

        let context = WorkerContext {
            store: self.store.clone(),
            local_ip: local_addr.ip(),
            timeout: self.config.timeout(),
            deadline: self.config.deadline,
            options: TransferOptions {
                max_file_size_bytes: self.config.store.max_file_size_bytes,
                audit_enabled: self.config.logging.audit_enabled,
            },
        };

        // Bounded at the worker count: when every worker is busy and the
        // queue is full, the dispatcher stops reading the listening socket.
        let (intake_tx, intake_rx) = mpsc::channel::<IncomingRequest>(workers);
        let mut pool = WorkerPool::spawn(workers, intake_rx, context);

        if self.config.logging.audit_enabled {
            AuditLogger::server_started(local_addr, workers, self.store.len().await);
        }

        dispatch_loop(&self.socket, intake_tx, &self.shutdown, &self.stats).await;

        info!("Dispatcher stopped, waiting for in-flight transfers");
        pool.join().await;
        pool.print_stats();

        info!(
            "Dispatcher: received={}, receive_errors={}",
            self.stats.datagrams_received.load(Ordering::Relaxed),
            self.stats.receive_errors.load(Ordering::Relaxed),
        );
        if self.config.logging.audit_enabled {
            AuditLogger::server_shutdown("shutdown requested");
        }

        Ok(())
    }
}

/// Read datagrams off the well-known socket and queue them for the workers
/// until `shutdown` fires. Dropping `intake` on return lets the workers
/// drain the queue and exit.
async fn dispatch_loop(
    socket: &UdpSocket,
    intake: mpsc::Sender<IncomingRequest>,
    shutdown: &CancellationToken,
    stats: &DispatcherStats,
) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];

    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = socket.recv_from(&mut buf) => received,
        };

        let (size, client_addr) = match received {
            Ok(received) => received,
            Err(e) => {
                // A failed receive on the listener only loses that datagram.
                debug!("Dropping failed receive on listening socket: {}", e);
                stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };
        stats.datagrams_received.fetch_add(1, Ordering::Relaxed);

        let request = IncomingRequest {
            data: buf[..size].to_vec(),
            addr: client_addr,
            timestamp: Instant::now(),
        };

        tokio::select! {
            _ = shutdown.cancelled() => break,
            queued = intake.send(request) => {
                if queued.is_err() {
                    break;
                }
            }
        }
    }
}
