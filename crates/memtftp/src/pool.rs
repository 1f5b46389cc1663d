// Worker pool
//
// A fixed set of tokio tasks shares one bounded intake queue fed by the
// dispatcher. Each worker takes one raw request at a time, binds a fresh
// ephemeral socket for it, runs the matching transfer state machine to
// completion and only then returns to the queue.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::audit::{AuditLogger, Direction};
use crate::channel::{TransferChannel, UdpTransferChannel};
use crate::config::DeadlinePolicy;
use crate::packet::{Opcode, decode_request};
use crate::store::MemoryStore;
use crate::transfer::{TransferOptions, TransferSummary, reject, serve_read, serve_write};

/// Raw datagram handed from the dispatcher to a worker
#[derive(Debug)]
pub struct IncomingRequest {
    /// Raw packet data
    pub data: Vec<u8>,
    /// Client socket address
    pub addr: SocketAddr,
    /// Reception timestamp for metrics
    pub timestamp: Instant,
}

/// Worker statistics
#[derive(Debug)]
pub struct WorkerStats {
    pub worker_id: usize,
    pub transfers_completed: AtomicU64,
    pub transfers_failed: AtomicU64,
    /// Datagrams that were not read or write requests
    pub requests_discarded: AtomicU64,
    /// Requests lost because no transfer socket could be bound
    pub bind_failures: AtomicU64,
    pub total_processing_time_us: AtomicU64,
}

impl WorkerStats {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            transfers_completed: AtomicU64::new(0),
            transfers_failed: AtomicU64::new(0),
            requests_discarded: AtomicU64::new(0),
            bind_failures: AtomicU64::new(0),
            total_processing_time_us: AtomicU64::new(0),
        }
    }

    fn record(&self, outcome: &RequestOutcome, elapsed: Duration) {
        let counter = match outcome {
            RequestOutcome::Completed(_) => &self.transfers_completed,
            RequestOutcome::Failed => &self.transfers_failed,
            RequestOutcome::Discarded => &self.requests_discarded,
            RequestOutcome::Dropped => &self.bind_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.total_processing_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }
}

/// Everything a worker needs to run transfers. Cloned into each worker.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub store: MemoryStore,
    /// Address ephemeral transfer sockets bind to (port 0).
    pub local_ip: IpAddr,
    pub timeout: Duration,
    pub deadline: DeadlinePolicy,
    pub options: TransferOptions,
}

/// What became of one intake item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Completed(TransferSummary),
    /// The transfer started but ended in an error or timeout.
    Failed,
    /// Not a read or write request; no response was sent.
    Discarded,
    /// No transfer socket could be bound.
    Dropped,
}

type IntakeQueue = Arc<Mutex<mpsc::Receiver<IncomingRequest>>>;

/// Worker pool handle
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    stats: Vec<Arc<WorkerStats>>,
}

impl WorkerPool {
    /// Spawn `worker_count` workers draining `intake`. Workers exit once the
    /// sending side of the queue is dropped and the queue is empty.
    pub fn spawn(
        worker_count: usize,
        intake: mpsc::Receiver<IncomingRequest>,
        context: WorkerContext,
    ) -> Self {
        info!("Starting worker pool with {} workers", worker_count);

        let intake: IntakeQueue = Arc::new(Mutex::new(intake));
        let stats: Vec<Arc<WorkerStats>> = (0..worker_count)
            .map(|id| Arc::new(WorkerStats::new(id)))
            .collect();

        let handles = stats
            .iter()
            .map(|worker_stats| {
                let intake = Arc::clone(&intake);
                let context = context.clone();
                let worker_stats = Arc::clone(worker_stats);
                tokio::spawn(worker_loop(intake, context, worker_stats))
            })
            .collect();

        Self { handles, stats }
    }

    pub fn worker_stats(&self, worker_id: usize) -> Option<&WorkerStats> {
        self.stats.get(worker_id).map(|s| s.as_ref())
    }

    /// Wait for every worker to finish its current transfer and exit.
    pub async fn join(&mut self) {
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!("Worker task ended abnormally: {}", e);
            }
        }
    }

    pub fn print_stats(&self) {
        info!("=== Worker Pool Statistics ===");

        for stats in &self.stats {
            let completed = stats.transfers_completed.load(Ordering::Relaxed);
            let failed = stats.transfers_failed.load(Ordering::Relaxed);
            let discarded = stats.requests_discarded.load(Ordering::Relaxed);
            let bind_failures = stats.bind_failures.load(Ordering::Relaxed);
            let handled = completed + failed + discarded + bind_failures;
            let total_time = stats.total_processing_time_us.load(Ordering::Relaxed);
            let avg_time = if handled > 0 { total_time / handled } else { 0 };

            info!(
                "Worker {}: completed={}, failed={}, discarded={}, bind_failures={}, avg_time={}us",
                stats.worker_id, completed, failed, discarded, bind_failures, avg_time,
            );
        }
    }
}

async fn worker_loop(intake: IntakeQueue, context: WorkerContext, stats: Arc<WorkerStats>) {
    let worker_id = stats.worker_id;
    debug!("Worker {} starting", worker_id);

    loop {
        // The lock is held only while waiting for the next item, so items
        // are handed out in queue order.
        let next = intake.lock().await.recv().await;
        let Some(request) = next else {
            break;
        };

        let queued_for = request.timestamp.elapsed();
        let started = Instant::now();
        let span = info_span!(
            "transfer",
            session = %uuid::Uuid::new_v4(),
            client = %request.addr,
            worker = worker_id,
        );

        let outcome = handle_request(request, &context).instrument(span).await;
        debug!(
            worker = worker_id,
            ?outcome,
            queued_us = queued_for.as_micros() as u64,
            "Request finished"
        );
        stats.record(&outcome, started.elapsed());
    }

    debug!("Worker {} shutting down", worker_id);
}

/// Bind an ephemeral transfer socket for `request` and run it to completion.
/// The socket is closed when this returns.
pub async fn handle_request(request: IncomingRequest, context: &WorkerContext) -> RequestOutcome {
    if !is_request(&request.data) {
        debug!(
            bytes = request.data.len(),
            "Discarding datagram that is not a read or write request"
        );
        return RequestOutcome::Discarded;
    }

    let channel = match UdpTransferChannel::bind(
        context.local_ip,
        request.addr,
        context.timeout,
        context.deadline,
    )
    .await
    {
        Ok(channel) => channel,
        Err(e) => {
            warn!("Error opening new UDP listener, discarding request: {}", e);
            return RequestOutcome::Dropped;
        }
    };

    dispatch(&channel, &request.data, context).await
}

fn is_request(data: &[u8]) -> bool {
    matches!(
        Opcode::peek(data),
        Some(Opcode::ReadRequest | Opcode::WriteRequest)
    )
}

/// Parse the initial request on an established channel and run the state
/// machine its opcode selects.
pub async fn dispatch<C: TransferChannel>(
    channel: &C,
    data: &[u8],
    context: &WorkerContext,
) -> RequestOutcome {
    let client = channel.remote_addr();
    let audit = context.options.audit_enabled;

    let request = match decode_request(data) {
        Ok(request) => request,
        Err(e) => {
            if audit {
                AuditLogger::protocol_violation(client, &e.to_string());
            }
            warn!("Rejecting malformed request: {}", e);
            reject(channel, e).await;
            return RequestOutcome::Failed;
        }
    };

    let direction = match request.opcode {
        Opcode::ReadRequest => Direction::Read,
        Opcode::WriteRequest => Direction::Write,
        other => {
            debug!(opcode = ?other, "Received unknown request, discarding");
            return RequestOutcome::Discarded;
        }
    };

    info!(
        filename = %request.filename,
        mode = %request.mode,
        ?direction,
        "Accepted request"
    );
    if audit {
        AuditLogger::request(direction, client, &request.filename, &request.mode);
    }

    let started = Instant::now();
    let result = match direction {
        Direction::Read => {
            serve_read(
                channel,
                &context.store,
                &request.filename,
                &request.mode,
                &context.options,
            )
            .await
        }
        Direction::Write => {
            serve_write(
                channel,
                &context.store,
                &request.filename,
                &request.mode,
                &context.options,
            )
            .await
        }
    };

    match result {
        Ok(summary) => {
            info!(
                filename = %request.filename,
                bytes = summary.bytes,
                blocks = summary.blocks,
                "Transfer complete"
            );
            if audit {
                AuditLogger::transfer_completed(
                    direction,
                    client,
                    &request.filename,
                    summary.bytes,
                    summary.blocks,
                    started.elapsed(),
                );
            }
            RequestOutcome::Completed(summary)
        }
        Err(e) => {
            warn!(filename = %request.filename, "Transfer failed: {}", e);
            if audit {
                AuditLogger::transfer_failed(direction, client, &request.filename, &e.to_string());
            }
            RequestOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{
        ErrorCode, decode_ack, decode_data, decode_error, encode_ack, encode_data, encode_request,
    };
    use crate::testing::ScriptedChannel;

    fn context(store: MemoryStore) -> WorkerContext {
        WorkerContext {
            store,
            local_ip: "127.0.0.1".parse().unwrap(),
            timeout: Duration::from_secs(1),
            deadline: DeadlinePolicy::Transfer,
            options: TransferOptions::default(),
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:8088".parse().unwrap()
    }

    #[tokio::test]
    async fn dispatches_read_request() {
        let store = MemoryStore::new();
        store.put("hello", b"abcdefgh".to_vec()).await;
        let channel = ScriptedChannel::new(peer());
        channel.push(&encode_ack(1));

        let request = encode_request(Opcode::ReadRequest, "hello", "octet");
        let outcome = dispatch(&channel, &request, &context(store)).await;
        assert_eq!(
            outcome,
            RequestOutcome::Completed(TransferSummary { bytes: 8, blocks: 1 })
        );

        let sent = channel.sent_to_peer();
        let data = decode_data(&sent[0], sent[0].len()).unwrap();
        assert_eq!(data.payload, b"abcdefgh");
    }

    #[tokio::test]
    async fn dispatches_write_request() {
        let store = MemoryStore::new();
        let channel = ScriptedChannel::new(peer());
        channel.push(&encode_data(1, b"abcdefgh"));

        let request = encode_request(Opcode::WriteRequest, "hello", "octet");
        let outcome = dispatch(&channel, &request, &context(store.clone())).await;
        assert!(matches!(outcome, RequestOutcome::Completed(_)));
        assert_eq!(store.get("hello").await.as_deref(), Some(&b"abcdefgh"[..]));
        assert_eq!(decode_ack(&channel.sent_to_peer()[0]).unwrap().block, 0);
    }

    #[tokio::test]
    async fn malformed_request_gets_illegal_operation() {
        let channel = ScriptedChannel::new(peer());
        let outcome = dispatch(&channel, b"\x00\x01\x00octet\x00", &context(MemoryStore::new())).await;
        assert_eq!(outcome, RequestOutcome::Failed);

        let sent = channel.sent_to_peer();
        assert_eq!(sent.len(), 1);
        let error = decode_error(&sent[0]).unwrap();
        assert_eq!(error.code, ErrorCode::IllegalOperation);
        assert_eq!(error.message, "Invalid filename specified");
    }

    #[tokio::test]
    async fn non_request_opcodes_are_discarded_silently() {
        let request = IncomingRequest {
            data: encode_ack(1).to_vec(),
            addr: peer(),
            timestamp: Instant::now(),
        };
        let outcome = handle_request(request, &context(MemoryStore::new())).await;
        assert_eq!(outcome, RequestOutcome::Discarded);

        let runt = IncomingRequest {
            data: vec![0],
            addr: peer(),
            timestamp: Instant::now(),
        };
        let outcome = handle_request(runt, &context(MemoryStore::new())).await;
        assert_eq!(outcome, RequestOutcome::Discarded);
    }

    #[tokio::test]
    async fn pool_drains_queue_and_exits_when_closed() {
        let store = MemoryStore::new();
        let (tx, rx) = mpsc::channel(2);
        let mut pool = WorkerPool::spawn(2, rx, context(store));

        for _ in 0..3 {
            tx.send(IncomingRequest {
                data: encode_ack(7).to_vec(),
                addr: peer(),
                timestamp: Instant::now(),
            })
            .await
            .unwrap();
        }
        drop(tx);

        pool.join().await;
        let total: u64 = (0..2)
            .filter_map(|id| pool.worker_stats(id))
            .map(|s| s.requests_discarded.load(Ordering::Relaxed))
            .sum();
        assert_eq!(total, 3);
        assert!(pool.worker_stats(2).is_none());
    }

    #[tokio::test]
    async fn unbindable_transfer_address_drops_request() {
        // TEST-NET-1 is never assigned to a local interface.
        let mut ctx = context(MemoryStore::new());
        ctx.local_ip = "192.0.2.1".parse().unwrap();
        let request = IncomingRequest {
            data: encode_request(Opcode::ReadRequest, "hello", "octet").to_vec(),
            addr: peer(),
            timestamp: Instant::now(),
        };
        assert_eq!(handle_request(request, &ctx).await, RequestOutcome::Dropped);
    }

    #[test]
    fn discards_and_bind_failures_are_counted_apart() {
        let stats = WorkerStats::new(0);
        stats.record(&RequestOutcome::Discarded, Duration::from_micros(5));
        stats.record(&RequestOutcome::Dropped, Duration::from_micros(5));
        stats.record(&RequestOutcome::Dropped, Duration::from_micros(5));

        assert_eq!(stats.requests_discarded.load(Ordering::Relaxed), 1);
        assert_eq!(stats.bind_failures.load(Ordering::Relaxed), 2);
        assert_eq!(stats.total_processing_time_us.load(Ordering::Relaxed), 15);
    }
}
