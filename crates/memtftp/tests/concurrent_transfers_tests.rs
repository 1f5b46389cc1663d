//! Concurrent transfer tests
//!
//! Several clients talk to one server at once; each transfer gets its own
//! worker and transfer port.

use memtftp::{MemoryStore, TftpClient, TftpConfig, TftpServer};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinSet;

async fn start_server(store: MemoryStore, workers: usize) -> SocketAddr {
    let config = TftpConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        workers,
        timeout_secs: 5,
        ..Default::default()
    };
    let server = TftpServer::bind(config, store).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

fn payload(i: usize) -> Vec<u8> {
    (0..(300 + i * 150)).map(|b| (b + i) as u8).collect()
}

#[tokio::test]
async fn test_concurrent_writes_to_different_files() {
    let store = MemoryStore::new();
    let addr = start_server(store.clone(), 4).await;

    let mut tasks = JoinSet::new();
    for i in 0..8 {
        tasks.spawn(async move {
            let client = TftpClient::new(addr, Duration::from_secs(2));
            client.put(&format!("file_{}", i), &payload(i)).await
        });
    }

    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    // The last ACK of each write precedes the store update.
    for _ in 0..100 {
        if store.len().await == 8 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.len().await, 8);
    for i in 0..8 {
        let stored = store.get(&format!("file_{}", i)).await.unwrap();
        assert_eq!(stored.as_ref(), payload(i).as_slice());
    }
}

#[tokio::test]
async fn test_concurrent_reads_of_same_file() {
    let store = MemoryStore::new();
    let blob: Vec<u8> = (0..2000u32).map(|i| (i % 199) as u8).collect();
    store.put("shared", blob.clone()).await;
    let addr = start_server(store, 4).await;

    let mut tasks = JoinSet::new();
    for _ in 0..10 {
        tasks.spawn(async move {
            let client = TftpClient::new(addr, Duration::from_secs(2));
            client.get("shared").await
        });
    }

    let mut completed = 0;
    while let Some(result) = tasks.join_next().await {
        assert_eq!(result.unwrap().unwrap(), blob);
        completed += 1;
    }
    assert_eq!(completed, 10);
}

/// With a single worker, requests queue up and are served one at a time.
#[tokio::test]
async fn test_single_worker_serves_queued_requests() {
    let store = MemoryStore::new();
    store.put("a", b"first".to_vec()).await;
    store.put("b", b"second".to_vec()).await;
    let addr = start_server(store, 1).await;

    let mut tasks = JoinSet::new();
    for name in ["a", "b"] {
        tasks.spawn(async move {
            let client = TftpClient::new(addr, Duration::from_secs(2));
            (name, client.get(name).await)
        });
    }

    while let Some(result) = tasks.join_next().await {
        let (name, data) = result.unwrap();
        let expected: &[u8] = if name == "a" { b"first" } else { b"second" };
        assert_eq!(data.unwrap(), expected);
    }
}
