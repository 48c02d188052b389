// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end client tests against an in-process TCP server.
//!
//! The server speaks the wire protocol over real loopback sockets and
//! supports a small command set plus `DROPCON`, which severs the
//! connection without replying so tests can force a transport loss.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use kvlink::config::ConnectionConfig;
use kvlink::error::KvError;
use kvlink::protocol::wire::{WireDecoder, WireReply};
use kvlink::{ConstantDelay, KvClient, RemoteAddr, ResourceHandle};

// ============================================================================
// Test server
// ============================================================================

type Store = Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>;

struct TestServer {
    addr: SocketAddr,
}

impl TestServer {
    async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let store: Store = Arc::new(Mutex::new(HashMap::new()));

        let _ = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let _ = tokio::spawn(serve_connection(socket, store.clone()));
            }
        });

        Self { addr }
    }

    fn remote_addr(&self) -> RemoteAddr {
        RemoteAddr::new(self.addr.ip().to_string(), self.addr.port())
    }
}

async fn serve_connection(mut socket: TcpStream, store: Store) {
    let mut decoder = WireDecoder::with_default_max();
    let mut buf = [0u8; 4096];

    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.feed(&buf[..n]);

        loop {
            match decoder.next() {
                Ok(Some(request)) => {
                    let Some(reply) = handle_request(&request, &store) else {
                        // DROPCON: sever without replying.
                        return;
                    };
                    if socket.write_all(&reply).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }
}

/// Execute one request; `None` severs the connection.
fn handle_request(request: &WireReply, store: &Store) -> Option<Vec<u8>> {
    let WireReply::Array(Some(parts)) = request else {
        return Some(b"-ERR malformed request\r\n".to_vec());
    };
    let args: Vec<&[u8]> = parts
        .iter()
        .filter_map(|p| match p {
            WireReply::Bulk(Some(data)) => Some(&data[..]),
            _ => None,
        })
        .collect();
    let Some(keyword) = args.first() else {
        return Some(b"-ERR empty request\r\n".to_vec());
    };

    match keyword.to_ascii_uppercase().as_slice() {
        b"PING" => Some(b"+PONG\r\n".to_vec()),
        b"ECHO" => Some(bulk(args.get(1).copied())),
        b"GET" => {
            let value = store.lock().get(args[1]).cloned();
            Some(bulk(value.as_deref()))
        }
        b"SET" => {
            store.lock().insert(args[1].to_vec(), args[2].to_vec());
            Some(b"+OK\r\n".to_vec())
        }
        b"DEL" => {
            let mut removed = 0;
            let mut data = store.lock();
            for key in &args[1..] {
                if data.remove(*key).is_some() {
                    removed += 1;
                }
            }
            Some(format!(":{}\r\n", removed).into_bytes())
        }
        b"INCR" => {
            let mut data = store.lock();
            let entry = data.entry(args[1].to_vec()).or_insert_with(|| b"0".to_vec());
            let current: i64 = std::str::from_utf8(entry)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            *entry = (current + 1).to_string().into_bytes();
            Some(format!(":{}\r\n", current + 1).into_bytes())
        }
        b"DROPCON" => None,
        _ => Some(b"-ERR unknown command\r\n".to_vec()),
    }
}

fn bulk(data: Option<&[u8]>) -> Vec<u8> {
    match data {
        Some(data) => {
            let mut reply = format!("${}\r\n", data.len()).into_bytes();
            reply.extend_from_slice(data);
            reply.extend_from_slice(b"\r\n");
            reply
        }
        None => b"$-1\r\n".to_vec(),
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn fast_reconnect_config() -> ConnectionConfig {
    ConnectionConfig {
        reconnect_delay: Some(Arc::new(ConstantDelay::new(Duration::from_millis(10)))),
        ..Default::default()
    }
}

async fn connect(server: &TestServer, config: ConnectionConfig) -> KvClient {
    let resources = ResourceHandle::builder().attach_current().build().unwrap();
    KvClient::connect(server.remote_addr(), config, resources)
        .await
        .unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn round_trips_over_real_tcp() {
    let server = TestServer::spawn().await;
    let client = connect(&server, ConnectionConfig::default()).await;

    assert_eq!(client.ping().await.unwrap(), "PONG");

    client.set(b"alpha", b"1").await.unwrap();
    assert_eq!(
        client.get(b"alpha").await.unwrap(),
        Some(Bytes::from_static(b"1"))
    );
    assert_eq!(client.get(b"missing").await.unwrap(), None);

    assert_eq!(client.incr(b"counter").await.unwrap(), 1);
    assert_eq!(client.incr(b"counter").await.unwrap(), 2);

    assert_eq!(client.del(&[b"alpha", b"missing"]).await.unwrap(), 1);

    client.close();
}

#[tokio::test]
async fn pipelined_commands_complete_in_order() {
    let server = TestServer::spawn().await;
    let client = connect(&server, ConnectionConfig::default()).await;

    let handles: Vec<_> = (0..32)
        .map(|_| client.enqueue(kvlink::commands::incr(b"seq")).unwrap())
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), (i + 1) as i64);
    }

    client.close();
}

#[tokio::test]
async fn batching_enabled_round_trips() {
    let server = TestServer::spawn().await;
    let config = ConnectionConfig {
        batch: kvlink::BatchOptions {
            enabled: true,
            batch_size: 4,
            ..Default::default()
        },
        ..Default::default()
    };
    let client = connect(&server, config).await;

    let handles: Vec<_> = (0..8)
        .map(|_| client.enqueue(kvlink::commands::incr(b"batched")).unwrap())
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), (i + 1) as i64);
    }

    client.close();
}

#[tokio::test]
async fn transport_loss_fails_in_flight_and_recovers() {
    let server = TestServer::spawn().await;
    let client = connect(&server, fast_reconnect_config()).await;

    assert_eq!(client.ping().await.unwrap(), "PONG");

    // Force a drop: the command is in flight when the server severs.
    let dropped = client
        .enqueue(kvlink::commands::raw("DROPCON", &[]))
        .unwrap();
    let err = dropped.await.unwrap_err();
    assert!(matches!(err, KvError::ConnectionUnavailable));

    // Queued commands ride out the outage and complete after reconnect.
    let value = tokio::time::timeout(Duration::from_secs(5), client.ping())
        .await
        .expect("reconnect within deadline")
        .unwrap();
    assert_eq!(value, "PONG");

    assert!(client.stats().reconnect_attempts >= 1);
    client.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn blocking_bridge_over_real_tcp() {
    let server = TestServer::spawn().await;
    let client = connect(&server, ConnectionConfig::default()).await;

    let blocking = client.blocking().timeout(Duration::from_secs(5));
    blocking.set(b"sync", b"path").unwrap();
    assert_eq!(
        blocking.get(b"sync").unwrap(),
        Some(Bytes::from_static(b"path"))
    );
    assert_eq!(blocking.incr(b"sync-counter").unwrap(), 1);

    client.close();
}

#[tokio::test]
async fn prepare_close_prevents_recovery() {
    let server = TestServer::spawn().await;
    let client = connect(&server, fast_reconnect_config()).await;

    let first = client.prepare_close();
    let second = client.prepare_close();
    assert!(first.is_settled());
    assert!(second.is_settled());

    client.close();
    let err = client.enqueue(kvlink::commands::ping()).unwrap_err();
    assert!(matches!(err, KvError::Closed));
}

#[tokio::test]
async fn initial_connect_failure_is_fatal() {
    // Nothing listens here; the initial attempt must fail fast.
    let resources = ResourceHandle::builder().attach_current().build().unwrap();
    let result = KvClient::connect(
        RemoteAddr::new("127.0.0.1", 1),
        ConnectionConfig::default(),
        resources,
    )
    .await;
    assert!(result.is_err());
}
