// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Caller-facing client facade.
//!
//! [`KvClient`] ties a connection to a resource pool and exposes the two
//! call styles over the same dispatch pipeline: `enqueue` hands back the
//! pending-result handle for asynchronous callers, `invoke` awaits it,
//! and the blocking bridge (see the `blocking` module) drives the same
//! handles from plain threads.
//!
//! # Example
//!
//! ```no_run
//! use kvlink::client::KvClient;
//! use kvlink::config::ConnectionConfig;
//! use kvlink::protocol::transport::RemoteAddr;
//! use kvlink::resource::ResourceHandle;
//!
//! # async fn example() -> kvlink::error::Result<()> {
//! let resources = ResourceHandle::create_default()?;
//! let client = KvClient::connect(
//!     RemoteAddr::new("127.0.0.1", 6379),
//!     ConnectionConfig::default(),
//!     resources,
//! )
//! .await?;
//!
//! client.set(b"greeting", b"hello").await?;
//! let value = client.get(b"greeting").await?;
//! assert_eq!(value.as_deref(), Some(&b"hello"[..]));
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use bytes::Bytes;

use crate::commands;
use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::protocol::command::{Command, Completion, ReplyDecoder};
use crate::protocol::connection::{Connection, LinkState, StatsSnapshot};
use crate::protocol::transport::{Connector, RemoteAddr, TcpConnector};
use crate::protocol::wire::WireReply;
use crate::resource::ResourceHandle;

/// Client for one connection to a key-value endpoint.
///
/// Cheap to clone; clones share the underlying connection.
#[derive(Clone)]
pub struct KvClient {
    connection: Connection,
}

impl KvClient {
    /// Connect over TCP using the pool's DNS resolver.
    pub async fn connect(
        addr: RemoteAddr,
        config: ConnectionConfig,
        resources: ResourceHandle,
    ) -> Result<Self> {
        let connector = Arc::new(TcpConnector::new(resources.dns(), config.connect_timeout));
        Self::connect_with(addr, config, resources, connector).await
    }

    /// Connect through a custom transport connector.
    pub async fn connect_with(
        addr: RemoteAddr,
        config: ConnectionConfig,
        resources: ResourceHandle,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let connection = Connection::connect(addr, config, resources, connector).await?;
        Ok(Self { connection })
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Enqueue a command and return its pending-result handle.
    pub fn enqueue<D: ReplyDecoder>(&self, cmd: Command<D>) -> Result<Completion<D::Output>> {
        let handle = cmd.handle();
        self.connection.dispatch(Box::new(cmd))?;
        Ok(handle)
    }

    /// Enqueue a command and await its result.
    pub async fn invoke<D: ReplyDecoder>(&self, cmd: Command<D>) -> Result<D::Output> {
        self.enqueue(cmd)?.await
    }

    // ========================================================================
    // Typed conveniences (asynchronous)
    // ========================================================================

    /// `PING`.
    pub async fn ping(&self) -> Result<String> {
        self.invoke(commands::ping()).await
    }

    /// `GET key`.
    pub async fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.invoke(commands::get(key)).await
    }

    /// `SET key value`.
    pub async fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.invoke(commands::set(key, value)).await
    }

    /// `DEL key...`.
    pub async fn del(&self, keys: &[&[u8]]) -> Result<i64> {
        self.invoke(commands::del(keys)).await
    }

    /// `INCR key`.
    pub async fn incr(&self, key: &[u8]) -> Result<i64> {
        self.invoke(commands::incr(key)).await
    }

    /// `MULTI` — open a transaction block.
    pub async fn multi(&self) -> Result<()> {
        self.invoke(commands::multi()).await
    }

    /// `EXEC` — run the open transaction block.
    pub async fn exec(&self) -> Result<Option<Vec<WireReply>>> {
        self.invoke(commands::exec()).await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Signal intent to close; disables reconnection and returns the
    /// acknowledgment. Idempotent.
    pub fn prepare_close(&self) -> Completion<()> {
        self.connection.prepare_close()
    }

    /// Close the connection terminally.
    pub fn close(&self) {
        self.connection.close();
    }

    /// Current connection state.
    pub fn state(&self) -> LinkState {
        self.connection.state()
    }

    /// Counter snapshot for this connection.
    pub fn stats(&self) -> StatsSnapshot {
        self.connection.stats()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::transport::mock::MockConnector;
    use std::time::Duration;

    async fn mock_client(connector: Arc<MockConnector>) -> KvClient {
        let resources = ResourceHandle::builder().attach_current().build().unwrap();
        KvClient::connect_with(
            RemoteAddr::new("127.0.0.1", 6379),
            ConnectionConfig::default(),
            resources,
            connector,
        )
        .await
        .unwrap()
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..10_000 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn typed_round_trips() {
        let connector = Arc::new(MockConnector::reliable());
        let client = mock_client(connector.clone()).await;
        let remote = connector.remote(0).unwrap();

        let pending = client.enqueue(commands::set(b"k", b"v")).unwrap();
        wait_until(|| !remote.written_bytes().is_empty()).await;
        remote.feed(b"+OK\r\n");
        pending.await.unwrap();

        let pending = client.enqueue(commands::get(b"k")).unwrap();
        remote.feed(b"$1\r\nv\r\n");
        assert_eq!(pending.await.unwrap(), Some(Bytes::from_static(b"v")));

        let pending = client.enqueue(commands::get(b"missing")).unwrap();
        remote.feed(b"$-1\r\n");
        assert_eq!(pending.await.unwrap(), None);

        let pending = client.enqueue(commands::incr(b"n")).unwrap();
        remote.feed(b":7\r\n");
        assert_eq!(pending.await.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn server_error_reply_surfaces_as_failure() {
        let connector = Arc::new(MockConnector::reliable());
        let client = mock_client(connector.clone()).await;
        let remote = connector.remote(0).unwrap();

        let pending = client.enqueue(commands::incr(b"text")).unwrap();
        remote.feed(b"-ERR value is not an integer\r\n");

        let err = pending.await.unwrap_err();
        assert!(matches!(err, crate::error::KvError::Server(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn async_path_bypasses_transaction_guard() {
        let connector = Arc::new(MockConnector::reliable());
        let client = mock_client(connector.clone()).await;
        let remote = connector.remote(0).unwrap();

        let pending = client.enqueue(commands::multi()).unwrap();
        remote.feed(b"+OK\r\n");
        pending.await.unwrap();
        assert!(client.connection().in_transaction());

        // Asynchronous callers may queue commands inside the block; the
        // guard belongs to the blocking bridge.
        let pending = client.enqueue(commands::set(b"k", b"v")).unwrap();
        remote.feed(b"+QUEUED\r\n");
        pending.await.unwrap();

        let pending = client.enqueue(commands::exec()).unwrap();
        remote.feed(b"*1\r\n+OK\r\n");
        let results = pending.await.unwrap().unwrap();
        assert_eq!(results, vec![WireReply::Simple("OK".into())]);
        assert!(!client.connection().in_transaction());
    }
}
