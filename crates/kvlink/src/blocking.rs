// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Blocking bridge over the asynchronous dispatch pipeline.
//!
//! [`KvClient::invoke_sync`] parks the *calling* thread on the command's
//! completion handle; worker-pool threads are never blocked. On timeout
//! the underlying command is cancelled best-effort: if a reply settles
//! the handle first, the caller receives that result, otherwise the
//! timeout wins and a late reply is discarded silently. Exactly one of
//! the two outcomes is ever observed.
//!
//! Before dispatching, the transaction guard is enforced (atomically with
//! the enqueue): a non-control command fails with
//! [`KvError::TransactionState`] while a transaction block is open, which
//! keeps one thread's ad-hoc command from corrupting another thread's
//! in-progress transaction on a shared connection. The two
//! transaction-control commands bypass the guard.
//!
//! Failures surface as their original [`KvError`], never wrapped.

use std::time::Duration;

use bytes::Bytes;

use crate::client::KvClient;
use crate::commands;
use crate::error::{KvError, Result};
use crate::protocol::command::{Command, ReplyDecoder};
use crate::protocol::wire::WireReply;

impl KvClient {
    /// Dispatch a command and block until it completes or `timeout`
    /// elapses.
    ///
    /// Must not be called from a worker-pool thread; it would stall the
    /// event processing that completes the command.
    pub fn invoke_sync<D: ReplyDecoder>(
        &self,
        cmd: Command<D>,
        timeout: Duration,
    ) -> Result<D::Output> {
        let handle = cmd.handle();
        self.connection().dispatch_guarded(Box::new(cmd))?;

        match handle.wait_timeout(timeout) {
            Some(result) => result,
            None => {
                if handle.cancel() {
                    Err(KvError::Timeout)
                } else {
                    // A writer settled the handle in the race window just
                    // as the deadline elapsed; honor that outcome.
                    handle.try_result().unwrap_or(Err(KvError::Timeout))
                }
            }
        }
    }

    /// Blocking view of this client using the connection's configured
    /// command timeout.
    pub fn blocking(&self) -> BlockingApi<'_> {
        BlockingApi {
            client: self,
            timeout: self.connection().command_timeout(),
        }
    }
}

/// Blocking call surface over a [`KvClient`].
pub struct BlockingApi<'a> {
    client: &'a KvClient,
    timeout: Duration,
}

impl BlockingApi<'_> {
    /// Override the per-call timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `PING`.
    pub fn ping(&self) -> Result<String> {
        self.client.invoke_sync(commands::ping(), self.timeout)
    }

    /// `GET key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.client.invoke_sync(commands::get(key), self.timeout)
    }

    /// `SET key value`.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.client.invoke_sync(commands::set(key, value), self.timeout)
    }

    /// `DEL key...`.
    pub fn del(&self, keys: &[&[u8]]) -> Result<i64> {
        self.client.invoke_sync(commands::del(keys), self.timeout)
    }

    /// `INCR key`.
    pub fn incr(&self, key: &[u8]) -> Result<i64> {
        self.client.invoke_sync(commands::incr(key), self.timeout)
    }

    /// `MULTI` — open a transaction block.
    pub fn multi(&self) -> Result<()> {
        self.client.invoke_sync(commands::multi(), self.timeout)
    }

    /// `EXEC` — run the open transaction block.
    pub fn exec(&self) -> Result<Option<Vec<WireReply>>> {
        self.client.invoke_sync(commands::exec(), self.timeout)
    }
}

// ============================================================================
// Tests
// ============================================================================
