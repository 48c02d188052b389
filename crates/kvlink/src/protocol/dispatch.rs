// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection command dispatch queue.
//!
//! The queue owns every outstanding command between enqueue and
//! completion. The protocol guarantees in-order replies, so matching is
//! strict FIFO: each decoded reply settles the queue head. Two stages:
//!
//! ```text
//! enqueue -> [buffered]----(activation)----> [pending] --(reply)--> settled
//!                ^                               |
//!                +------(loss, replay policy)----+
//! ```
//!
//! `buffered` holds commands that arrived while no transport was active
//! (reconnect in flight); `pending` holds commands written to the
//! transport and awaiting replies. All state sits behind one mutex, which
//! also makes the transaction guard check-and-enqueue a single atomic
//! step.

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{KvError, Result};
use crate::protocol::command::QueuedCommand;
use crate::protocol::wire::WireReply;

/// What happens to in-flight commands when the transport is lost.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Fail every pending command with [`KvError::ConnectionUnavailable`].
    #[default]
    FailPending,

    /// Retain pending commands in order and rewrite their frames to the
    /// new transport once reconnected. Each command still completes
    /// exactly once.
    Replay,
}

/// Result of enqueueing a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Frame handed to the active transport's writer.
    Written,

    /// No active transport; command parked until activation.
    Buffered,
}

const TX_GUARD_MESSAGE: &str = "cannot dispatch command inside an open transaction block; \
     the connection may be shared with a thread running a transaction";

struct QueueInner {
    /// Written to the transport, awaiting replies (reply order == this order).
    pending: VecDeque<Box<dyn QueuedCommand>>,

    /// Awaiting an active transport.
    buffered: VecDeque<Box<dyn QueuedCommand>>,

    /// Outbound frame channel of the live conduit, when active.
    sender: Option<UnboundedSender<Bytes>>,

    /// A transaction block is open on this connection.
    in_transaction: bool,

    /// Terminal; no further enqueues.
    closed: bool,
}

/// Ordered queue of outstanding requests for one connection.
pub struct DispatchQueue {
    inner: Mutex<QueueInner>,
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchQueue {
    /// Create an empty queue with no active transport.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                pending: VecDeque::new(),
                buffered: VecDeque::new(),
                sender: None,
                in_transaction: false,
                closed: false,
            }),
        }
    }

    /// Enqueue a command.
    ///
    /// With `enforce_tx_guard` set (the blocking bridge), a non-control
    /// command is rejected while a transaction block is open; the check
    /// runs under the queue lock, so guard-and-enqueue is atomic. The
    /// rejection settles the command's handle as well as returning the
    /// error. With no active transport the command is buffered when
    /// `buffer_if_inactive` is set, otherwise failed immediately.
    pub fn enqueue(
        &self,
        mut cmd: Box<dyn QueuedCommand>,
        buffer_if_inactive: bool,
        enforce_tx_guard: bool,
    ) -> Result<EnqueueOutcome> {
        let mut inner = self.inner.lock();

        if inner.closed {
            let err = KvError::Closed;
            cmd.settle_failure(err.clone());
            return Err(err);
        }

        if enforce_tx_guard && inner.in_transaction && !cmd.skips_tx_guard() {
            let err = KvError::TransactionState(TX_GUARD_MESSAGE);
            cmd.settle_failure(err.clone());
            return Err(err);
        }

        match cmd.keyword() {
            "MULTI" => inner.in_transaction = true,
            "EXEC" | "DISCARD" => inner.in_transaction = false,
            _ => {}
        }

        if let Some(sender) = inner.sender.clone() {
            if sender.send(cmd.frame()).is_ok() {
                inner.pending.push_back(cmd);
                return Ok(EnqueueOutcome::Written);
            }
            // Writer went away under us; treat as inactive.
            inner.sender = None;
        }

        if buffer_if_inactive {
            inner.buffered.push_back(cmd);
            Ok(EnqueueOutcome::Buffered)
        } else {
            let err = KvError::ConnectionUnavailable;
            cmd.settle_failure(err.clone());
            Err(err)
        }
    }

    /// Match a decoded reply to the queue head and settle it.
    ///
    /// A reply with no pending command, or one the command's decoder
    /// cannot match, is a protocol violation and returns an error that is
    /// fatal to the connection.
    pub fn on_reply(&self, reply: WireReply) -> Result<()> {
        let cmd = self.inner.lock().pending.pop_front();
        match cmd {
            Some(mut cmd) => {
                log::trace!(
                    "[DISPATCH] completing {} after {}ms",
                    cmd.keyword(),
                    cmd.age().as_millis()
                );
                cmd.settle_reply(reply)
            }
            None => Err(KvError::Decode("reply without a pending command".into())),
        }
    }

    /// Handle transport loss.
    ///
    /// Commands never written (`buffered`) always survive; the policy
    /// decides the fate of in-flight commands. Returns the number of
    /// commands failed.
    pub fn on_connection_lost(&self, policy: ReconnectPolicy) -> usize {
        let mut inner = self.inner.lock();
        inner.sender = None;

        match policy {
            ReconnectPolicy::FailPending => {
                let failed = inner.pending.len();
                for mut cmd in inner.pending.drain(..) {
                    cmd.settle_failure(KvError::ConnectionUnavailable);
                }
                failed
            }
            ReconnectPolicy::Replay => {
                // In-flight commands move back in front of anything queued
                // while inactive, preserving original dispatch order.
                let mut replay = std::mem::take(&mut inner.pending);
                replay.extend(inner.buffered.drain(..));
                inner.buffered = replay;
                0
            }
        }
    }

    /// Re-arm the queue with a fresh transport's writer.
    ///
    /// Buffered commands (including replayed ones) are written in order.
    /// Returns the number of frames written.
    pub fn on_activated(&self, sender: UnboundedSender<Bytes>) -> usize {
        let mut inner = self.inner.lock();
        let mut written = 0;

        while let Some(cmd) = inner.buffered.pop_front() {
            if sender.send(cmd.frame()).is_err() {
                inner.buffered.push_front(cmd);
                return written;
            }
            inner.pending.push_back(cmd);
            written += 1;
        }

        inner.sender = Some(sender);
        written
    }

    /// Close the queue terminally: every outstanding command fails with
    /// [`KvError::Closed`] and later enqueues are rejected.
    pub fn close(&self) -> usize {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.closed = true;
        inner.sender = None;

        let mut failed = 0;
        for mut cmd in inner.pending.drain(..).chain(inner.buffered.drain(..)) {
            cmd.settle_failure(KvError::Closed);
            failed += 1;
        }
        failed
    }

    /// Whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Whether a transaction block is currently open.
    pub fn in_transaction(&self) -> bool {
        self.inner.lock().in_transaction
    }

    /// Number of commands awaiting replies.
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Number of commands awaiting an active transport.
    pub fn buffered_len(&self) -> usize {
        self.inner.lock().buffered.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
