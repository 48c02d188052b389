// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Commands and their single-assignment result handles.
//!
//! A [`Command`] pairs one encoded request frame with the decoder for its
//! reply and a [`Completion`] handle. The dispatch queue completes each
//! command exactly once: success, failure, or cancellation — whichever
//! settles first wins, later writers are ignored.
//!
//! [`Completion`] serves both call styles over the same pipeline: it
//! implements `Future` for async callers and offers a condvar-backed
//! `wait_timeout` for the blocking bridge, so blocking never touches a
//! worker thread.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::borrow::Cow;
use std::sync::Arc;

use crate::error::{KvError, Result};
use crate::protocol::wire::{self, WireReply};

// ============================================================================
// Completion handle
// ============================================================================

/// Observable lifecycle phase of a [`Completion`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionPhase {
    /// No writer has settled the handle yet.
    Pending,

    /// Settled with a value.
    Completed,

    /// Settled with an error.
    Failed,

    /// Cancelled before a value or error arrived.
    Cancelled,
}

enum CompletionState<T> {
    Pending { wakers: Vec<Waker> },
    Done(Result<T>),
    Cancelled,
}

struct CompletionInner<T> {
    state: Mutex<CompletionState<T>>,
    cond: Condvar,
}

/// Single-assignment result handle for one command.
///
/// Exactly one writer settles the handle; any number of readers may await
/// it (as a `Future`) or block on it with a timeout. A settle attempt
/// against an already-settled handle reports `false` and changes nothing,
/// which is how a late reply loses the race against a timeout cancellation.
pub struct Completion<T> {
    inner: Arc<CompletionInner<T>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("phase", &self.phase())
            .finish()
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Completion<T> {
    /// Create a pending handle.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CompletionInner {
                state: Mutex::new(CompletionState::Pending { wakers: Vec::new() }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Settle with a value. Returns `false` if the handle was already
    /// settled (the value is dropped).
    pub fn complete(&self, value: T) -> bool {
        self.settle(CompletionState::Done(Ok(value)))
    }

    /// Settle with an error. Returns `false` if already settled.
    pub fn fail(&self, err: KvError) -> bool {
        self.settle(CompletionState::Done(Err(err)))
    }

    /// Cancel the handle. Returns `false` if already settled.
    pub fn cancel(&self) -> bool {
        self.settle(CompletionState::Cancelled)
    }

    fn settle(&self, next: CompletionState<T>) -> bool {
        let mut state = self.inner.state.lock();
        if !matches!(&*state, CompletionState::Pending { .. }) {
            return false;
        }
        let prev = std::mem::replace(&mut *state, next);
        drop(state);
        self.inner.cond.notify_all();
        if let CompletionState::Pending { wakers } = prev {
            for waker in wakers {
                waker.wake();
            }
        }
        true
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> CompletionPhase {
        match &*self.inner.state.lock() {
            CompletionState::Pending { .. } => CompletionPhase::Pending,
            CompletionState::Done(Ok(_)) => CompletionPhase::Completed,
            CompletionState::Done(Err(_)) => CompletionPhase::Failed,
            CompletionState::Cancelled => CompletionPhase::Cancelled,
        }
    }

    /// Whether any writer has settled the handle.
    pub fn is_settled(&self) -> bool {
        self.phase() != CompletionPhase::Pending
    }
}

impl<T: Clone> Completion<T> {
    /// Snapshot the result without blocking. `None` while pending.
    ///
    /// A cancelled handle reads as [`KvError::Interrupted`].
    pub fn try_result(&self) -> Option<Result<T>> {
        match &*self.inner.state.lock() {
            CompletionState::Pending { .. } => None,
            CompletionState::Done(result) => Some(result.clone()),
            CompletionState::Cancelled => Some(Err(KvError::Interrupted)),
        }
    }

    /// Block the calling thread until the handle settles or the timeout
    /// elapses. Returns `None` on timeout; the handle itself is untouched
    /// (callers decide whether to cancel).
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            match &*state {
                CompletionState::Pending { .. } => {}
                CompletionState::Done(result) => return Some(result.clone()),
                CompletionState::Cancelled => return Some(Err(KvError::Interrupted)),
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            if self
                .inner
                .cond
                .wait_for(&mut state, deadline - now)
                .timed_out()
            {
                // Re-check once; a writer may have settled just before the
                // timeout fired.
                return match &*state {
                    CompletionState::Pending { .. } => None,
                    CompletionState::Done(result) => Some(result.clone()),
                    CompletionState::Cancelled => Some(Err(KvError::Interrupted)),
                };
            }
        }
    }
}

impl<T: Clone> Future for Completion<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.inner.state.lock();
        match &mut *state {
            CompletionState::Pending { wakers } => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
            CompletionState::Done(result) => Poll::Ready(result.clone()),
            CompletionState::Cancelled => Poll::Ready(Err(KvError::Interrupted)),
        }
    }
}

// ============================================================================
// Reply decoders
// ============================================================================

/// Decodes one wire reply into a typed command output.
///
/// Command builders supply the decoder; the engine never interprets
/// argument or reply semantics itself. Returning [`KvError::Decode`] marks
/// the reply as unmatchable, which is fatal to the connection.
pub trait ReplyDecoder: Send + 'static {
    /// Decoded output type.
    type Output: Clone + Send + 'static;

    /// Decode the reply.
    fn decode(&mut self, reply: WireReply) -> Result<Self::Output>;
}

// ============================================================================
// Command
// ============================================================================

/// One protocol request: keyword, encoded frame, reply decoder, handle.
///
/// Immutable after creation except for completion state. The `MULTI` and
/// `EXEC` control keywords are built with the guard exemption set; every
/// other command is subject to the transaction guard.
pub struct Command<D: ReplyDecoder> {
    keyword: Cow<'static, str>,
    frame: Bytes,
    decoder: D,
    handle: Completion<D::Output>,
    skips_tx_guard: bool,
    created_at: Instant,
}

impl<D: ReplyDecoder> Command<D> {
    /// Build a command from a keyword and pre-encoded arguments.
    pub fn new(keyword: impl Into<Cow<'static, str>>, args: &[Vec<u8>], decoder: D) -> Self {
        let keyword = keyword.into();
        let frame = wire::encode_request(&keyword, args);
        Self {
            keyword,
            frame,
            decoder,
            handle: Completion::new(),
            skips_tx_guard: false,
            created_at: Instant::now(),
        }
    }

    /// Mark this command as exempt from the transaction guard.
    ///
    /// Only the two transaction-control commands set this.
    pub fn guard_exempt(mut self) -> Self {
        self.skips_tx_guard = true;
        self
    }

    /// The result handle for this command.
    pub fn handle(&self) -> Completion<D::Output> {
        self.handle.clone()
    }

    /// The protocol keyword.
    pub fn keyword(&self) -> &str {
        &self.keyword
    }
}

/// Type-erased view of a command held by the dispatch queue.
pub trait QueuedCommand: Send {
    /// Protocol keyword of the request.
    fn keyword(&self) -> &str;

    /// The encoded request frame (cheaply cloneable for replay).
    fn frame(&self) -> Bytes;

    /// Whether this command bypasses the transaction guard.
    fn skips_tx_guard(&self) -> bool;

    /// Time since the command was created.
    fn age(&self) -> Duration;

    /// Settle with a decoded reply.
    ///
    /// An error reply fails the handle but is not fatal; a reply the
    /// decoder cannot match returns `Err`, which forces a reconnect.
    fn settle_reply(&mut self, reply: WireReply) -> Result<()>;

    /// Settle with a failure.
    fn settle_failure(&mut self, err: KvError);

    /// Cancel the pending handle.
    fn settle_cancel(&mut self);
}

impl<D: ReplyDecoder> QueuedCommand for Command<D> {
    fn keyword(&self) -> &str {
        &self.keyword
    }

    fn frame(&self) -> Bytes {
        self.frame.clone()
    }

    fn skips_tx_guard(&self) -> bool {
        self.skips_tx_guard
    }

    fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn settle_reply(&mut self, reply: WireReply) -> Result<()> {
        if let WireReply::Error(message) = reply {
            self.handle.fail(KvError::Server(message));
            return Ok(());
        }

        match self.decoder.decode(reply) {
            Ok(value) => {
                if !self.handle.complete(value) {
                    // The caller already observed a timeout or cancellation;
                    // the late reply must not resurrect the handle.
                    log::debug!(
                        "[DISPATCH] discarding late reply for {} ({}ms old)",
                        self.keyword,
                        self.age().as_millis()
                    );
                }
                Ok(())
            }
            Err(err) => {
                self.handle.fail(err.clone());
                Err(err)
            }
        }
    }

    fn settle_failure(&mut self, err: KvError) {
        self.handle.fail(err);
    }

    fn settle_cancel(&mut self) {
        self.handle.cancel();
    }
}

// ============================================================================
// Tests
// ============================================================================
