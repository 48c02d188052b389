// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection lifecycle: state machine, reconnect watchdog, and the
//! reader/writer tasks driving one transport.
//!
//! # State Machine
//!
//! ```text
//!      +--------------+
//!      | Disconnected |
//!      +------+-------+
//!             | connect()
//!             v
//!      +--------------+   established    +--------+
//!      |  Connecting  |----------------->| Active |
//!      +------+-------+                  +---+----+
//!             ^  | (retry, backoff)          | transport lost
//!             |  v                           v
//!             | self                    +----------+
//!             +<------------------------| Inactive |
//!             |                         +----------+
//!             v close()
//!      +--------------+
//!      |   Closing    |   (terminal)
//!      +--------------+
//! ```
//!
//! Reconnection is armed only when the transport reports loss while
//! `listen_on_inactive` is set, reconnection is not suspended, nothing is
//! already scheduled, the dispatch queue is still open, and the backing
//! worker pool is not shutting down. Each schedule increments the attempt
//! counter and arms a one-shot timer on the shared worker pool; a
//! successful activation resets the counter (and any stateful delay).
//!
//! Every live transport is driven by a conduit: a reader task that feeds
//! decoded replies to the dispatch queue and a writer task running the
//! batching flush scheduler. Conduits carry the generation number of the
//! activation that spawned them so a stale conduit's loss report cannot
//! disturb a newer transport.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;

use crate::backoff::Delay;
use crate::config::ConnectionConfig;
use crate::error::{KvError, Result};
use crate::protocol::batch;
use crate::protocol::command::{Completion, QueuedCommand};
use crate::protocol::dispatch::{DispatchQueue, EnqueueOutcome};
use crate::protocol::transport::{BoxedTransport, Connector, RemoteAddr};
use crate::protocol::wire::WireDecoder;
use crate::resource::{ClientEvent, EventSink, ResourceHandle};

/// Quiet window for repeated reconnect-failure logging. Suppressed
/// attempts still run, only their visibility drops to debug.
pub const RECONNECT_LOG_QUIET: Duration = Duration::from_secs(5);

// ============================================================================
// Connection state
// ============================================================================

/// Connection state machine states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// No connection attempt made yet.
    Disconnected,

    /// Transport establishment in progress (initial or retry).
    Connecting,

    /// Transport established and operational.
    Active,

    /// Transport lost; reconnection may be scheduled.
    Inactive,

    /// Explicitly closed (terminal).
    Closing,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkState::Disconnected => "Disconnected",
            LinkState::Connecting => "Connecting",
            LinkState::Active => "Active",
            LinkState::Inactive => "Inactive",
            LinkState::Closing => "Closing",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters for one connection.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    dispatched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    reconnect_attempts: AtomicU64,
}

/// Point-in-time view of [`ConnectionStats`].
#[derive(Clone, Copy, Debug, Default)]
pub struct StatsSnapshot {
    /// Commands accepted by the dispatch queue.
    pub dispatched: u64,

    /// Commands completed by replies.
    pub completed: u64,

    /// Commands failed (loss, close).
    pub failed: u64,

    /// Reconnect attempts scheduled.
    pub reconnect_attempts: u64,
}

impl ConnectionStats {
    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

struct StateCell {
    state: LinkState,

    /// Bumped on every activation; conduit tasks carry the generation
    /// they were spawned under.
    generation: u64,
}

struct Watchdog {
    /// Consecutive failed attempts since the last activation.
    attempts: u64,

    /// The single authoritative scheduled-reconnect slot.
    scheduled: Option<JoinHandle<()>>,

    /// Last time a reconnect failure was logged at full volume.
    last_failure_log: Option<Instant>,
}

#[derive(Default)]
struct ConduitTasks {
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

struct ConnectionInner {
    addr: RemoteAddr,
    config: ConnectionConfig,
    resources: ResourceHandle,
    connector: Arc<dyn Connector>,
    queue: Arc<DispatchQueue>,
    delay: Arc<dyn Delay>,
    sink: Arc<dyn EventSink>,

    state: Mutex<StateCell>,
    watchdog: Mutex<Watchdog>,
    conduit: Mutex<ConduitTasks>,

    /// Auto-reconnect on transport loss.
    listen_on_inactive: AtomicBool,

    /// Reconnection suspended (set by prepare-close).
    suspended: AtomicBool,

    /// Prepare-close latch and its acknowledgment.
    close_requested: AtomicBool,
    close_ack: Completion<()>,

    /// Close latch; teardown runs once.
    closed: AtomicBool,

    stats: ConnectionStats,
}

impl ConnectionInner {
    fn emit(&self, event: ClientEvent) {
        self.sink.publish(&event);
    }
}

/// One resilient connection to a remote endpoint.
///
/// Cheap to clone; all clones share the same underlying connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Establish the initial transport and return the live connection.
    ///
    /// The initial attempt fails fast; automatic reconnection only covers
    /// losses after a successful activation.
    pub async fn connect(
        addr: RemoteAddr,
        config: ConnectionConfig,
        resources: ResourceHandle,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        config.validate()?;

        let delay = config
            .reconnect_delay
            .clone()
            .unwrap_or_else(|| resources.reconnect_delay());
        let sink = resources.event_sink();
        let auto_reconnect = config.auto_reconnect;

        let inner = Arc::new(ConnectionInner {
            addr,
            config,
            resources,
            connector,
            queue: Arc::new(DispatchQueue::new()),
            delay,
            sink,
            state: Mutex::new(StateCell {
                state: LinkState::Disconnected,
                generation: 0,
            }),
            watchdog: Mutex::new(Watchdog {
                attempts: 0,
                scheduled: None,
                last_failure_log: None,
            }),
            conduit: Mutex::new(ConduitTasks::default()),
            listen_on_inactive: AtomicBool::new(auto_reconnect),
            suspended: AtomicBool::new(false),
            close_requested: AtomicBool::new(false),
            close_ack: Completion::new(),
            closed: AtomicBool::new(false),
            stats: ConnectionStats::default(),
        });

        inner.state.lock().state = LinkState::Connecting;
        let transport = inner
            .connector
            .connect(&inner.addr)
            .await
            .map_err(KvError::from)?;
        activate(&inner, transport);

        Ok(Self { inner })
    }

    /// Enqueue a command for dispatch (asynchronous path, no guard).
    ///
    /// While no transport is active the command is buffered if automatic
    /// reconnection will eventually deliver it, otherwise it fails with
    /// [`KvError::ConnectionUnavailable`].
    pub fn dispatch(&self, cmd: Box<dyn QueuedCommand>) -> Result<EnqueueOutcome> {
        self.dispatch_inner(cmd, false)
    }

    /// Enqueue a command on behalf of the blocking bridge.
    ///
    /// Identical to [`Connection::dispatch`] except that the transaction
    /// guard is enforced, atomically with the enqueue.
    pub fn dispatch_guarded(&self, cmd: Box<dyn QueuedCommand>) -> Result<EnqueueOutcome> {
        self.dispatch_inner(cmd, true)
    }

    fn dispatch_inner(
        &self,
        cmd: Box<dyn QueuedCommand>,
        enforce_tx_guard: bool,
    ) -> Result<EnqueueOutcome> {
        let buffer = self.inner.listen_on_inactive.load(Ordering::SeqCst)
            && !self.inner.suspended.load(Ordering::SeqCst);
        let outcome = self.inner.queue.enqueue(cmd, buffer, enforce_tx_guard)?;
        self.inner.stats.dispatched.fetch_add(1, Ordering::Relaxed);
        Ok(outcome)
    }

    /// Disable future reconnection and acknowledge the close request.
    ///
    /// Idempotent: every call observes the same acknowledgment, and only
    /// the first call performs the state change.
    pub fn prepare_close(&self) -> Completion<()> {
        let inner = &self.inner;
        if !inner.close_requested.swap(true, Ordering::SeqCst) {
            inner.listen_on_inactive.store(false, Ordering::SeqCst);
            inner.suspended.store(true, Ordering::SeqCst);
            if let Some(handle) = inner.watchdog.lock().scheduled.take() {
                handle.abort();
            }
            inner.close_ack.complete(());
            log::debug!("[CONNECTION] {} prepare close acknowledged", inner.addr);
        }
        inner.close_ack.clone()
    }

    /// Close the connection terminally.
    ///
    /// Outstanding commands fail with [`KvError::Closed`]; a privately
    /// owned resource pool is shut down with it.
    pub fn close(&self) {
        self.prepare_close();

        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut cell = inner.state.lock();
            cell.state = LinkState::Closing;
            // Invalidate live conduits' loss reports.
            cell.generation += 1;
        }

        let failed = inner.queue.close();
        if failed > 0 {
            inner.stats.failed.fetch_add(failed as u64, Ordering::Relaxed);
        }

        {
            let mut conduit = inner.conduit.lock();
            if let Some(handle) = conduit.reader.take() {
                handle.abort();
            }
            if let Some(handle) = conduit.writer.take() {
                handle.abort();
            }
        }

        inner.emit(ClientEvent::ClosedByUser {
            addr: inner.addr.to_string(),
        });
        log::debug!("[CONNECTION] {} closed", inner.addr);

        if inner.resources.is_owned() {
            // Dedicated pool goes down with its connection; shared pools
            // are left to their owner.
            let _ = inner.resources.shutdown();
        }
    }

    /// Current state machine state.
    pub fn state(&self) -> LinkState {
        self.inner.state.lock().state
    }

    /// Whether the transport is currently active.
    pub fn is_active(&self) -> bool {
        self.state() == LinkState::Active
    }

    /// Consecutive failed reconnect attempts since the last activation.
    pub fn attempts(&self) -> u64 {
        self.inner.watchdog.lock().attempts
    }

    /// Whether a transaction block is open on this connection.
    pub fn in_transaction(&self) -> bool {
        self.inner.queue.in_transaction()
    }

    /// Configured blocking-invocation timeout.
    pub fn command_timeout(&self) -> Duration {
        self.inner.config.command_timeout
    }

    /// Remote endpoint.
    pub fn addr(&self) -> &RemoteAddr {
        &self.inner.addr
    }

    /// Counter snapshot.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }
}

// ============================================================================
// Activation and conduits
// ============================================================================

/// Promote an established transport: spawn its conduit, re-arm the
/// dispatch queue, reset the watchdog.
fn activate(inner: &Arc<ConnectionInner>, transport: BoxedTransport) {
    let generation = {
        let mut cell = inner.state.lock();
        if cell.state == LinkState::Closing {
            // Raced an explicit close; the fresh transport is dropped.
            return;
        }
        cell.generation += 1;
        cell.state = LinkState::Active;
        cell.generation
    };

    let (read_half, write_half) = tokio::io::split(transport);
    let (tx, rx) = mpsc::unbounded_channel();

    let reader = inner
        .resources
        .spawn(run_reader(inner.clone(), read_half, generation));
    let writer = inner
        .resources
        .spawn(run_writer_task(inner.clone(), write_half, rx, generation));

    {
        let mut conduit = inner.conduit.lock();
        conduit.reader = Some(reader);
        conduit.writer = Some(writer);
    }

    {
        let mut watchdog = inner.watchdog.lock();
        watchdog.attempts = 0;
        if let Some(handle) = watchdog.scheduled.take() {
            handle.abort();
        }
    }
    inner.delay.reset();

    let replayed = inner.queue.on_activated(tx);
    if replayed > 0 {
        log::debug!(
            "[CONNECTION] {} wrote {} buffered frames on activation",
            inner.addr,
            replayed
        );
    }

    inner.emit(ClientEvent::Activated {
        addr: inner.addr.to_string(),
    });
    log::debug!(
        "[CONNECTION] {} active (generation {})",
        inner.addr,
        generation
    );
}

/// Reader half of a conduit: decode replies and feed the dispatch queue.
async fn run_reader(
    inner: Arc<ConnectionInner>,
    mut read_half: ReadHalf<BoxedTransport>,
    generation: u64,
) {
    let mut decoder = WireDecoder::new(inner.config.max_reply_size);
    let mut buf = BytesMut::with_capacity(8 * 1024);

    loop {
        match read_half.read_buf(&mut buf).await {
            Ok(0) => {
                log::debug!("[CONNECTION] {} transport closed by peer", inner.addr);
                break;
            }
            Ok(_) => {
                decoder.feed(&buf);
                buf.clear();
                loop {
                    match decoder.next() {
                        Ok(Some(reply)) => match inner.queue.on_reply(reply) {
                            Ok(()) => {
                                inner.stats.completed.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(err) => {
                                log::warn!(
                                    "[CONNECTION] {} unmatched reply: {}",
                                    inner.addr,
                                    err
                                );
                                on_transport_loss(&inner, generation);
                                return;
                            }
                        },
                        Ok(None) => break,
                        Err(err) => {
                            log::warn!("[CONNECTION] {} decode failed: {}", inner.addr, err);
                            on_transport_loss(&inner, generation);
                            return;
                        }
                    }
                }
            }
            Err(err) => {
                log::debug!("[CONNECTION] {} read failed: {}", inner.addr, err);
                break;
            }
        }
    }

    on_transport_loss(&inner, generation);
}

/// Writer half of a conduit: the batching flush scheduler.
async fn run_writer_task(
    inner: Arc<ConnectionInner>,
    write_half: WriteHalf<BoxedTransport>,
    rx: UnboundedReceiver<Bytes>,
    generation: u64,
) {
    if let Err(err) = batch::run_writer(write_half, rx, inner.config.batch.clone()).await {
        log::debug!("[CONNECTION] {} write failed: {}", inner.addr, err);
        on_transport_loss(&inner, generation);
    }
}

// ============================================================================
// Loss handling and the reconnect watchdog
// ============================================================================

/// React to transport loss reported by a conduit of `generation`.
///
/// Stale generations (a conduit outlived by a newer activation) are
/// ignored, as are repeated reports for the same loss.
fn on_transport_loss(inner: &Arc<ConnectionInner>, generation: u64) {
    {
        let mut cell = inner.state.lock();
        if cell.generation != generation || cell.state != LinkState::Active {
            return;
        }
        cell.state = LinkState::Inactive;
    }

    let failed = inner.queue.on_connection_lost(inner.config.reconnect_policy);
    if failed > 0 {
        inner
            .stats
            .failed
            .fetch_add(failed as u64, Ordering::Relaxed);
        log::debug!(
            "[CONNECTION] {} failed {} in-flight commands on loss",
            inner.addr,
            failed
        );
    }

    inner.emit(ClientEvent::Inactive {
        addr: inner.addr.to_string(),
    });

    maybe_schedule_reconnect(inner);
}

/// Arm a reconnect timer if every gate allows it.
fn maybe_schedule_reconnect(inner: &Arc<ConnectionInner>) {
    if !inner.listen_on_inactive.load(Ordering::SeqCst)
        || inner.suspended.load(Ordering::SeqCst)
    {
        log::debug!("[WATCHDOG] {} reconnect scheduling disabled", inner.addr);
        return;
    }
    if inner.queue.is_closed() {
        log::debug!(
            "[WATCHDOG] {} skip reconnect, dispatch queue closed",
            inner.addr
        );
        return;
    }
    if inner.resources.is_shutting_down() {
        log::debug!(
            "[WATCHDOG] {} skip reconnect, worker pool shutting down",
            inner.addr
        );
        return;
    }

    let (attempt, delay) = {
        let mut watchdog = inner.watchdog.lock();
        let still_armed = watchdog
            .scheduled
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        if still_armed {
            return;
        }
        watchdog.scheduled = None;
        watchdog.attempts += 1;
        (watchdog.attempts, inner.delay.delay(watchdog.attempts))
    };

    inner
        .stats
        .reconnect_attempts
        .fetch_add(1, Ordering::Relaxed);
    log::debug!(
        "[WATCHDOG] {} scheduling reconnect attempt {} in {:?}",
        inner.addr,
        attempt,
        delay
    );

    let task_inner = inner.clone();
    let handle = inner.resources.spawn(async move {
        tokio::time::sleep(delay).await;
        run_reconnect(task_inner, attempt, delay).await;
    });
    inner.watchdog.lock().scheduled = Some(handle);
}

/// One reconnect attempt after its backoff delay has elapsed.
async fn run_reconnect(inner: Arc<ConnectionInner>, attempt: u64, delay: Duration) {
    // Timer fired; release the schedule slot.
    inner.watchdog.lock().scheduled.take();

    if !inner.listen_on_inactive.load(Ordering::SeqCst)
        || inner.suspended.load(Ordering::SeqCst)
        || inner.queue.is_closed()
        || inner.resources.is_shutting_down()
    {
        log::debug!("[WATCHDOG] {} reconnect cancelled before attempt", inner.addr);
        return;
    }

    {
        let mut cell = inner.state.lock();
        if cell.state == LinkState::Closing {
            return;
        }
        cell.state = LinkState::Connecting;
    }

    inner.emit(ClientEvent::ReconnectAttempt {
        addr: inner.addr.to_string(),
        attempt,
        delay,
    });

    let should_log = {
        let mut watchdog = inner.watchdog.lock();
        let now = Instant::now();
        match watchdog.last_failure_log {
            Some(prev) if now.duration_since(prev) < RECONNECT_LOG_QUIET => false,
            _ => {
                watchdog.last_failure_log = Some(now);
                true
            }
        }
    };

    if should_log {
        log::info!(
            "[WATCHDOG] {} reconnecting, attempt {}",
            inner.addr,
            attempt
        );
    } else {
        log::debug!(
            "[WATCHDOG] {} reconnecting, attempt {} (log volume throttled)",
            inner.addr,
            attempt
        );
    }

    match inner.connector.connect(&inner.addr).await {
        Ok(transport) => activate(&inner, transport),
        Err(err) => {
            if should_log {
                log::warn!("[WATCHDOG] {} cannot connect: {}", inner.addr, err);
            } else {
                log::debug!("[WATCHDOG] {} cannot connect: {}", inner.addr, err);
            }
            if !inner.suspended.load(Ordering::SeqCst) {
                maybe_schedule_reconnect(&inner);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
