// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared client resources: worker pool, DNS resolution, buffer
//! allocation, default reconnect delay, and event publication.
//!
//! Resources are heavyweight and intended to be shared by many
//! connections. Ownership is explicit: the handle returned by the builder
//! is *owned* and may shut the pool down; handles created with
//! [`ResourceHandle::share`] are *shared* and may not. A connection shuts
//! the pool down on close only when it holds an owned handle.
//!
//! ```text
//! builder -----> ResourceHandle (owned)
//!                     | share()        | share()
//!                     v                v
//!               handle (shared)  handle (shared)   ...N connections
//! ```
//!
//! Shutdown drains a quiet period before forcing termination at the
//! timeout, and is rejected while shared handles are still outstanding.

use std::io;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

use crate::backoff::{Delay, ExponentialDelay};
use crate::error::{KvError, Result};
use crate::protocol::command::Completion;

/// Default quiet period before forced shutdown.
pub const DEFAULT_SHUTDOWN_QUIET_PERIOD: Duration = Duration::from_secs(2);

/// Default shutdown timeout.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

// ============================================================================
// DNS resolution
// ============================================================================

/// Resolves host names to IP addresses for the connector.
pub trait DnsResolver: Send + Sync {
    /// Resolve a host name. An empty result is treated as a failure by
    /// callers.
    fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemDns;

impl DnsResolver for SystemDns {
    fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = (host, 0u16).to_socket_addrs()?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

// ============================================================================
// Event publication
// ============================================================================

/// Connection lifecycle events published to external listeners.
#[derive(Clone, Debug)]
pub enum ClientEvent {
    /// A transport became active.
    Activated {
        /// Remote endpoint.
        addr: String,
    },

    /// The active transport was lost.
    Inactive {
        /// Remote endpoint.
        addr: String,
    },

    /// A reconnect is about to be attempted.
    ReconnectAttempt {
        /// Remote endpoint.
        addr: String,
        /// Attempt number, starting at 1.
        attempt: u64,
        /// Backoff delay scheduled before this attempt.
        delay: Duration,
    },

    /// The connection was closed by the caller.
    ClosedByUser {
        /// Remote endpoint.
        addr: String,
    },
}

/// Receives [`ClientEvent`]s. Implementations must not block.
pub trait EventSink: Send + Sync {
    /// Publish one event.
    fn publish(&self, event: &ClientEvent);
}

/// Sink that forwards events to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: &ClientEvent) {
        log::debug!("[EVENT] {:?}", event);
    }
}

// ============================================================================
// Resource pool
// ============================================================================

struct ResourcesInner {
    /// Owned runtime; `None` when attached to an ambient runtime or
    /// already shut down.
    runtime: Mutex<Option<Runtime>>,

    /// Spawn handle onto the worker pool.
    handle: Handle,

    /// Shutdown has begun; reconnect scheduling observes this.
    shutting_down: AtomicBool,

    /// Outstanding shared handles.
    shared_handles: AtomicUsize,

    dns: Arc<dyn DnsResolver>,
    sink: Arc<dyn EventSink>,
    reconnect_delay: Arc<dyn Delay>,
    worker_threads: usize,
}

impl Drop for ResourcesInner {
    fn drop(&mut self) {
        // A runtime must not be dropped from async context; hand it to a
        // plain thread if the pool was never shut down explicitly.
        if let Some(runtime) = self.runtime.lock().take() {
            std::thread::spawn(move || drop(runtime));
        }
    }
}

/// Handle to a shared resource pool.
///
/// Carries an ownership flag: only the owned handle (the one the builder
/// returned) can shut the pool down.
pub struct ResourceHandle {
    inner: Arc<ResourcesInner>,
    owned: bool,
}

impl ResourceHandle {
    /// Create a pool with default settings and an owned runtime.
    pub fn create_default() -> Result<Self> {
        ResourcesBuilder::new().build()
    }

    /// Builder for customized pools.
    pub fn builder() -> ResourcesBuilder {
        ResourcesBuilder::new()
    }

    /// Derive a shared (non-owning) handle for another connection.
    pub fn share(&self) -> ResourceHandle {
        self.inner.shared_handles.fetch_add(1, Ordering::SeqCst);
        ResourceHandle {
            inner: self.inner.clone(),
            owned: false,
        }
    }

    /// Whether this handle owns the pool.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Spawn a task onto the worker pool.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.handle.spawn(future)
    }

    /// The pool's DNS resolver.
    pub fn dns(&self) -> Arc<dyn DnsResolver> {
        self.inner.dns.clone()
    }

    /// The pool's event sink.
    pub fn event_sink(&self) -> Arc<dyn EventSink> {
        self.inner.sink.clone()
    }

    /// The pool's default reconnect delay.
    pub fn reconnect_delay(&self) -> Arc<dyn Delay> {
        self.inner.reconnect_delay.clone()
    }

    /// Number of worker threads backing I/O and timers (0 when attached
    /// to an ambient runtime).
    pub fn io_thread_count(&self) -> usize {
        self.inner.worker_threads
    }

    /// Allocate a write buffer.
    pub fn alloc_buffer(&self, capacity: usize) -> BytesMut {
        BytesMut::with_capacity(capacity)
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Shut down with default quiet period and timeout.
    pub fn shutdown(&self) -> Completion<bool> {
        self.shutdown_with(DEFAULT_SHUTDOWN_QUIET_PERIOD, DEFAULT_SHUTDOWN_TIMEOUT)
    }

    /// Shut the pool down.
    ///
    /// The returned handle eventually completes `true` on success. It
    /// completes `false` without tearing anything down when this handle
    /// is not the owner, when shared handles are still outstanding, when
    /// the pool is attached to an ambient runtime, or when shutdown
    /// already ran.
    pub fn shutdown_with(&self, quiet_period: Duration, timeout: Duration) -> Completion<bool> {
        let ack: Completion<bool> = Completion::new();

        if !self.owned {
            log::debug!("[RESOURCES] shutdown rejected: handle is shared");
            ack.complete(false);
            return ack;
        }
        let shared = self.inner.shared_handles.load(Ordering::SeqCst);
        if shared > 0 {
            log::debug!(
                "[RESOURCES] shutdown rejected: {} shared handles outstanding",
                shared
            );
            ack.complete(false);
            return ack;
        }

        let Some(runtime) = self.inner.runtime.lock().take() else {
            ack.complete(false);
            return ack;
        };
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        let done = ack.clone();
        std::thread::Builder::new()
            .name("kvlink-shutdown".into())
            .spawn(move || {
                std::thread::sleep(quiet_period);
                runtime.shutdown_timeout(timeout);
                done.complete(true);
            })
            .expect("spawn shutdown thread");

        ack
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        if !self.owned {
            self.inner.shared_handles.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`ResourceHandle`].
pub struct ResourcesBuilder {
    worker_threads: usize,
    thread_name: String,
    attach_current: bool,
    dns: Option<Arc<dyn DnsResolver>>,
    sink: Option<Arc<dyn EventSink>>,
    reconnect_delay: Option<Arc<dyn Delay>>,
}

impl Default for ResourcesBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourcesBuilder {
    /// Start from defaults.
    pub fn new() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            worker_threads: cores.clamp(2, 8),
            thread_name: "kvlink-worker".into(),
            attach_current: false,
            dns: None,
            sink: None,
            reconnect_delay: None,
        }
    }

    /// Number of worker threads for the owned runtime.
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Name prefix for worker threads.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Reuse the ambient tokio runtime instead of owning one.
    ///
    /// An attached pool cannot be shut down through this crate.
    pub fn attach_current(mut self) -> Self {
        self.attach_current = true;
        self
    }

    /// Replace the DNS resolver.
    pub fn dns(mut self, dns: Arc<dyn DnsResolver>) -> Self {
        self.dns = Some(dns);
        self
    }

    /// Replace the event sink.
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replace the default reconnect delay.
    pub fn reconnect_delay(mut self, delay: Arc<dyn Delay>) -> Self {
        self.reconnect_delay = Some(delay);
        self
    }

    /// Build the pool; the returned handle is the owner.
    pub fn build(self) -> Result<ResourceHandle> {
        let (runtime, handle, threads) = if self.attach_current {
            let handle = Handle::try_current().map_err(|_| {
                KvError::InvalidArgument(
                    "attach_current requires an ambient tokio runtime".into(),
                )
            })?;
            (None, handle, 0)
        } else {
            if self.worker_threads == 0 {
                return Err(KvError::InvalidArgument(
                    "worker thread count must be greater than 0".into(),
                ));
            }
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(self.worker_threads)
                .thread_name(&self.thread_name)
                .enable_all()
                .build()
                .map_err(KvError::from)?;
            let handle = runtime.handle().clone();
            (Some(runtime), handle, self.worker_threads)
        };

        Ok(ResourceHandle {
            inner: Arc::new(ResourcesInner {
                runtime: Mutex::new(runtime),
                handle,
                shutting_down: AtomicBool::new(false),
                shared_handles: AtomicUsize::new(0),
                dns: self.dns.unwrap_or_else(|| Arc::new(SystemDns)),
                sink: self.sink.unwrap_or_else(|| Arc::new(LogSink)),
                reconnect_delay: self
                    .reconnect_delay
                    .unwrap_or_else(|| Arc::new(ExponentialDelay::default_reconnect())),
                worker_threads: threads,
            }),
            owned: true,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn owned_pool_runs_tasks() {
        let pool = ResourcesBuilder::new().worker_threads(2).build().unwrap();

        let (tx, rx) = mpsc::channel();
        let _ = pool.spawn(async move {
            tx.send(7usize).unwrap();
        });

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
        assert!(pool
            .shutdown_with(Duration::ZERO, Duration::from_secs(5))
            .wait_timeout(Duration::from_secs(10))
            .unwrap()
            .unwrap());
    }

    #[test]
    fn shutdown_rejected_while_shared_handles_live() {
        let pool = ResourcesBuilder::new().worker_threads(2).build().unwrap();
        let shared = pool.share();

        let rejected = pool
            .shutdown_with(Duration::ZERO, Duration::from_secs(1))
            .wait_timeout(Duration::from_secs(5))
            .unwrap()
            .unwrap();
        assert!(!rejected);

        drop(shared);
        let accepted = pool
            .shutdown_with(Duration::ZERO, Duration::from_secs(5))
            .wait_timeout(Duration::from_secs(10))
            .unwrap()
            .unwrap();
        assert!(accepted);
    }

    #[test]
    fn shared_handle_cannot_shut_down() {
        let pool = ResourcesBuilder::new().worker_threads(2).build().unwrap();
        let shared = pool.share();

        assert!(!shared.is_owned());
        let rejected = shared
            .shutdown()
            .wait_timeout(Duration::from_secs(5))
            .unwrap()
            .unwrap();
        assert!(!rejected);
    }

    #[test]
    fn second_shutdown_reports_failure() {
        let pool = ResourcesBuilder::new().worker_threads(2).build().unwrap();

        assert!(pool
            .shutdown_with(Duration::ZERO, Duration::from_secs(5))
            .wait_timeout(Duration::from_secs(10))
            .unwrap()
            .unwrap());
        assert!(pool.is_shutting_down());

        let again = pool
            .shutdown_with(Duration::ZERO, Duration::from_secs(5))
            .wait_timeout(Duration::from_secs(5))
            .unwrap()
            .unwrap();
        assert!(!again);
    }

    #[tokio::test]
    async fn attached_pool_spawns_but_rejects_shutdown() {
        let pool = ResourcesBuilder::new().attach_current().build().unwrap();
        assert_eq!(pool.io_thread_count(), 0);

        let handle = pool.spawn(async { 41 + 1 });
        assert_eq!(handle.await.unwrap(), 42);

        let rejected = pool.shutdown();
        // Settled synchronously; no blocking wait needed on a runtime thread.
        assert_eq!(rejected.try_result().unwrap().unwrap(), false);
    }

    #[test]
    fn system_dns_resolves_localhost() {
        let ips = SystemDns.resolve("localhost").unwrap();
        assert!(ips.iter().any(|ip| ip.is_loopback()));
    }

    #[test]
    fn zero_worker_threads_rejected() {
        let err = ResourcesBuilder::new().worker_threads(0).build();
        assert!(matches!(err, Err(KvError::InvalidArgument(_))));
    }
}
