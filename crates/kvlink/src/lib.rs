// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # kvlink - resilient client engine for key-value wire protocols
//!
//! A client-side engine for request/response key-value protocols: typed
//! command invocations become wire-format requests, one resilient
//! connection carries them, and callers choose between an asynchronous
//! and a blocking call style over the same pipeline.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kvlink::{ConnectionConfig, KvClient, RemoteAddr, ResourceHandle};
//!
//! #[tokio::main]
//! async fn main() -> kvlink::Result<()> {
//!     let resources = ResourceHandle::create_default()?;
//!     let client = KvClient::connect(
//!         RemoteAddr::new("127.0.0.1", 6379),
//!         ConnectionConfig::default(),
//!         resources,
//!     )
//!     .await?;
//!
//!     client.set(b"greeting", b"hello").await?;
//!     assert_eq!(client.get(b"greeting").await?.as_deref(), Some(&b"hello"[..]));
//!
//!     client.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                            Caller API                               |
//! |        KvClient (async) | BlockingApi (sync bridge, timeouts)       |
//! +---------------------------------------------------------------------+
//! |                         Dispatch Layer                              |
//! |   Command -> DispatchQueue (FIFO pending) -> Completion handles     |
//! +---------------------------------------------------------------------+
//! |                        Connection Layer                             |
//! |   State machine | Reconnect watchdog (backoff) | Batching writer    |
//! +---------------------------------------------------------------------+
//! |                          Transport                                  |
//! |            Connector -> duplex byte stream (TCP)                    |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`KvClient`] | Client facade over one resilient connection |
//! | [`ResourceHandle`] | Shared worker pool, DNS, events, default backoff |
//! | [`ConnectionConfig`] | Timeouts, reconnect policy, batching options |
//! | [`Completion`] | Single-assignment pending-result handle |
//! | [`ReadPreference`] | Node selection for read traffic |
//!
//! ## Modules Overview
//!
//! - [`client`] - caller-facing facade (start here)
//! - [`protocol`] - dispatch queue, batching, connection state machine
//! - [`resource`] - shared worker pool and its lifecycle
//! - [`backoff`] - reconnect delay strategies
//! - [`routing`] - topology node selection
//! - [`blocking`] - the synchronous call style

pub mod backoff;
pub mod blocking;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod protocol;
pub mod resource;
pub mod routing;

// ============================================================================
// Re-exports
// ============================================================================

pub use backoff::{ConstantDelay, Delay, ExponentialDelay, TrackingDelay};
pub use blocking::BlockingApi;
pub use client::KvClient;
pub use config::ConnectionConfig;
pub use error::{KvError, Result};
pub use protocol::{
    BatchOptions, Command, Completion, CompletionPhase, Connection, LinkState, ReconnectPolicy,
    RemoteAddr, WireReply,
};
pub use resource::{ClientEvent, EventSink, ResourceHandle, ResourcesBuilder};
pub use routing::{CidrBlock, NodeCandidate, NodeRole, ReadPreference};
