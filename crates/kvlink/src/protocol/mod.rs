// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Protocol pipeline: commands, wire codec, dispatch, batching,
//! transport, and the connection state machine.
//!
//! # Architecture
//!
//! ```text
//! +-------------------------------------------------------------+
//! |                        Connection                            |
//! |  +----------------+   +--------------------------------+    |
//! |  | DispatchQueue  |   |       Reconnect Watchdog        |    |
//! |  | pending (FIFO) |   | attempts / backoff / one timer  |    |
//! |  +-------+--------+   +--------------------------------+    |
//! |          | frames                        ^ loss              |
//! |  +-------v--------+   +-----------------+---------------+   |
//! |  |  Writer task   |   |          Reader task             |   |
//! |  | batching/flush |   | WireDecoder -> queue.on_reply()  |   |
//! |  +-------+--------+   +-----------------+---------------+   |
//! |          |                              |                    |
//! |  +-------v------------------------------+---------------+   |
//! |  |              BoxedTransport (duplex bytes)            |   |
//! |  +-------------------------------------------------------+  |
//! +-------------------------------------------------------------+
//! ```
//!
//! # Modules
//!
//! - `wire` - request encoding and the incremental reply decoder
//! - `command` - commands, reply decoders, completion handles
//! - `dispatch` - per-connection FIFO dispatch queue
//! - `batch` - outbound batching/flush scheduler
//! - `transport` - transport boundary and the TCP connector
//! - `connection` - state machine and reconnect watchdog

pub mod batch;
pub mod command;
pub mod connection;
pub mod dispatch;
pub mod transport;
pub mod wire;

// ============================================================================
// Re-exports
// ============================================================================

pub use batch::{BatchOptions, DEFAULT_BATCH_SIZE, DEFAULT_WRITE_SPIN_COUNT};
pub use command::{Command, Completion, CompletionPhase, QueuedCommand, ReplyDecoder};
pub use connection::{Connection, ConnectionStats, LinkState, StatsSnapshot};
pub use dispatch::{DispatchQueue, EnqueueOutcome, ReconnectPolicy};
pub use transport::{BoxedTransport, Connector, RemoteAddr, TcpConnector, Transport};
pub use wire::{WireDecoder, WireReply, DEFAULT_MAX_REPLY_SIZE};
