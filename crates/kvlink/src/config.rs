// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection configuration.
//!
//! Plain struct with public fields; construct with struct-update syntax
//! over [`Default::default`] and validate eagerly before connecting:
//!
//! ```
//! use kvlink::config::ConnectionConfig;
//! use std::time::Duration;
//!
//! let config = ConnectionConfig {
//!     command_timeout: Duration::from_secs(5),
//!     auto_reconnect: true,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::backoff::Delay;
use crate::error::Result;
use crate::protocol::batch::BatchOptions;
use crate::protocol::dispatch::ReconnectPolicy;
use crate::protocol::wire::DEFAULT_MAX_REPLY_SIZE;

/// Default blocking-invocation timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Default transport connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for one connection.
#[derive(Clone)]
pub struct ConnectionConfig {
    // === Timeouts ===
    /// Deadline for blocking invocations.
    pub command_timeout: Duration,

    /// Deadline for establishing a transport.
    pub connect_timeout: Duration,

    // === Resilience ===
    /// Reconnect automatically when the transport is lost.
    pub auto_reconnect: bool,

    /// What happens to in-flight commands across a reconnect.
    pub reconnect_policy: ReconnectPolicy,

    /// Reconnect backoff; `None` uses the resource pool's default.
    pub reconnect_delay: Option<Arc<dyn Delay>>,

    // === Outbound batching ===
    /// Batching/flush scheduling options.
    pub batch: BatchOptions,

    // === Protocol limits ===
    /// Maximum accepted size of a single reply.
    pub max_reply_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            auto_reconnect: true,
            reconnect_policy: ReconnectPolicy::default(),
            reconnect_delay: None,
            batch: BatchOptions::default(),
            max_reply_size: DEFAULT_MAX_REPLY_SIZE,
        }
    }
}

impl ConnectionConfig {
    /// Configure an exponential reconnect backoff.
    ///
    /// `step` is the base time unit multiplied by the growth factor;
    /// bounds and base are validated eagerly.
    pub fn backoff(
        mut self,
        lower: Duration,
        upper: Duration,
        step: Duration,
        base: u32,
    ) -> Result<Self> {
        let delay = crate::backoff::ExponentialDelay::with_step(lower, upper, base, step)?;
        self.reconnect_delay = Some(Arc::new(delay));
        Ok(self)
    }

    /// Configure outbound batching.
    pub fn batching(
        mut self,
        enabled: bool,
        batch_size: usize,
        write_spin_count: usize,
        busy_loop: bool,
        busy_loop_delay: Duration,
    ) -> Result<Self> {
        let batch = BatchOptions {
            enabled,
            batch_size,
            write_spin_count,
            busy_loop,
            busy_loop_delay,
        };
        batch.validate()?;
        self.batch = batch;
        Ok(self)
    }

    /// Validate the configuration. Fails eagerly, never mid-operation.
    pub fn validate(&self) -> Result<()> {
        self.batch.validate()?;
        if self.max_reply_size == 0 {
            return Err(crate::error::KvError::InvalidArgument(
                "max reply size must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("command_timeout", &self.command_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("reconnect_policy", &self.reconnect_policy)
            .field("batch", &self.batch)
            .field("max_reply_size", &self.max_reply_size)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
