// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound batching and flush scheduling.
//!
//! The writer task sits between the dispatch queue and the transport.
//! With batching disabled (the default) every frame is written and
//! flushed on its own. With batching enabled, frames are coalesced until
//! the batch is full or the configured number of empty polls elapses,
//! then written as one contiguous buffer:
//!
//! ```text
//! dispatch --frames--> [writer task] --(batch of N)--> transport
//! ```
//!
//! Two draining modes: cooperative (yield to the scheduler between empty
//! polls) and busy-loop (sleep a fixed sub-microsecond delay instead of
//! yielding, trading CPU for latency). Neither mode ever reorders frames.

use std::io;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::{KvError, Result};

/// Default number of frames coalesced into one write.
pub const DEFAULT_BATCH_SIZE: usize = 8;

/// Default number of empty polls before a partial batch is flushed.
pub const DEFAULT_WRITE_SPIN_COUNT: usize = 16;

/// Default busy-loop delay between polls.
pub const DEFAULT_BUSY_LOOP_DELAY: Duration = Duration::from_nanos(400);

/// Batching configuration for the outbound writer.
#[derive(Clone, Debug)]
pub struct BatchOptions {
    /// Enable coalescing. Disabled means flush-per-command.
    pub enabled: bool,

    /// Maximum frames per flush.
    pub batch_size: usize,

    /// Empty polls of the frame queue before flushing a partial batch.
    pub write_spin_count: usize,

    /// Spin with a fixed delay between polls instead of yielding.
    pub busy_loop: bool,

    /// Delay between busy-loop polls.
    pub busy_loop_delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            batch_size: DEFAULT_BATCH_SIZE,
            write_spin_count: DEFAULT_WRITE_SPIN_COUNT,
            busy_loop: false,
            busy_loop_delay: DEFAULT_BUSY_LOOP_DELAY,
        }
    }
}

impl BatchOptions {
    /// Validate the configuration. Fails eagerly, never mid-operation.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(KvError::InvalidArgument(
                "batch size must be greater than 0".into(),
            ));
        }
        if self.write_spin_count == 0 {
            return Err(KvError::InvalidArgument(
                "write spin count must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Drive the outbound side of one transport until the frame channel
/// closes or the transport rejects a write.
///
/// Frames are written in exactly the order they were received.
pub(crate) async fn run_writer<W>(
    mut sink: W,
    mut rx: UnboundedReceiver<Bytes>,
    opts: BatchOptions,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch: Vec<Bytes> = Vec::with_capacity(opts.batch_size);

    loop {
        // Wait for the next frame. Busy-loop mode polls with a fixed
        // sleep; cooperative mode parks on the channel.
        let first = if opts.enabled && opts.busy_loop {
            match busy_recv(&mut rx, opts.busy_loop_delay).await {
                Some(frame) => frame,
                None => return Ok(()),
            }
        } else {
            match rx.recv().await {
                Some(frame) => frame,
                None => return Ok(()),
            }
        };

        if !opts.enabled {
            sink.write_all(&first).await?;
            sink.flush().await?;
            continue;
        }

        batch.clear();
        batch.push(first);

        let mut spins = 0;
        while batch.len() < opts.batch_size && spins < opts.write_spin_count {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(TryRecvError::Empty) => {
                    spins += 1;
                    if opts.busy_loop {
                        tokio::time::sleep(opts.busy_loop_delay).await;
                    } else {
                        tokio::task::yield_now().await;
                    }
                }
                Err(TryRecvError::Disconnected) => break,
            }
        }

        let total: usize = batch.iter().map(Bytes::len).sum();
        let mut buf = BytesMut::with_capacity(total);
        for frame in &batch {
            buf.extend_from_slice(frame);
        }

        log::trace!(
            "[BATCH] flushing {} frames ({} bytes)",
            batch.len(),
            total
        );
        sink.write_all(&buf).await?;
        sink.flush().await?;
    }
}

/// Poll the channel with a fixed sleep between attempts.
async fn busy_recv(rx: &mut UnboundedReceiver<Bytes>, delay: Duration) -> Option<Bytes> {
    loop {
        match rx.try_recv() {
            Ok(frame) => return Some(frame),
            Err(TryRecvError::Empty) => tokio::time::sleep(delay).await,
            Err(TryRecvError::Disconnected) => return None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
