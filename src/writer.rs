//! Dedicated reply writer task.
//!
//! Every reply a server produces goes through one writer task that owns the
//! sending side of the server's connection. Workers hand finished replies
//! over an mpsc channel; the writer drains the channel in batches and sends
//! each reply through the connection.
//!
//! # Architecture
//!
//! ```text
//! Worker 1 ─┐
//! Worker 2 ─┼─► mpsc::Sender<Reply> ─► Writer Task ─► BusConnection
//! Worker N ─┘
//! ```
//!
//! Closing the channel (dropping every [`WriterHandle`]) ends the task once
//! all queued replies are sent, which is what server shutdown awaits.

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bus::BusConnection;
use crate::error::{BusrpcError, Result};
use crate::message::{Message, Reply};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum replies drained per wake-up.
const MAX_BATCH_SIZE: usize = 64;

/// Configuration for the writer task.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Replies queued before workers wait for the writer.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl WriterConfig {
    /// Reject values the writer cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(BusrpcError::InvalidConfig(
                "writer channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// What the writer did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterSummary {
    /// Replies handed to the bus.
    pub sent: u64,
    /// Replies the bus refused.
    pub failed: u64,
}

/// Handle for queueing replies to the writer task.
///
/// Cheaply cloneable; one clone per worker. A full queue makes the sender
/// wait; a queued reply is never discarded.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Reply>,
}

impl WriterHandle {
    /// Handle on a bare channel, without a writer task.
    #[cfg(test)]
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<Reply>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue a reply, waiting for room in the queue.
    ///
    /// Fails only when the writer task is gone.
    pub async fn send(&self, reply: Reply) -> Result<()> {
        self.tx
            .send(reply)
            .await
            .map_err(|_| BusrpcError::Disconnected)
    }

    /// Queue a reply from a plain OS thread, blocking while the queue is full.
    ///
    /// Must not be called from inside the async runtime.
    pub fn blocking_send(&self, reply: Reply) -> Result<()> {
        self.tx
            .blocking_send(reply)
            .map_err(|_| BusrpcError::Disconnected)
    }
}

/// Spawn the writer task for `conn`.
///
/// Returns the handle workers queue replies on, and the task's `JoinHandle`
/// which completes once every handle is dropped and the queue is empty.
pub fn spawn_writer_task(
    conn: BusConnection,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<WriterSummary>) {
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let task = tokio::spawn(writer_loop(rx, conn));
    (WriterHandle { tx }, task)
}

async fn writer_loop(mut rx: mpsc::Receiver<Reply>, conn: BusConnection) -> WriterSummary {
    let mut summary = WriterSummary::default();
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    loop {
        let Some(first) = rx.recv().await else {
            tracing::debug!(
                "Reply writer for {} done: {} sent, {} failed",
                conn.unique_name(),
                summary.sent,
                summary.failed
            );
            return summary;
        };

        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(reply) => batch.push(reply),
                Err(_) => break,
            }
        }

        for reply in batch.drain(..) {
            let target = reply.header.destination.clone();
            let serial = reply.reply_serial();
            match conn.send(Message::Reply(reply)) {
                Ok(_) => summary.sent += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(
                        "Failed to send reply to {:?} (serial {:?}): {}",
                        target,
                        serial,
                        e
                    );
                }
            }
        }
    }
}
