//! The durable queue contract shared by every buffer backend.

use crate::error::QueueError;
use async_trait::async_trait;
use std::fmt;

/// Acknowledgement half of a delivered message.
///
/// Implementations must make a second acknowledgement of the same delivery a
/// no-op success.
#[async_trait]
pub trait AckHandle: Send + Sync {
    async fn ack(&self) -> Result<(), QueueError>;
}

/// A single delivery from a buffer.
///
/// The message stays in flight until [`Buffer::mark_consumed`] is called.
/// Dropping it without acknowledgement leaves it eligible for redelivery once
/// the backend's ack deadline passes.
pub struct QueueMessage {
    payload: String,
    /// Backend sequence number of the stored item
    pub sequence: u64,
    /// Number of times this item has been delivered, including this one
    pub delivery_count: u32,
    handle: Box<dyn AckHandle>,
}

impl QueueMessage {
    pub fn new(
        payload: impl Into<String>,
        sequence: u64,
        delivery_count: u32,
        handle: Box<dyn AckHandle>,
    ) -> Self {
        Self {
            payload: payload.into(),
            sequence,
            delivery_count,
            handle,
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Check if this is a redelivery.
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }

    pub(crate) async fn ack(&self) -> Result<(), QueueError> {
        self.handle.ack().await
    }
}

impl fmt::Debug for QueueMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueMessage")
            .field("payload", &self.payload)
            .field("sequence", &self.sequence)
            .field("delivery_count", &self.delivery_count)
            .finish_non_exhaustive()
    }
}

/// Durable, at-least-once FIFO of text items.
///
/// Items are delivered in publication order per consumer group. An item is
/// removed only after [`mark_consumed`](Buffer::mark_consumed); an item that
/// is delivered and never acknowledged is delivered again later.
#[async_trait]
pub trait Buffer: Send + Sync {
    /// Logical name of the queue.
    fn name(&self) -> &str;

    /// Append one item. Returns the assigned sequence number.
    async fn enqueue(&self, item: &str) -> Result<u64, QueueError>;

    /// Append each item in order. Returns how many were appended.
    ///
    /// An empty batch succeeds without touching the backend. On error, items
    /// before the failing one may already be durable.
    async fn enqueue_batch(&self, items: &[String]) -> Result<usize, QueueError> {
        for item in items {
            self.enqueue(item).await?;
        }
        Ok(items.len())
    }

    /// Deliver the next available item, waiting up to the backend's fetch
    /// timeout. Returns [`QueueError::NotAvailable`] when nothing arrived.
    async fn dequeue(&self) -> Result<QueueMessage, QueueError>;

    /// Acknowledge a delivered item so it is never delivered again.
    async fn mark_consumed(&self, message: &QueueMessage) -> Result<(), QueueError> {
        message.ack().await
    }
}
