//! Durable queue abstractions for the content pipeline.
//!
//! A [`Buffer`] is an at-least-once FIFO of text items with explicit
//! acknowledgement. Two backends are provided:
//!
//! - [`MemoryBuffer`]: in-process, for tests and single-process runs
//! - `nats::JetStreamBuffer` (feature `nats`): JetStream stream + durable pull consumer
//!
//! # Example
//!
//! ```ignore
//! use messaging::{Buffer, MemoryBuffer};
//!
//! let buffer = MemoryBuffer::new("mails");
//! buffer.enqueue("mail-42").await?;
//!
//! let message = buffer.dequeue().await?;
//! // ... handle message.payload() ...
//! buffer.mark_consumed(&message).await?;
//! ```

mod backoff;
mod buffer;
mod error;
mod memory;

#[cfg(feature = "nats")]
pub mod nats;

pub use backoff::PollBackoff;
pub use buffer::{AckHandle, Buffer, QueueMessage};
pub use error::{ErrorCategory, QueueError};
pub use memory::{MemoryBuffer, MemoryBufferConfig};
