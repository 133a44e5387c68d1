//! NATS JetStream buffer backend.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  <name>.new  ┌─────────────────────┐  durable "CONS"  ┌────────────┐
//! │  enqueue   │─────────────▶│  JetStream stream   │─────────────────▶│  dequeue   │
//! └────────────┘              │      <name>         │   explicit ack   └────────────┘
//!                             └─────────────────────┘
//! ```
//!
//! Every worker that reads a buffer shares the same durable pull consumer, so
//! each stored item is handed to exactly one of them at a time.

mod buffer;
mod config;

pub use buffer::{JetStreamBuffer, StreamInfo};
pub use config::{JetStreamConfig, DEFAULT_DURABLE_NAME};
