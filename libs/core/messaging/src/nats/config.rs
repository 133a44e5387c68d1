//! Configuration for JetStream-backed buffers.

use std::time::Duration;

/// Durable consumer name shared by every worker reading a buffer.
pub const DEFAULT_DURABLE_NAME: &str = "CONS";

/// JetStream buffer configuration.
///
/// A buffer named `mails` maps to the stream `mails` with the single subject
/// `mails.new`, read through the durable pull consumer [`DEFAULT_DURABLE_NAME`].
#[derive(Debug, Clone)]
pub struct JetStreamConfig {
    /// Server URL (e.g. `nats://localhost:4222`)
    pub url: String,

    /// Stream name; also the subject prefix
    pub name: String,

    /// Durable consumer name
    pub durable_name: String,

    /// How long a delivered message may stay unacknowledged before redelivery
    pub ack_wait: Duration,

    /// How long a single dequeue waits for a message
    pub fetch_timeout: Duration,

    /// Maximum deliveries per message (-1 = unlimited)
    pub max_deliver: i64,

    /// Maximum age of stored messages
    pub max_age: Duration,
}

impl JetStreamConfig {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Build the server URL from a host and port pair.
    pub fn from_host_port(host: &str, port: u16, name: impl Into<String>) -> Self {
        Self::new(format!("nats://{host}:{port}"), name)
    }

    /// Subject items are published to.
    pub fn subject(&self) -> String {
        format!("{}.new", self.name)
    }

    pub fn with_durable_name(mut self, durable_name: impl Into<String>) -> Self {
        self.durable_name = durable_name.into();
        self
    }

    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    pub fn with_max_deliver(mut self, max_deliver: i64) -> Self {
        self.max_deliver = max_deliver;
        self
    }
}

impl Default for JetStreamConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            name: "mails".to_string(),
            durable_name: DEFAULT_DURABLE_NAME.to_string(),
            ack_wait: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(5),
            max_deliver: -1,
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}
