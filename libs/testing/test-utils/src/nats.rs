//! NATS test infrastructure
//!
//! Provides a `TestNats` helper that starts a NATS container with JetStream.

use async_nats::Client;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::nats::Nats;

/// Test NATS wrapper that ensures proper cleanup
///
/// The container is stopped and removed when this struct is dropped.
///
/// # Example
///
/// ```no_run
/// use test_utils::TestNats;
///
/// # async fn example() {
/// let nats = TestNats::new().await;
/// let url = nats.connection_string();
/// let jetstream = nats.jetstream();
/// # let _ = (url, jetstream);
/// # }
/// ```
pub struct TestNats {
    #[allow(dead_code)]
    container: ContainerAsync<Nats>,
    client: Client,
    host: String,
    port: u16,
    connection_string: String,
}

impl TestNats {
    /// Start a NATS server with JetStream enabled (`-js`).
    pub async fn new() -> Self {
        let container = Nats::default()
            .with_tag("latest")
            .with_cmd(["-js"])
            .start()
            .await
            .expect("Failed to start NATS container");

        let port = container
            .get_host_port_ipv4(4222)
            .await
            .expect("Failed to get NATS port");

        let host = "127.0.0.1".to_string();
        let connection_string = format!("nats://{host}:{port}");

        let client = async_nats::connect(&connection_string)
            .await
            .expect("Failed to connect to NATS");

        tracing::info!(port, "Test NATS ready with JetStream");

        Self {
            container,
            client,
            host,
            port,
            connection_string,
        }
    }

    /// Get a cloned client
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Get a JetStream context for stream operations
    pub fn jetstream(&self) -> async_nats::jetstream::Context {
        async_nats::jetstream::new(self.client.clone())
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the connection string for manual client creation
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}

impl Drop for TestNats {
    fn drop(&mut self) {
        tracing::debug!("Cleaning up test NATS container");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_nats_jetstream_available() {
        let nats = TestNats::new().await;
        let jetstream = nats.jetstream();

        jetstream
            .create_stream(async_nats::jetstream::stream::Config {
                name: "smoke".to_string(),
                subjects: vec!["smoke.new".to_string()],
                ..Default::default()
            })
            .await
            .expect("Failed to create stream");

        let ack = jetstream
            .publish("smoke.new", "hello".into())
            .await
            .expect("Failed to publish")
            .await
            .expect("Failed to get ack");

        assert_eq!(ack.sequence, 1);
        assert!(nats.connection_string().ends_with(&nats.port().to_string()));
    }
}
