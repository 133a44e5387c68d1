//! JetStream buffer tests against a real NATS server.
//!
//! Run with: cargo test -p messaging --features nats -- --ignored

#![cfg(feature = "nats")]

use messaging::nats::{JetStreamBuffer, JetStreamConfig};
use messaging::Buffer;
use std::time::Duration;
use test_utils::TestNats;

fn buffer_config(nats: &TestNats, name: &str) -> JetStreamConfig {
    JetStreamConfig::from_host_port(nats.host(), nats.port(), name)
        .with_fetch_timeout(Duration::from_millis(500))
        .with_ack_wait(Duration::from_secs(1))
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_items_are_delivered_in_order_and_removed_on_ack() {
    let nats = TestNats::new().await;
    let buffer = JetStreamBuffer::connect(buffer_config(&nats, "mails"))
        .await
        .unwrap();

    let items = vec!["m1".to_string(), "m2".to_string(), "m3".to_string()];
    assert_eq!(buffer.enqueue_batch(&items).await.unwrap(), 3);

    for expected in &items {
        let message = buffer.dequeue().await.unwrap();
        assert_eq!(message.payload(), expected);
        buffer.mark_consumed(&message).await.unwrap();
        // Second acknowledgement is a no-op.
        buffer.mark_consumed(&message).await.unwrap();
    }

    let err = buffer.dequeue().await.unwrap_err();
    assert!(err.is_not_available());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_unacked_item_is_redelivered() {
    let nats = TestNats::new().await;
    let buffer = JetStreamBuffer::connect(buffer_config(&nats, "prompts"))
        .await
        .unwrap();

    buffer.enqueue("prompt-1").await.unwrap();
    let first = buffer.dequeue().await.unwrap();
    assert!(!first.is_redelivery());
    drop(first);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let again = buffer.dequeue().await.unwrap();
    assert_eq!(again.payload(), "prompt-1");
    assert!(again.is_redelivery());
    buffer.mark_consumed(&again).await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_stream_created_lazily_with_new_subject() {
    let nats = TestNats::new().await;
    let buffer = JetStreamBuffer::connect(buffer_config(&nats, "lazy"))
        .await
        .unwrap();

    assert!(buffer.stream_info().await.is_err());
    buffer.enqueue("x").await.unwrap();

    let info = buffer.stream_info().await.unwrap();
    assert_eq!(info.stream_name, "lazy");
    assert_eq!(info.messages, 1);

    let mut stream = nats.jetstream().get_stream("lazy").await.unwrap();
    let config = &stream.info().await.unwrap().config;
    assert_eq!(config.subjects, vec!["lazy.new".to_string()]);
}
