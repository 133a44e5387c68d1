//! In-process buffer backend.
//!
//! Mirrors the JetStream semantics the pipeline relies on: FIFO delivery,
//! explicit acknowledgement and redelivery after the ack deadline. Delivery
//! attempts are unlimited unless `max_deliver` is set. Used by tests and
//! single-process runs.

use crate::buffer::{AckHandle, Buffer, QueueMessage};
use crate::error::QueueError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Settings for [`MemoryBuffer`].
#[derive(Debug, Clone)]
pub struct MemoryBufferConfig {
    /// How long a delivered item stays invisible before redelivery
    pub ack_wait: Duration,
    /// How long `dequeue` waits for an item before reporting `NotAvailable`
    pub fetch_timeout: Duration,
    /// Deliveries after which an unacknowledged item is dropped (0 = unlimited)
    pub max_deliver: u32,
}

impl Default for MemoryBufferConfig {
    fn default() -> Self {
        Self {
            ack_wait: Duration::from_secs(30),
            fetch_timeout: Duration::from_millis(200),
            max_deliver: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    sequence: u64,
    payload: String,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct State {
    next_sequence: u64,
    pending: VecDeque<Entry>,
    in_flight: HashMap<u64, (Entry, Instant)>,
}

impl State {
    /// Move expired in-flight entries back to the front of the queue.
    fn reclaim_expired(&mut self, now: Instant, max_deliver: u32) {
        let mut expired: Vec<Entry> = self
            .in_flight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(_, (entry, _))| entry.clone())
            .collect();

        if expired.is_empty() {
            return;
        }

        expired.sort_by_key(|entry| std::cmp::Reverse(entry.sequence));
        for entry in expired {
            self.in_flight.remove(&entry.sequence);
            if max_deliver > 0 && entry.deliveries >= max_deliver {
                warn!(
                    sequence = entry.sequence,
                    deliveries = entry.deliveries,
                    "Dropping item after max deliveries"
                );
                continue;
            }
            self.pending.push_front(entry);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.in_flight.values().map(|(_, deadline)| *deadline).min()
    }
}

/// FIFO buffer held in process memory.
#[derive(Clone)]
pub struct MemoryBuffer {
    name: String,
    config: MemoryBufferConfig,
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
}

impl MemoryBuffer {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, MemoryBufferConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: MemoryBufferConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Arc::new(Mutex::new(State {
                next_sequence: 1,
                ..Default::default()
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Items waiting for delivery.
    pub fn pending_len(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Items delivered and not yet acknowledged.
    pub fn in_flight_len(&self) -> usize {
        lock(&self.state).in_flight.len()
    }

    /// Payloads waiting for delivery, in delivery order.
    pub fn pending_items(&self) -> Vec<String> {
        lock(&self.state)
            .pending
            .iter()
            .map(|entry| entry.payload.clone())
            .collect()
    }

    /// True when nothing is pending or in flight.
    pub fn is_drained(&self) -> bool {
        let state = lock(&self.state);
        state.pending.is_empty() && state.in_flight.is_empty()
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Buffer for MemoryBuffer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, item: &str) -> Result<u64, QueueError> {
        let sequence = {
            let mut state = lock(&self.state);
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.pending.push_back(Entry {
                sequence,
                payload: item.to_string(),
                deliveries: 0,
            });
            sequence
        };
        self.notify.notify_one();

        debug!(buffer = %self.name, sequence, "Enqueued item");
        Ok(sequence)
    }

    async fn dequeue(&self) -> Result<QueueMessage, QueueError> {
        let give_up = Instant::now() + self.config.fetch_timeout;

        loop {
            let now = Instant::now();
            let wake_at = {
                let mut state = lock(&self.state);
                state.reclaim_expired(now, self.config.max_deliver);

                if let Some(mut entry) = state.pending.pop_front() {
                    entry.deliveries += 1;
                    let sequence = entry.sequence;
                    let deliveries = entry.deliveries;
                    let payload = entry.payload.clone();
                    state
                        .in_flight
                        .insert(sequence, (entry, now + self.config.ack_wait));

                    return Ok(QueueMessage::new(
                        payload,
                        sequence,
                        deliveries,
                        Box::new(MemoryAck {
                            sequence,
                            state: Arc::clone(&self.state),
                        }),
                    ));
                }

                match state.next_deadline() {
                    Some(deadline) if deadline < give_up => deadline,
                    _ => give_up,
                }
            };

            if now >= give_up {
                return Err(QueueError::NotAvailable);
            }

            let _ = tokio::time::timeout_at(wake_at, self.notify.notified()).await;
        }
    }
}

struct MemoryAck {
    sequence: u64,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl AckHandle for MemoryAck {
    async fn ack(&self) -> Result<(), QueueError> {
        let mut state = lock(&self.state);
        if state.in_flight.remove(&self.sequence).is_none() {
            // Reclaimed but not yet redelivered: the late ack still wins.
            state.pending.retain(|entry| entry.sequence != self.sequence);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_buffer(ack_wait_ms: u64, max_deliver: u32) -> MemoryBuffer {
        MemoryBuffer::with_config(
            "test",
            MemoryBufferConfig {
                ack_wait: Duration::from_millis(ack_wait_ms),
                fetch_timeout: Duration::from_millis(50),
                max_deliver,
            },
        )
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let buffer = MemoryBuffer::new("mails");
        let items: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(buffer.enqueue_batch(&items).await.unwrap(), 3);

        for expected in ["a", "b", "c"] {
            let message = buffer.dequeue().await.unwrap();
            assert_eq!(message.payload(), expected);
            buffer.mark_consumed(&message).await.unwrap();
        }
        assert!(buffer.is_drained());
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let buffer = MemoryBuffer::new("mails");
        assert_eq!(buffer.enqueue_batch(&[]).await.unwrap(), 0);
        assert!(buffer.is_drained());
    }

    #[tokio::test]
    async fn test_empty_queue_reports_not_available() {
        let buffer = fast_buffer(1_000, 0);
        let err = buffer.dequeue().await.unwrap_err();
        assert!(err.is_not_available());
    }

    #[tokio::test]
    async fn test_unacked_item_is_redelivered() {
        let buffer = fast_buffer(20, 0);
        buffer.enqueue("m1").await.unwrap();

        let first = buffer.dequeue().await.unwrap();
        assert_eq!(first.delivery_count, 1);
        drop(first);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = buffer.dequeue().await.unwrap();
        assert_eq!(second.payload(), "m1");
        assert!(second.is_redelivery());
    }

    #[tokio::test]
    async fn test_duplicate_ack_is_noop() {
        let buffer = MemoryBuffer::new("mails");
        buffer.enqueue("m1").await.unwrap();
        let message = buffer.dequeue().await.unwrap();

        buffer.mark_consumed(&message).await.unwrap();
        buffer.mark_consumed(&message).await.unwrap();
        assert!(buffer.is_drained());
    }

    #[tokio::test]
    async fn test_late_ack_removes_expired_item() {
        let buffer = fast_buffer(10, 0);
        buffer.enqueue("m1").await.unwrap();
        let message = buffer.dequeue().await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        buffer.mark_consumed(&message).await.unwrap();

        assert!(buffer.dequeue().await.unwrap_err().is_not_available());
        assert!(buffer.is_drained());
    }

    #[tokio::test]
    async fn test_ack_of_stale_delivery_settles_redelivered_item() {
        let buffer = fast_buffer(10, 0);
        buffer.enqueue("m1").await.unwrap();
        buffer.enqueue("m2").await.unwrap();
        let stale = buffer.dequeue().await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let again = buffer.dequeue().await.unwrap();
        assert_eq!(again.payload(), "m1");

        buffer.mark_consumed(&stale).await.unwrap();
        buffer.mark_consumed(&again).await.unwrap();
        assert_eq!(buffer.in_flight_len(), 0);
        assert_eq!(buffer.pending_items(), vec!["m2".to_string()]);
    }

    #[tokio::test]
    async fn test_max_deliver_drops_item() {
        let buffer = fast_buffer(5, 2);
        buffer.enqueue("poison").await.unwrap();

        let _first = buffer.dequeue().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = buffer.dequeue().await.unwrap();
        assert_eq!(second.delivery_count, 2);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(buffer.dequeue().await.unwrap_err().is_not_available());
        assert!(buffer.is_drained());
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let buffer = MemoryBuffer::with_config(
            "wake",
            MemoryBufferConfig {
                fetch_timeout: Duration::from_secs(5),
                ..Default::default()
            },
        );
        let producer = buffer.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.enqueue("late").await.unwrap();
        });

        let message = buffer.dequeue().await.unwrap();
        assert_eq!(message.payload(), "late");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_each_item_delivered_to_one_consumer() {
        let buffer = MemoryBuffer::new("shared");
        for i in 0..20 {
            buffer.enqueue(&i.to_string()).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let buffer = buffer.clone();
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Ok(message) = buffer.dequeue().await {
                    seen.push(message.payload().to_string());
                    buffer.mark_consumed(&message).await.unwrap();
                }
                seen
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort_by_key(|s| s.parse::<u32>().unwrap());
        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(all, expected);
    }
}
