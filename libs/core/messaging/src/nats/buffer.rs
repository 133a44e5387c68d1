//! JetStream implementation of [`Buffer`].

use crate::buffer::{AckHandle, Buffer, QueueMessage};
use crate::error::QueueError;
use crate::nats::config::JetStreamConfig;
use async_nats::jetstream::consumer::pull::Config as ConsumerConfig;
use async_nats::jetstream::consumer::{AckPolicy, PullConsumer};
use async_nats::jetstream::stream::Config as StreamConfig;
use async_nats::jetstream::{AckKind, Context, Message};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Stream information.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub stream_name: String,
    pub messages: u64,
    pub first_sequence: u64,
    pub last_sequence: u64,
}

/// Buffer backed by a JetStream stream and a durable pull consumer.
///
/// The stream and consumer are created on first use, so constructing the
/// buffer never talks to the server.
pub struct JetStreamBuffer {
    jetstream: Context,
    config: JetStreamConfig,
    subject: String,
    consumer: OnceCell<PullConsumer>,
}

impl JetStreamBuffer {
    /// Connect to the server named in `config`.
    pub async fn connect(config: JetStreamConfig) -> Result<Self, QueueError> {
        let client = async_nats::ConnectOptions::new()
            .name(format!("caelus-{}", config.name))
            .connect(&config.url)
            .await
            .map_err(QueueError::transport)?;

        info!(url = %config.url, buffer = %config.name, "Connected to NATS");
        Ok(Self::new(async_nats::jetstream::new(client), config))
    }

    pub fn new(jetstream: Context, config: JetStreamConfig) -> Self {
        let subject = config.subject();
        Self {
            jetstream,
            config,
            subject,
            consumer: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &JetStreamConfig {
        &self.config
    }

    /// Ensure the stream exists, creating it if necessary.
    async fn ensure_stream(&self) -> Result<(), QueueError> {
        match self.jetstream.get_stream(&self.config.name).await {
            Ok(_) => {
                debug!(stream = %self.config.name, "Stream already exists");
                Ok(())
            }
            Err(_) => {
                info!(
                    stream = %self.config.name,
                    subject = %self.subject,
                    "Creating stream"
                );

                self.jetstream
                    .create_stream(StreamConfig {
                        name: self.config.name.clone(),
                        subjects: vec![self.subject.clone()],
                        max_age: self.config.max_age,
                        ..Default::default()
                    })
                    .await
                    .map_err(QueueError::transport)?;
                Ok(())
            }
        }
    }

    /// Get or create the durable consumer.
    async fn consumer(&self) -> Result<&PullConsumer, QueueError> {
        self.consumer
            .get_or_try_init(|| self.init_consumer())
            .await
    }

    async fn init_consumer(&self) -> Result<PullConsumer, QueueError> {
        self.ensure_stream().await?;

        let stream = self
            .jetstream
            .get_stream(&self.config.name)
            .await
            .map_err(QueueError::transport)?;

        let durable = &self.config.durable_name;
        match stream.get_consumer::<ConsumerConfig>(durable).await {
            Ok(consumer) => {
                debug!(consumer = %durable, "Consumer already exists");
                Ok(consumer)
            }
            Err(_) => {
                info!(
                    consumer = %durable,
                    stream = %self.config.name,
                    "Creating consumer"
                );
                stream
                    .create_consumer(ConsumerConfig {
                        durable_name: Some(durable.clone()),
                        name: Some(durable.clone()),
                        ack_policy: AckPolicy::Explicit,
                        ack_wait: self.config.ack_wait,
                        max_deliver: self.config.max_deliver,
                        filter_subject: self.subject.clone(),
                        ..Default::default()
                    })
                    .await
                    .map_err(QueueError::transport)
            }
        }
    }

    /// Get stream info.
    pub async fn stream_info(&self) -> Result<StreamInfo, QueueError> {
        let mut stream = self
            .jetstream
            .get_stream(&self.config.name)
            .await
            .map_err(QueueError::transport)?;
        let info = stream.info().await.map_err(QueueError::transport)?;

        Ok(StreamInfo {
            stream_name: self.config.name.clone(),
            messages: info.state.messages,
            first_sequence: info.state.first_sequence,
            last_sequence: info.state.last_sequence,
        })
    }
}

#[async_trait]
impl Buffer for JetStreamBuffer {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn enqueue(&self, item: &str) -> Result<u64, QueueError> {
        self.consumer().await?;

        let ack = self
            .jetstream
            .publish(self.subject.clone(), item.to_string().into())
            .await
            .map_err(QueueError::publish)?
            .await
            .map_err(QueueError::publish)?;

        debug!(
            stream = %self.config.name,
            sequence = ack.sequence,
            "Published item"
        );
        Ok(ack.sequence)
    }

    async fn dequeue(&self) -> Result<QueueMessage, QueueError> {
        let consumer = self.consumer().await?;

        let mut messages = consumer
            .fetch()
            .max_messages(1)
            .expires(self.config.fetch_timeout)
            .messages()
            .await
            .map_err(QueueError::transport)?;

        let message = match messages.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(QueueError::transport(e)),
            None => return Err(QueueError::NotAvailable),
        };

        let (sequence, delivery_count) = match message.info() {
            Ok(info) => (info.stream_sequence, info.delivered as u32),
            Err(e) => {
                warn!(error = %e, "Failed to get message info, using defaults");
                (0, 1)
            }
        };

        let payload = match String::from_utf8(message.payload.to_vec()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(sequence, error = %e, "Terminating non-UTF-8 message");
                if let Err(term_err) = message.ack_with(AckKind::Term).await {
                    warn!(error = %term_err, "Failed to terminate bad message");
                }
                return Err(QueueError::Malformed(format!("sequence {sequence}: {e}")));
            }
        };

        Ok(QueueMessage::new(
            payload,
            sequence,
            delivery_count,
            Box::new(JetStreamAck {
                message,
                acked: AtomicBool::new(false),
            }),
        ))
    }
}

struct JetStreamAck {
    message: Message,
    acked: AtomicBool,
}

#[async_trait]
impl AckHandle for JetStreamAck {
    async fn ack(&self) -> Result<(), QueueError> {
        if self.acked.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.message.ack().await.map_err(|e| {
            self.acked.store(false, Ordering::Release);
            QueueError::Ack(e.to_string())
        })
    }
}
