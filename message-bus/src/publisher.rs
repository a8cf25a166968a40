//! Message publisher with retry logic

use async_nats::HeaderMap;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::{
    client::NatsClient,
    metrics::{MESSAGE_PUBLISH_DURATION, MESSAGE_PUBLISH_TOTAL},
    types::Topic,
    Error, Result,
};

/// Header JetStream uses to discard duplicate publishes
pub const MSG_ID_HEADER: &str = "Nats-Msg-Id";

/// Anything that can durably publish a payload to a topic
#[async_trait]
pub trait BusPublisher: Send + Sync {
    /// Publish `payload` to `topic`. Returns once the bus has persisted it.
    ///
    /// `dedup_key` is attached as the message id; a second publish with the
    /// same key inside the stream's duplicate window is dropped by the bus.
    async fn publish(&self, topic: Topic, payload: Bytes, dedup_key: Option<&str>) -> Result<()>;
}

/// Publisher configuration
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Max retry attempts
    pub max_retry_attempts: u32,

    /// Initial retry delay
    pub initial_retry_delay: Duration,

    /// Max retry delay
    pub max_retry_delay: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            initial_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(2),
        }
    }
}

/// JetStream publisher
#[derive(Debug, Clone)]
pub struct JetStreamPublisher {
    client: Arc<NatsClient>,
    config: PublisherConfig,
}

impl JetStreamPublisher {
    /// Create new publisher
    pub fn new(client: Arc<NatsClient>, config: PublisherConfig) -> Self {
        Self { client, config }
    }

    /// Publish with exponential backoff retry
    async fn publish_with_retry(&self, topic: Topic, payload: Bytes, dedup_key: Option<&str>) -> Result<()> {
        let mut attempts = 0;
        let mut delay = self.config.initial_retry_delay;

        loop {
            attempts += 1;

            match self.publish_once(topic, payload.clone(), dedup_key).await {
                Ok(()) => {
                    if attempts > 1 {
                        info!(topic = %topic, attempts, "Message published after retry");
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempts >= self.config.max_retry_attempts {
                        error!(topic = %topic, attempts, error = %e, "Failed to publish");
                        return Err(e);
                    }

                    warn!(
                        topic = %topic,
                        attempt = attempts,
                        retry_in = ?delay,
                        error = %e,
                        "Publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;

                    // Exponential backoff
                    delay = (delay * 2).min(self.config.max_retry_delay);
                }
            }
        }
    }

    /// Single publish attempt, waiting for the stream's ack
    async fn publish_once(&self, topic: Topic, payload: Bytes, dedup_key: Option<&str>) -> Result<()> {
        let js = self.client.jetstream();

        let ack_future = match dedup_key {
            Some(key) => {
                let mut headers = HeaderMap::new();
                headers.insert(MSG_ID_HEADER, key);
                js.publish_with_headers(topic.subject().to_string(), headers, payload)
                    .await
            }
            None => js.publish(topic.subject().to_string(), payload).await,
        }
        .map_err(|e| Error::Publish(e.to_string()))?;

        let ack = ack_future
            .await
            .map_err(|e| Error::Publish(format!("publish ack failed: {}", e)))?;

        if ack.duplicate {
            debug!(topic = %topic, key = ?dedup_key, sequence = ack.sequence, "Duplicate publish discarded by stream");
        }

        Ok(())
    }
}

#[async_trait]
impl BusPublisher for JetStreamPublisher {
    async fn publish(&self, topic: Topic, payload: Bytes, dedup_key: Option<&str>) -> Result<()> {
        let start = Instant::now();

        let result = self.publish_with_retry(topic, payload, dedup_key).await;

        MESSAGE_PUBLISH_DURATION
            .with_label_values(&[topic.subject()])
            .observe(start.elapsed().as_secs_f64());

        let status = if result.is_ok() { "success" } else { "error" };
        MESSAGE_PUBLISH_TOTAL
            .with_label_values(&[topic.subject(), status])
            .inc();

        result
    }
}
