//! NATS connection and JetStream stream bootstrap

use async_nats::jetstream::{
    self,
    stream::{Config as StreamConfig, RetentionPolicy, StorageType},
};
use std::time::Duration;
use tracing::info;

use crate::{types::Topic, Error, Result};

/// Connection and stream settings
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// Server URL, e.g. `nats://localhost:4222`
    pub url: String,

    /// Client name reported to the server
    pub connection_name: String,

    /// How long a stream keeps messages
    pub max_age: Duration,

    /// Window in which a repeated `Nats-Msg-Id` is discarded
    pub duplicate_window: Duration,

    /// Stream replicas
    pub num_replicas: usize,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            connection_name: "ledger-service".to_string(),
            max_age: Duration::from_secs(7 * 24 * 3600),
            duplicate_window: Duration::from_secs(120),
            num_replicas: 1,
        }
    }
}

/// Connected NATS client with its JetStream context
#[derive(Clone)]
pub struct NatsClient {
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl NatsClient {
    /// Connect to the server
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        info!(url = %config.url, "Connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .name(&config.connection_name)
            .connect(config.url.as_str())
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        let jetstream = jetstream::new(client);

        Ok(Self {
            jetstream,
            config,
        })
    }

    /// JetStream context
    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }

    /// Get the stream backing `topic`, creating it on first use
    pub async fn ensure_stream(&self, topic: Topic) -> Result<jetstream::stream::Stream> {
        if let Ok(stream) = self.jetstream.get_stream(topic.stream_name()).await {
            return Ok(stream);
        }

        info!(stream = topic.stream_name(), subject = topic.subject(), "Stream not found, creating");

        self.jetstream
            .get_or_create_stream(self.stream_config(topic))
            .await
            .map_err(|e| Error::JetStream(format!("create stream {}: {}", topic.stream_name(), e)))
    }

    /// Ensure every topic stream exists
    pub async fn ensure_streams(&self) -> Result<()> {
        for topic in Topic::ALL {
            self.ensure_stream(topic).await?;
        }
        Ok(())
    }

    fn stream_config(&self, topic: Topic) -> StreamConfig {
        StreamConfig {
            name: topic.stream_name().to_string(),
            description: Some(format!("Ledger topic {}", topic.subject())),
            subjects: vec![topic.subject().to_string()],
            retention: RetentionPolicy::Limits,
            max_age: self.config.max_age,
            storage: StorageType::File,
            num_replicas: self.config.num_replicas,
            duplicate_window: self.config.duplicate_window,
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for NatsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsClient")
            .field("url", &self.config.url)
            .field("connection_name", &self.config.connection_name)
            .finish()
    }
}
