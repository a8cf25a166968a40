//! Consumer-group runtime
//!
//! A group member repeatedly *claims* a share of a topic and processes the
//! claimed messages one at a time:
//!
//! - payloads that fail to decode are terminated and never redelivered
//! - a message is acknowledged only after its handler returned `Ok`
//! - a handler error naks the message and ends the claim; the member rejoins
//!   after `restart_delay` and the group redelivers
//!
//! Shutdown is observed only while waiting for the next message, so a handler
//! that has started always runs to completion.

use async_nats::jetstream::{self, consumer};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::{
    client::NatsClient,
    metrics::{CONSUMER_CLAIM_TOTAL, MESSAGE_PROCESS_DURATION, MESSAGE_RECEIVE_TOTAL},
    publisher::MSG_ID_HEADER,
    types::Topic,
    Error, Result,
};

/// Message handler trait
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Decoded payload type
    type Message: DeserializeOwned + Send;

    /// Handle a decoded message. `Ok` acknowledges it; `Err` leaves it for redelivery.
    async fn handle(&self, message: Self::Message, delivery: &Delivery) -> anyhow::Result<()>;
}

/// Per-message acknowledgment handle
#[async_trait]
pub trait Acknowledge: Send + Sync {
    /// Commit the message
    async fn ack(&self) -> Result<()>;
    /// Ask for redelivery
    async fn nak(&self) -> Result<()>;
    /// Drop the message without redelivery
    async fn term(&self) -> Result<()>;
}

/// One delivered message
pub struct Delivery {
    /// Topic it arrived on
    pub topic: Topic,
    /// Position in the topic's stream
    pub stream_sequence: u64,
    /// How many times it has been delivered, starting at 1
    pub delivered: u64,
    /// Raw payload
    pub payload: Bytes,
    /// Dedup id the publisher attached (`Nats-Msg-Id`), if any
    pub msg_id: Option<String>,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    /// Build a delivery
    pub fn new(
        topic: Topic,
        stream_sequence: u64,
        delivered: u64,
        payload: Bytes,
        acker: Box<dyn Acknowledge>,
    ) -> Self {
        Self {
            topic,
            stream_sequence,
            delivered,
            payload,
            msg_id: None,
            acker,
        }
    }

    /// Attach the publisher's dedup id
    pub fn with_msg_id(mut self, msg_id: Option<String>) -> Self {
        self.msg_id = msg_id;
        self
    }

    /// Stable identity of the message across redeliveries: `<stream>:<sequence>`
    pub fn key(&self) -> String {
        format!("{}:{}", self.topic.stream_name(), self.stream_sequence)
    }

    /// Identity of the message this one was forwarded from: the publisher's
    /// dedup id when present, otherwise [`Delivery::key`]. Unlike the stream
    /// sequence it survives a re-publish that lands outside the duplicate window.
    pub fn origin_key(&self) -> String {
        self.msg_id.clone().unwrap_or_else(|| self.key())
    }

    /// Commit
    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }

    /// Request redelivery
    pub async fn nak(&self) -> Result<()> {
        self.acker.nak().await
    }

    /// Drop permanently
    pub async fn term(&self) -> Result<()> {
        self.acker.term().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("topic", &self.topic)
            .field("stream_sequence", &self.stream_sequence)
            .field("delivered", &self.delivered)
            .field("msg_id", &self.msg_id)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Stream of claimed messages
pub type Claim = BoxStream<'static, Result<Delivery>>;

/// Membership in a consumer group for one topic
#[async_trait]
pub trait ConsumerGroup: Send + Sync {
    /// Topic this group consumes
    fn topic(&self) -> Topic;

    /// Join the group and start receiving this member's share of messages
    async fn claim(&self) -> Result<Claim>;
}

/// How a claim ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimEnd {
    /// Shutdown was requested
    Cancelled,
    /// The claim stream ran dry
    Exhausted,
}

impl ClaimEnd {
    fn as_str(&self) -> &'static str {
        match self {
            ClaimEnd::Cancelled => "cancelled",
            ClaimEnd::Exhausted => "exhausted",
        }
    }
}

/// Subscriber configuration
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Pause before rejoining the group after a claim ends
    pub restart_delay: Duration,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            restart_delay: Duration::from_secs(5),
        }
    }
}

/// Consumer group member driving a handler
pub struct Subscriber<G> {
    group: G,
    config: SubscriberConfig,
}

impl<G: ConsumerGroup> Subscriber<G> {
    /// Create new subscriber
    pub fn new(group: G, config: SubscriberConfig) -> Self {
        Self { group, config }
    }

    /// Claim and process until shutdown, rejoining after every failed or exhausted claim
    pub async fn run<H: MessageHandler>(
        &self,
        handler: Arc<H>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let topic = self.group.topic();
        info!(topic = %topic, "Consumer group member started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.consume_claim(handler.as_ref(), &mut shutdown).await {
                Ok(ClaimEnd::Cancelled) => break,
                Ok(ClaimEnd::Exhausted) => {
                    warn!(topic = %topic, "Claim ended, rejoining group");
                }
                Err(e) => {
                    error!(
                        topic = %topic,
                        error = %e,
                        retry_in = ?self.config.restart_delay,
                        "Claim aborted, rejoining group"
                    );
                }
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.restart_delay) => {}
            }
        }

        info!(topic = %topic, "Consumer group member stopped");
        Ok(())
    }

    /// Process one claim until shutdown, exhaustion or the first handler error
    pub async fn consume_claim<H: MessageHandler>(
        &self,
        handler: &H,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<ClaimEnd> {
        let topic = self.group.topic();
        let mut claim = self.group.claim().await?;

        let result = loop {
            let next = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break Ok(ClaimEnd::Cancelled);
                    }
                    continue;
                }
                next = claim.next() => next,
            };

            let delivery = match next {
                None => break Ok(ClaimEnd::Exhausted),
                Some(Err(e)) => break Err(e),
                Some(Ok(delivery)) => delivery,
            };

            if let Err(e) = self.process(handler, delivery).await {
                break Err(e);
            }
        };

        let end = match &result {
            Ok(end) => end.as_str(),
            Err(_) => "error",
        };
        CONSUMER_CLAIM_TOTAL.with_label_values(&[topic.subject(), end]).inc();

        result
    }

    async fn process<H: MessageHandler>(&self, handler: &H, delivery: Delivery) -> Result<()> {
        let subject = delivery.topic.subject();
        let key = delivery.key();
        let start = Instant::now();

        let message = match serde_json::from_slice::<H::Message>(&delivery.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(delivery_key = %key, error = %e, "Dropping undecodable message");
                MESSAGE_RECEIVE_TOTAL
                    .with_label_values(&[subject, "decode_error"])
                    .inc();

                if let Err(term_err) = delivery.term().await {
                    error!(delivery_key = %key, error = %term_err, "Failed to terminate bad message");
                }
                return Ok(());
            }
        };

        MESSAGE_RECEIVE_TOTAL.with_label_values(&[subject, "decoded"]).inc();

        match handler.handle(message, &delivery).await {
            Ok(()) => {
                // A lost ack means a redelivery, which handlers absorb by key.
                if let Err(e) = delivery.ack().await {
                    error!(delivery_key = %key, error = %e, "Failed to ack message");
                }

                MESSAGE_PROCESS_DURATION
                    .with_label_values(&[subject])
                    .observe(start.elapsed().as_secs_f64());
                Ok(())
            }
            Err(e) => {
                error!(delivery_key = %key, error = %e, "Error handling message, leaving for redelivery");
                MESSAGE_RECEIVE_TOTAL
                    .with_label_values(&[subject, "handler_error"])
                    .inc();

                if let Err(nak_err) = delivery.nak().await {
                    error!(delivery_key = %key, error = %nak_err, "Failed to nak message");
                }

                Err(Error::Handler {
                    key,
                    reason: format!("{:#}", e),
                })
            }
        }
    }
}

/// Durable consumer settings
#[derive(Debug, Clone)]
pub struct GroupConfig {
    /// Consumer group id; members sharing it split the topic
    pub group_id: String,

    /// Time the server waits for an ack before redelivering
    pub ack_wait: Duration,

    /// Max delivery attempts; -1 redelivers until acknowledged
    pub max_deliver: i64,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            group_id: "ledger-workers".to_string(),
            ack_wait: Duration::from_secs(30),
            max_deliver: -1,
        }
    }
}

/// Consumer group backed by a shared durable JetStream pull consumer
pub struct JetStreamGroup {
    client: Arc<NatsClient>,
    topic: Topic,
    config: GroupConfig,
}

impl JetStreamGroup {
    /// Create a group member
    pub fn new(client: Arc<NatsClient>, topic: Topic, config: GroupConfig) -> Self {
        Self {
            client,
            topic,
            config,
        }
    }

    async fn consumer(&self) -> Result<consumer::PullConsumer> {
        let stream = self.client.ensure_stream(self.topic).await?;

        if let Ok(consumer) = stream.get_consumer(&self.config.group_id).await {
            return Ok(consumer);
        }

        info!(
            topic = %self.topic,
            group = %self.config.group_id,
            "Consumer not found, creating"
        );

        stream
            .create_consumer(consumer::pull::Config {
                durable_name: Some(self.config.group_id.clone()),
                filter_subject: self.topic.subject().to_string(),
                ack_policy: consumer::AckPolicy::Explicit,
                ack_wait: self.config.ack_wait,
                max_deliver: self.config.max_deliver,
                deliver_policy: consumer::DeliverPolicy::All,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::JetStream(format!("create consumer {}: {}", self.config.group_id, e)))
    }
}

#[async_trait]
impl ConsumerGroup for JetStreamGroup {
    fn topic(&self) -> Topic {
        self.topic
    }

    async fn claim(&self) -> Result<Claim> {
        let consumer = self.consumer().await?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))?;

        info!(topic = %self.topic, group = %self.config.group_id, "Joined consumer group");

        let topic = self.topic;
        Ok(messages
            .map(move |message| {
                let message = message.map_err(|e| Error::Subscribe(e.to_string()))?;
                jetstream_delivery(topic, message)
            })
            .boxed())
    }
}

fn jetstream_delivery(topic: Topic, message: jetstream::Message) -> Result<Delivery> {
    let (stream_sequence, delivered) = {
        let info = message
            .info()
            .map_err(|e| Error::Subscribe(format!("message metadata: {}", e)))?;
        (info.stream_sequence, info.delivered.max(1) as u64)
    };
    let payload = message.payload.clone();
    let msg_id = message
        .headers
        .as_ref()
        .and_then(|headers| headers.get(MSG_ID_HEADER))
        .map(|value| value.as_str().to_string());

    Ok(Delivery::new(
        topic,
        stream_sequence,
        delivered,
        payload,
        Box::new(JetStreamAck(message)),
    )
    .with_msg_id(msg_id))
}

struct JetStreamAck(jetstream::Message);

#[async_trait]
impl Acknowledge for JetStreamAck {
    async fn ack(&self) -> Result<()> {
        self.0.ack().await.map_err(|e| Error::Ack(e.to_string()))
    }

    async fn nak(&self) -> Result<()> {
        self.0
            .ack_with(jetstream::AckKind::Nak(None))
            .await
            .map_err(|e| Error::Ack(e.to_string()))
    }

    async fn term(&self) -> Result<()> {
        self.0
            .ack_with(jetstream::AckKind::Term)
            .await
            .map_err(|e| Error::Ack(e.to_string()))
    }
}
