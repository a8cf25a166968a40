//! Message Bus with NATS JetStream support
//!
//! Provides the consumer-group runtime shared by the ledger services:
//! - Durable streams per topic (`transaction`, `transaction-ledger`, `dead-ledger`)
//! - Shared durable pull consumers as consumer groups
//! - Acknowledge-after-handle with redelivery on handler failure
//! - Publish retry with exponential backoff and `Nats-Msg-Id` deduplication
//! - In-memory bus with the same delivery semantics for tests
//! - Observability via Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod client;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod publisher;
pub mod subscriber;
pub mod types;

pub use client::{NatsClient, NatsConfig};
pub use error::{Error, Result};
pub use memory::{InMemoryBus, InMemoryGroup};
pub use publisher::{BusPublisher, JetStreamPublisher, PublisherConfig};
pub use subscriber::{
    Acknowledge, ClaimEnd, ConsumerGroup, Delivery, GroupConfig, JetStreamGroup, MessageHandler,
    Subscriber, SubscriberConfig,
};
pub use types::Topic;
