//! In-process bus with JetStream-like delivery semantics
//!
//! Each topic is an append-only log. A message stays pending until a member
//! takes it, and is then owned by that member until it is acked, naked or
//! terminated. A nak puts it back for the next claim, which is how redelivery
//! is modelled. Publishes carrying a dedup key already seen on the topic are
//! discarded until the duplicate window is expired with
//! [`InMemoryBus::expire_dedup_window`]; the key travels with the message as
//! [`Delivery::msg_id`].

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::{
    publisher::BusPublisher,
    subscriber::{Acknowledge, Claim, ConsumerGroup, Delivery},
    types::Topic,
    Error, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Pending,
    InFlight,
    Acked,
    Terminated,
}

#[derive(Debug)]
struct Entry {
    payload: Bytes,
    msg_id: Option<String>,
    state: EntryState,
    deliveries: u64,
}

#[derive(Debug, Default)]
struct TopicLog {
    entries: Vec<Entry>,
    seen_keys: HashSet<String>,
    unavailable: bool,
}

impl TopicLog {
    fn sequences_in(&self, state: EntryState) -> Vec<u64> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.state == state)
            .map(|(index, _)| index as u64 + 1)
            .collect()
    }

    fn entry_mut(&mut self, sequence: u64) -> Option<&mut Entry> {
        let index = usize::try_from(sequence).ok()?.checked_sub(1)?;
        self.entries.get_mut(index)
    }
}

type Logs = Arc<Mutex<HashMap<Topic, TopicLog>>>;

/// In-memory bus shared by publishers and group members
#[derive(Debug, Clone, Default)]
pub struct InMemoryBus {
    logs: Logs,
}

impl InMemoryBus {
    /// Empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Group member consuming `topic`
    pub fn group(&self, topic: Topic) -> InMemoryGroup {
        InMemoryGroup {
            logs: self.logs.clone(),
            topic,
        }
    }

    /// Make publishes to `topic` fail until reset
    pub fn set_unavailable(&self, topic: Topic, unavailable: bool) {
        self.logs.lock().entry(topic).or_default().unavailable = unavailable;
    }

    /// Forget every dedup key seen on `topic`, as when JetStream's duplicate
    /// window has passed
    pub fn expire_dedup_window(&self, topic: Topic) {
        self.logs.lock().entry(topic).or_default().seen_keys.clear();
    }

    /// Every payload published to `topic`, in order
    pub fn messages(&self, topic: Topic) -> Vec<Bytes> {
        self.logs
            .lock()
            .get(&topic)
            .map(|log| log.entries.iter().map(|entry| entry.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Sequences acknowledged on `topic`
    pub fn acked(&self, topic: Topic) -> Vec<u64> {
        self.sequences(topic, EntryState::Acked)
    }

    /// Sequences waiting for (re)delivery on `topic`
    pub fn pending(&self, topic: Topic) -> Vec<u64> {
        self.sequences(topic, EntryState::Pending)
    }

    /// Sequences dropped without redelivery on `topic`
    pub fn terminated(&self, topic: Topic) -> Vec<u64> {
        self.sequences(topic, EntryState::Terminated)
    }

    /// How many times a message has been handed to a consumer
    pub fn delivery_count(&self, topic: Topic, sequence: u64) -> u64 {
        self.logs
            .lock()
            .get_mut(&topic)
            .and_then(|log| log.entry_mut(sequence).map(|entry| entry.deliveries))
            .unwrap_or(0)
    }

    fn sequences(&self, topic: Topic, state: EntryState) -> Vec<u64> {
        self.logs
            .lock()
            .get(&topic)
            .map(|log| log.sequences_in(state))
            .unwrap_or_default()
    }
}

#[async_trait]
impl BusPublisher for InMemoryBus {
    async fn publish(&self, topic: Topic, payload: Bytes, dedup_key: Option<&str>) -> Result<()> {
        let mut logs = self.logs.lock();
        let log = logs.entry(topic).or_default();

        if log.unavailable {
            return Err(Error::Publish(format!("topic {} unavailable", topic)));
        }

        if let Some(key) = dedup_key {
            if !log.seen_keys.insert(key.to_string()) {
                debug!(topic = %topic, key, "Duplicate publish discarded");
                return Ok(());
            }
        }

        log.entries.push(Entry {
            payload,
            msg_id: dedup_key.map(str::to_string),
            state: EntryState::Pending,
            deliveries: 0,
        });
        Ok(())
    }
}

/// Member of an in-memory consumer group.
///
/// A claim hands out the messages pending at claim time, skipping any that
/// another member took first, and then ends.
#[derive(Debug, Clone)]
pub struct InMemoryGroup {
    logs: Logs,
    topic: Topic,
}

impl InMemoryGroup {
    fn deliver(logs: &Logs, topic: Topic, sequence: u64) -> Option<Delivery> {
        let mut guard = logs.lock();
        let entry = guard.get_mut(&topic)?.entry_mut(sequence)?;
        if entry.state != EntryState::Pending {
            return None;
        }

        entry.state = EntryState::InFlight;
        entry.deliveries += 1;

        Some(Delivery::new(
            topic,
            sequence,
            entry.deliveries,
            entry.payload.clone(),
            Box::new(MemoryAck {
                logs: logs.clone(),
                topic,
                sequence,
            }),
        )
        .with_msg_id(entry.msg_id.clone()))
    }
}

#[async_trait]
impl ConsumerGroup for InMemoryGroup {
    fn topic(&self) -> Topic {
        self.topic
    }

    async fn claim(&self) -> Result<Claim> {
        let sequences = {
            let mut logs = self.logs.lock();
            logs.entry(self.topic).or_default().sequences_in(EntryState::Pending)
        };

        let logs = self.logs.clone();
        let topic = self.topic;
        Ok(futures::stream::iter(sequences)
            .filter_map(move |sequence| {
                let delivery = Self::deliver(&logs, topic, sequence);
                async move { delivery.map(Ok) }
            })
            .boxed())
    }
}

struct MemoryAck {
    logs: Logs,
    topic: Topic,
    sequence: u64,
}

impl MemoryAck {
    fn settle(&self, state: EntryState) -> Result<()> {
        let mut logs = self.logs.lock();
        let entry = logs
            .get_mut(&self.topic)
            .and_then(|log| log.entry_mut(self.sequence))
            .ok_or_else(|| Error::Ack(format!("unknown message {}:{}", self.topic, self.sequence)))?;
        entry.state = state;
        Ok(())
    }
}

#[async_trait]
impl Acknowledge for MemoryAck {
    async fn ack(&self) -> Result<()> {
        self.settle(EntryState::Acked)
    }

    async fn nak(&self) -> Result<()> {
        self.settle(EntryState::Pending)
    }

    async fn term(&self) -> Result<()> {
        self.settle(EntryState::Terminated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dedup_key_discards_second_publish() {
        let bus = InMemoryBus::new();
        let payload = Bytes::from_static(b"{}");

        bus.publish(Topic::DeadLedger, payload.clone(), Some("TRANSACTION:1")).await.unwrap();
        bus.publish(Topic::DeadLedger, payload.clone(), Some("TRANSACTION:1")).await.unwrap();
        bus.publish(Topic::DeadLedger, payload, Some("TRANSACTION:2")).await.unwrap();

        assert_eq!(bus.messages(Topic::DeadLedger).len(), 2);
    }

    #[tokio::test]
    async fn test_expired_window_admits_same_key_under_new_sequence() {
        let bus = InMemoryBus::new();
        let payload = Bytes::from_static(b"{}");

        bus.publish(Topic::TransactionLedger, payload.clone(), Some("TRANSACTION:4")).await.unwrap();
        bus.expire_dedup_window(Topic::TransactionLedger);
        bus.publish(Topic::TransactionLedger, payload, Some("TRANSACTION:4")).await.unwrap();

        let claim = bus.group(Topic::TransactionLedger).claim().await.unwrap();
        let deliveries: Vec<Delivery> = claim.map(|delivery| delivery.unwrap()).collect().await;

        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].key(), "TRANSACTION_LEDGER:1");
        assert_eq!(deliveries[1].key(), "TRANSACTION_LEDGER:2");
        for delivery in &deliveries {
            assert_eq!(delivery.msg_id.as_deref(), Some("TRANSACTION:4"));
            assert_eq!(delivery.origin_key(), "TRANSACTION:4");
        }
    }

    #[tokio::test]
    async fn test_origin_key_falls_back_to_stream_position() {
        let bus = InMemoryBus::new();
        bus.publish(Topic::Transaction, Bytes::from_static(b"{}"), None).await.unwrap();

        let mut claim = bus.group(Topic::Transaction).claim().await.unwrap();
        let delivery = claim.next().await.unwrap().unwrap();

        assert_eq!(delivery.msg_id, None);
        assert_eq!(delivery.origin_key(), "TRANSACTION:1");
    }

    #[tokio::test]
    async fn test_unavailable_topic_rejects_publish() {
        let bus = InMemoryBus::new();
        bus.set_unavailable(Topic::TransactionLedger, true);

        let result = bus
            .publish(Topic::TransactionLedger, Bytes::from_static(b"{}"), None)
            .await;

        assert!(matches!(result, Err(Error::Publish(_))));
        assert!(bus.messages(Topic::TransactionLedger).is_empty());
    }

    #[tokio::test]
    async fn test_members_do_not_share_in_flight_messages() {
        let bus = InMemoryBus::new();
        for _ in 0..3 {
            bus.publish(Topic::Transaction, Bytes::from_static(b"{}"), None).await.unwrap();
        }

        let mut first = bus.group(Topic::Transaction).claim().await.unwrap();
        let taken = first.next().await.unwrap().unwrap();
        assert_eq!(taken.stream_sequence, 1);

        let second = bus.group(Topic::Transaction).claim().await.unwrap();
        let rest: Vec<u64> = second
            .map(|delivery| delivery.unwrap().stream_sequence)
            .collect()
            .await;
        assert_eq!(rest, vec![2, 3]);

        taken.nak().await.unwrap();
        let third = bus.group(Topic::Transaction).claim().await.unwrap();
        let redelivered: Vec<u64> = third
            .map(|delivery| delivery.unwrap().stream_sequence)
            .collect()
            .await;
        assert_eq!(redelivered, vec![1]);
        assert_eq!(bus.delivery_count(Topic::Transaction, 1), 2);
    }
}
