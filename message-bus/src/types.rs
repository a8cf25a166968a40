//! Type definitions for message bus

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bus topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    /// Inbound transaction requests
    Transaction,
    /// Successfully applied transactions awaiting projection
    TransactionLedger,
    /// Transactions rejected for business reasons
    DeadLedger,
}

impl Topic {
    /// Every topic the services touch
    pub const ALL: [Topic; 3] = [Topic::Transaction, Topic::TransactionLedger, Topic::DeadLedger];

    /// NATS subject for this topic
    pub fn subject(&self) -> &'static str {
        match self {
            Topic::Transaction => "transaction",
            Topic::TransactionLedger => "transaction-ledger",
            Topic::DeadLedger => "dead-ledger",
        }
    }

    /// Get JetStream stream name for this topic
    pub fn stream_name(&self) -> &'static str {
        match self {
            Topic::Transaction => "TRANSACTION",
            Topic::TransactionLedger => "TRANSACTION_LEDGER",
            Topic::DeadLedger => "DEAD_LEDGER",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subject())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names() {
        assert_eq!(Topic::Transaction.subject(), "transaction");
        assert_eq!(Topic::TransactionLedger.subject(), "transaction-ledger");
        assert_eq!(Topic::DeadLedger.subject(), "dead-ledger");
        assert_eq!(Topic::DeadLedger.stream_name(), "DEAD_LEDGER");
    }

    #[test]
    fn test_stream_names_are_distinct() {
        let mut names: Vec<_> = Topic::ALL.iter().map(|t| t.stream_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Topic::ALL.len());
    }
}
