use lazy_static::lazy_static;
use prometheus::{register_counter_vec, CounterVec};

lazy_static! {
    /// Transactions by how they left the service
    pub static ref TRANSACTION_OUTCOMES: CounterVec = register_counter_vec!(
        "transaction_service_outcomes_total",
        "Transactions processed, by outcome and reason",
        &["outcome", "reason"]
    )
    .unwrap();
}
