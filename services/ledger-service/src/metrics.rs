use lazy_static::lazy_static;
use prometheus::{register_counter_vec, CounterVec};

lazy_static! {
    pub static ref LEDGER_RECORDS: CounterVec = register_counter_vec!(
        "ledger_service_records_total",
        "Ledger projections, by result",
        &["result"]
    )
    .unwrap();
}
