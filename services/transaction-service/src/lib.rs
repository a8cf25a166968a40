pub mod config;
pub mod database;
pub mod engine;
pub mod errors;
pub mod forwarding;
pub mod memory;
pub mod metrics;
pub mod router;
pub mod store;

pub use config::Config;
pub use engine::{Applied, BalanceEngine};
pub use errors::{Result, TransactionServiceError};
pub use forwarding::{Forwarded, TransactionForwarder};
pub use router::TransactionRouter;
pub use store::{AccountStore, BalanceTransaction, RecordedOutcome};
