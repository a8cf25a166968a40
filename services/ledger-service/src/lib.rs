pub mod config;
pub mod database;
pub mod errors;
pub mod memory;
pub mod metrics;
pub mod projector;
pub mod store;

pub use config::Config;
pub use errors::{LedgerServiceError, Result};
pub use projector::LedgerProjector;
pub use store::LedgerStore;
