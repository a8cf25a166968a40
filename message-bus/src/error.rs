//! Error types for message bus

use thiserror::Error;

/// Message bus error
#[derive(Debug, Error)]
pub enum Error {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Publish error
    #[error("Publish error: {0}")]
    Publish(String),

    /// Subscribe error
    #[error("Subscribe error: {0}")]
    Subscribe(String),

    /// Stream or consumer management error
    #[error("JetStream error: {0}")]
    JetStream(String),

    /// Acknowledgment could not be delivered
    #[error("Ack error: {0}")]
    Ack(String),

    /// Handler returned an error; the delivery was not acknowledged
    #[error("Handler error on {key}: {reason}")]
    Handler {
        /// Delivery key of the failed message
        key: String,
        /// Handler error text
        reason: String,
    },
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
