use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PayoutError {
    #[error("Database error: {0}")]
    Database(#[from] redis::RedisError),

    #[error("Transient storage error: {0}")]
    Transient(String),

    #[error("Page read failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: Box<PayoutError>,
    },

    /// Remaining reward went negative before the window was filled.
    /// Always a scoring bug, never retried.
    #[error("Reward conservation violated: remaining {remaining} at accumulated score {accumulated_score}")]
    ConservationViolation {
        remaining: Decimal,
        accumulated_score: Decimal,
    },

    #[error("Invalid share: {0}")]
    InvalidShare(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Payout cancelled")]
    Cancelled,

    #[error("Other error: {0}")]
    Other(String),
}

impl PayoutError {
    /// Infrastructure failures worth another attempt. Data and invariant
    /// errors are never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            PayoutError::Database(e) => {
                e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error()
            }
            PayoutError::Transient(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PayoutError>;
