use chrono::{DateTime, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Share log timestamps are kept at millisecond precision, the resolution
/// of the Redis sorted-set score.
pub fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_nanosecond(at.nanosecond() / 1_000_000 * 1_000_000)
        .unwrap_or(at)
}

/// An accepted share as persisted by the stratum layer. Read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Share {
    pub id: String,
    pub pool_id: String,
    pub miner_address: String,
    pub difficulty: f64,
    pub network_difficulty: f64,
    pub created_at: DateTime<Utc>,
}

impl Share {
    pub fn new(
        pool_id: impl Into<String>,
        miner_address: impl Into<String>,
        difficulty: f64,
        network_difficulty: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pool_id: pool_id.into(),
            miner_address: miner_address.into(),
            difficulty,
            network_difficulty,
            created_at: truncate_to_millis(created_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub pool_id: String,
    pub height: u64,
    pub miner_address: String,
    pub reward: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub pool_id: String,
    pub address: String,
    pub amount: Decimal,
    pub memo: String,
    pub created_at: DateTime<Utc>,
}
