pub mod memory_store;
pub mod redis_store;
pub mod schema;

pub use memory_store::{MemoryPayoutTransaction, MemoryStore};
pub use redis_store::{RedisPayoutTransaction, RedisStore};
pub use schema::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::Result;

/// Read side of the share log. Reads are short-lived and need not run in
/// the payout's write transaction.
#[async_trait]
pub trait ShareStore: Send + Sync {
    /// Shares of `pool_id` created before `before` (or at it, when
    /// `inclusive`), newest first, at most `page_size` rows.
    async fn read_shares_before(
        &self,
        pool_id: &str,
        before: DateTime<Utc>,
        inclusive: bool,
        page_size: usize,
    ) -> Result<Vec<Share>>;
}

/// Atomic write scope supplied by the caller of a payout. Either every
/// write made through it lands or none does.
#[async_trait]
pub trait PayoutTransaction: Send {
    async fn count_shares_before(&mut self, pool_id: &str, before: DateTime<Utc>) -> Result<u64>;

    /// Removes shares created strictly before `before`.
    async fn delete_shares_before(&mut self, pool_id: &str, before: DateTime<Utc>) -> Result<()>;

    async fn add_balance_amount(
        &mut self,
        pool_id: &str,
        address: &str,
        amount: Decimal,
        memo: &str,
    ) -> Result<()>;
}
