use super::schema::*;
use super::{PayoutTransaction, ShareStore};
use crate::error::{PayoutError, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::{aio::ConnectionManager, AsyncCommands};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

fn shares_key(pool_id: &str) -> String {
    format!("pool:{}:shares", pool_id)
}

fn balances_key(pool_id: &str) -> String {
    format!("pool:{}:balances", pool_id)
}

fn balance_changes_key(pool_id: &str) -> String {
    format!("pool:{}:balance_changes", pool_id)
}

/// Sorted-set score bound for a timestamp. A leading `(` makes it exclusive.
fn score_bound(at: DateTime<Utc>, inclusive: bool) -> String {
    if inclusive {
        at.timestamp_millis().to_string()
    } else {
        format!("({}", at.timestamp_millis())
    }
}

/// Decodes a share log member. The score is the authoritative timestamp, so
/// rows written with finer precision page and prune consistently.
fn share_from_member(json: &str, score: f64) -> Result<Share> {
    let mut share: Share = serde_json::from_str(json)?;
    share.created_at = Utc
        .timestamp_millis_opt(score as i64)
        .single()
        .ok_or_else(|| PayoutError::InvalidShare(format!("share {} has invalid score {}", share.id, score)))?;
    Ok(share)
}

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;

        Ok(Self { conn })
    }

    // Share operations
    pub async fn save_share(&self, share: &Share) -> Result<()> {
        let share = Share {
            created_at: truncate_to_millis(share.created_at),
            ..share.clone()
        };
        let json = serde_json::to_string(&share)?;
        let mut conn = self.conn.clone();

        let _: () = conn
            .zadd(shares_key(&share.pool_id), json, share.created_at.timestamp_millis())
            .await?;

        Ok(())
    }

    // Balance operations
    pub async fn get_balance(&self, pool_id: &str, address: &str) -> Result<Decimal> {
        let mut conn = self.conn.clone();
        let balance: Option<String> = conn.hget(balances_key(pool_id), address).await?;

        match balance {
            // HINCRBYFLOAT may answer in exponent notation
            Some(value) => value
                .parse::<Decimal>()
                .or_else(|_| Decimal::from_scientific(&value))
                .map_err(|e| PayoutError::Other(format!("Corrupt balance for {}: {}", address, e))),
            None => Ok(Decimal::ZERO),
        }
    }

    /// Opens a write scope backed by a MULTI/EXEC pipeline.
    pub fn begin(&self) -> RedisPayoutTransaction {
        let mut pipe = redis::pipe();
        pipe.atomic();

        RedisPayoutTransaction {
            conn: self.conn.clone(),
            pipe,
            queued: 0,
        }
    }
}

#[async_trait]
impl ShareStore for RedisStore {
    async fn read_shares_before(
        &self,
        pool_id: &str,
        before: DateTime<Utc>,
        inclusive: bool,
        page_size: usize,
    ) -> Result<Vec<Share>> {
        let mut conn = self.conn.clone();
        let members: Vec<(String, f64)> = conn
            .zrevrangebyscore_limit_withscores(
                shares_key(pool_id),
                score_bound(before, inclusive),
                "-inf",
                0,
                page_size.min(isize::MAX as usize) as isize,
            )
            .await?;

        members
            .iter()
            .map(|(json, score)| share_from_member(json, *score))
            .collect()
    }
}

pub struct RedisPayoutTransaction {
    conn: ConnectionManager,
    pipe: redis::Pipeline,
    queued: usize,
}

impl RedisPayoutTransaction {
    pub async fn commit(mut self) -> Result<()> {
        if self.queued == 0 {
            return Ok(());
        }

        self.pipe.query_async::<_, ()>(&mut self.conn).await?;
        debug!("Committed {} queued commands", self.queued);
        Ok(())
    }
}

#[async_trait]
impl PayoutTransaction for RedisPayoutTransaction {
    async fn count_shares_before(&mut self, pool_id: &str, before: DateTime<Utc>) -> Result<u64> {
        let count: u64 = self
            .conn
            .zcount(shares_key(pool_id), "-inf", score_bound(before, false))
            .await?;
        Ok(count)
    }

    async fn delete_shares_before(&mut self, pool_id: &str, before: DateTime<Utc>) -> Result<()> {
        self.pipe
            .zrembyscore(shares_key(pool_id), "-inf", score_bound(before, false))
            .ignore();
        self.queued += 1;
        Ok(())
    }

    async fn add_balance_amount(
        &mut self,
        pool_id: &str,
        address: &str,
        amount: Decimal,
        memo: &str,
    ) -> Result<()> {
        let change = BalanceChange {
            pool_id: pool_id.to_string(),
            address: address.to_string(),
            amount,
            memo: memo.to_string(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&change)?;
        let delta = amount
            .to_f64()
            .ok_or_else(|| PayoutError::Other(format!("Amount {} not representable", amount)))?;

        // The change list is the exact record, the hash is for display
        self.pipe.rpush(balance_changes_key(pool_id), json).ignore();
        self.pipe.hincr(balances_key(pool_id), address, delta).ignore();
        self.queued += 2;
        Ok(())
    }
}
