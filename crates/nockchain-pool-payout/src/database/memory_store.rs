use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::schema::{BalanceChange, Share};
use super::{PayoutTransaction, ShareStore};
use crate::error::Result;

#[derive(Default)]
struct Inner {
    shares: HashMap<String, Vec<Share>>,
    balances: HashMap<(String, String), Decimal>,
    balance_changes: Vec<BalanceChange>,
}

/// In-memory share log and balance ledger for tests and dry runs
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_share(&self, share: Share) {
        let mut inner = self.inner.write().await;
        inner.shares.entry(share.pool_id.clone()).or_default().push(share);
    }

    pub async fn insert_shares(&self, shares: impl IntoIterator<Item = Share>) {
        for share in shares {
            self.insert_share(share).await;
        }
    }

    pub async fn shares(&self, pool_id: &str) -> Vec<Share> {
        let inner = self.inner.read().await;
        let mut shares = inner.shares.get(pool_id).cloned().unwrap_or_default();
        sort_newest_first(&mut shares);
        shares
    }

    pub async fn balance_of(&self, pool_id: &str, address: &str) -> Decimal {
        let inner = self.inner.read().await;
        inner
            .balances
            .get(&(pool_id.to_string(), address.to_string()))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub async fn balance_changes(&self, pool_id: &str) -> Vec<BalanceChange> {
        let inner = self.inner.read().await;
        inner
            .balance_changes
            .iter()
            .filter(|c| c.pool_id == pool_id)
            .cloned()
            .collect()
    }

    /// Opens a write scope. Nothing is visible until `commit`.
    pub fn begin(&self) -> MemoryPayoutTransaction {
        MemoryPayoutTransaction {
            inner: self.inner.clone(),
            pending: Vec::new(),
        }
    }
}

// Ties on created_at are broken by id so pages are stable.
fn sort_newest_first(shares: &mut [Share]) {
    shares.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
}

#[async_trait]
impl ShareStore for MemoryStore {
    async fn read_shares_before(
        &self,
        pool_id: &str,
        before: DateTime<Utc>,
        inclusive: bool,
        page_size: usize,
    ) -> Result<Vec<Share>> {
        let inner = self.inner.read().await;
        let mut page: Vec<Share> = inner
            .shares
            .get(pool_id)
            .map(|shares| {
                shares
                    .iter()
                    .filter(|s| s.created_at < before || (inclusive && s.created_at == before))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        sort_newest_first(&mut page);
        page.truncate(page_size);
        Ok(page)
    }
}

enum PendingWrite {
    DeleteSharesBefore { pool_id: String, before: DateTime<Utc> },
    Credit(BalanceChange),
}

pub struct MemoryPayoutTransaction {
    inner: Arc<RwLock<Inner>>,
    pending: Vec<PendingWrite>,
}

impl MemoryPayoutTransaction {
    pub async fn commit(self) -> Result<()> {
        let mut inner = self.inner.write().await;
        let writes = self.pending.len();

        for write in self.pending {
            match write {
                PendingWrite::DeleteSharesBefore { pool_id, before } => {
                    if let Some(shares) = inner.shares.get_mut(&pool_id) {
                        shares.retain(|s| s.created_at >= before);
                    }
                }
                PendingWrite::Credit(change) => {
                    *inner
                        .balances
                        .entry((change.pool_id.clone(), change.address.clone()))
                        .or_insert(Decimal::ZERO) += change.amount;
                    inner.balance_changes.push(change);
                }
            }
        }

        debug!("Committed {} pending writes", writes);
        Ok(())
    }

    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl PayoutTransaction for MemoryPayoutTransaction {
    async fn count_shares_before(&mut self, pool_id: &str, before: DateTime<Utc>) -> Result<u64> {
        let inner = self.inner.read().await;
        let count = inner
            .shares
            .get(pool_id)
            .map(|shares| shares.iter().filter(|s| s.created_at < before).count())
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn delete_shares_before(&mut self, pool_id: &str, before: DateTime<Utc>) -> Result<()> {
        self.pending.push(PendingWrite::DeleteSharesBefore {
            pool_id: pool_id.to_string(),
            before,
        });
        Ok(())
    }

    async fn add_balance_amount(
        &mut self,
        pool_id: &str,
        address: &str,
        amount: Decimal,
        memo: &str,
    ) -> Result<()> {
        self.pending.push(PendingWrite::Credit(BalanceChange {
            pool_id: pool_id.to_string(),
            address: address.to_string(),
            amount,
            memo: memo.to_string(),
            created_at: Utc::now(),
        }));
        Ok(())
    }
}
