use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

use crate::database::{Block, Share, ShareStore};
use crate::error::{PayoutError, Result};

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
}

/// Share whose normalized score equals `difficulty` (network difficulty 1).
pub fn share_at(pool_id: &str, address: &str, difficulty: f64, secs: i64) -> Share {
    Share::new(pool_id, address, difficulty, 1.0, at(secs))
}

pub fn block_at(pool_id: &str, height: u64, finder: &str, reward: Decimal, secs: i64) -> Block {
    Block {
        pool_id: pool_id.to_string(),
        height,
        miner_address: finder.to_string(),
        reward,
        created_at: at(secs),
    }
}

/// Fails the first `failures` reads, then delegates.
pub struct FlakyShareStore<S> {
    inner: S,
    failures: usize,
    transient: bool,
    calls: AtomicUsize,
}

impl<S: ShareStore> FlakyShareStore<S> {
    pub fn transient(inner: S, failures: usize) -> Self {
        Self {
            inner,
            failures,
            transient: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn corrupt(inner: S, failures: usize) -> Self {
        Self {
            inner,
            failures,
            transient: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: ShareStore> ShareStore for FlakyShareStore<S> {
    async fn read_shares_before(
        &self,
        pool_id: &str,
        before: DateTime<Utc>,
        inclusive: bool,
        page_size: usize,
    ) -> Result<Vec<Share>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(if self.transient {
                PayoutError::Transient(format!("connection reset on read {}", call + 1))
            } else {
                PayoutError::InvalidShare(format!("malformed row on read {}", call + 1))
            });
        }

        self.inner.read_shares_before(pool_id, before, inclusive, page_size).await
    }
}

/// Cancels `token` on read number `at` (zero based). A hanging store never
/// answers that read, a completing one still returns its page.
pub struct CancellingShareStore<S> {
    inner: S,
    token: CancellationToken,
    at: usize,
    hang: bool,
    calls: AtomicUsize,
}

impl<S: ShareStore> CancellingShareStore<S> {
    pub fn hanging(inner: S, token: CancellationToken, at: usize) -> Self {
        Self {
            inner,
            token,
            at,
            hang: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn completing(inner: S, token: CancellationToken, at: usize) -> Self {
        Self {
            inner,
            token,
            at,
            hang: false,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl<S: ShareStore> ShareStore for CancellingShareStore<S> {
    async fn read_shares_before(
        &self,
        pool_id: &str,
        before: DateTime<Utc>,
        inclusive: bool,
        page_size: usize,
    ) -> Result<Vec<Share>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == self.at {
            self.token.cancel();
            if self.hang {
                std::future::pending::<()>().await;
            }
        }

        self.inner.read_shares_before(pool_id, before, inclusive, page_size).await
    }
}
