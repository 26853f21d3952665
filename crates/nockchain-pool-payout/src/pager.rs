use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::PayoutConfig;
use crate::database::{Share, ShareStore};
use crate::error::{PayoutError, Result};
use crate::fault::RetryPolicy;
use crate::metrics::PAGE_READS;

/// Walks a pool's share log backwards in time, one page at a time.
///
/// The first read uses the caller's inclusivity at `start`. Later reads are
/// anchored at the oldest timestamp seen so far: inclusively, widened by the
/// number of rows already yielded at that timestamp which are then filtered
/// out (boundary dedup), or exclusively when dedup is turned off, which can
/// skip rows sharing the boundary timestamp. Stores must order rows with
/// equal timestamps consistently between reads.
pub struct SharePager<'a> {
    store: &'a dyn ShareStore,
    retry: RetryPolicy,
    cancel: &'a CancellationToken,
    pool_id: &'a str,
    page_size: usize,
    dedup: bool,
    cursor: DateTime<Utc>,
    inclusive: bool,
    boundary_ids: HashSet<String>,
    exhausted: bool,
}

impl<'a> SharePager<'a> {
    pub fn new(
        store: &'a dyn ShareStore,
        config: &PayoutConfig,
        cancel: &'a CancellationToken,
        pool_id: &'a str,
        start: DateTime<Utc>,
        inclusive: bool,
    ) -> Self {
        Self {
            store,
            retry: RetryPolicy::new(config.retry_attempts),
            cancel,
            pool_id,
            page_size: config.page_size.max(1),
            dedup: config.dedup_page_boundaries,
            cursor: start,
            inclusive,
            boundary_ids: HashSet::new(),
            exhausted: false,
        }
    }

    /// Next page, newest first. `None` once the log is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Share>>> {
        loop {
            if self.exhausted {
                return Ok(None);
            }

            let before = self.cursor;
            let inclusive = self.inclusive;
            let requested = self.request_size();
            let page = self.read_page(before, inclusive, requested).await?;
            let raw_len = page.len();

            if raw_len < requested {
                self.exhausted = true;
            }

            let fresh: Vec<Share> = if self.dedup && inclusive {
                page.into_iter()
                    .filter(|s| !(s.created_at == before && self.boundary_ids.contains(&s.id)))
                    .collect()
            } else {
                page
            };

            let Some(last) = fresh.last() else {
                if self.exhausted {
                    return Ok(None);
                }

                // A full page of rows already yielded: the store repeats rows
                // or reorders ties between reads.
                warn!(
                    "Page boundary at {} of pool {} returned {} already seen shares; continuing past it, remaining shares at that timestamp are skipped",
                    before, self.pool_id, raw_len
                );
                self.inclusive = false;
                self.boundary_ids.clear();
                continue;
            };

            let oldest = last.created_at;
            if oldest != before {
                self.boundary_ids.clear();
            }
            if self.dedup {
                self.boundary_ids.extend(
                    fresh
                        .iter()
                        .filter(|s| s.created_at == oldest)
                        .map(|s| s.id.clone()),
                );
            }

            self.cursor = oldest;
            self.inclusive = self.dedup;

            debug!(
                "Read {} shares of pool {} before {} (inclusive: {}), {} new",
                raw_len,
                self.pool_id,
                before,
                inclusive,
                fresh.len()
            );
            return Ok(Some(fresh));
        }
    }

    fn request_size(&self) -> usize {
        if self.dedup && self.inclusive {
            self.page_size.saturating_add(self.boundary_ids.len())
        } else {
            self.page_size
        }
    }

    async fn read_page(&self, before: DateTime<Utc>, inclusive: bool, page_size: usize) -> Result<Vec<Share>> {
        if self.cancel.is_cancelled() {
            return Err(PayoutError::Cancelled);
        }

        let store = self.store;
        let pool_id = self.pool_id;
        let read = self
            .retry
            .run(|| store.read_shares_before(pool_id, before, inclusive, page_size));

        let page = tokio::select! {
            _ = self.cancel.cancelled() => return Err(PayoutError::Cancelled),
            page = read => page?,
        };

        PAGE_READS.inc();
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use crate::test_utils::{at, share_at, CancellingShareStore, FlakyShareStore};

    async fn drain(pager: &mut SharePager<'_>) -> Vec<Share> {
        let mut all = Vec::new();
        while let Some(page) = pager.next_page().await.unwrap() {
            all.extend(page);
        }
        all
    }

    fn config(page_size: usize, dedup: bool) -> PayoutConfig {
        PayoutConfig {
            page_size,
            retry_attempts: 3,
            dedup_page_boundaries: dedup,
        }
    }

    fn ids(shares: &[Share]) -> Vec<String> {
        shares.iter().map(|s| s.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_pages_match_unpaginated_scan() {
        let store = MemoryStore::new();
        store
            .insert_shares((0..10).map(|i| share_at("pool1", &format!("m{}", i % 3), 1.0, i)))
            .await;
        let cancel = CancellationToken::new();

        let expected = store.read_shares_before("pool1", at(9), true, usize::MAX).await.unwrap();

        for dedup in [true, false] {
            let cfg = config(3, dedup);
            let mut pager = SharePager::new(&store, &cfg, &cancel, "pool1", at(9), true);
            let all = drain(&mut pager).await;
            assert_eq!(ids(&all), ids(&expected), "dedup: {}", dedup);
        }
    }

    #[tokio::test]
    async fn test_first_page_is_inclusive_of_start() {
        let store = MemoryStore::new();
        store
            .insert_shares(vec![share_at("pool1", "a", 1.0, 5), share_at("pool1", "b", 1.0, 6)])
            .await;
        let cancel = CancellationToken::new();
        let cfg = config(10, true);

        let mut inclusive = SharePager::new(&store, &cfg, &cancel, "pool1", at(5), true);
        assert_eq!(drain(&mut inclusive).await.len(), 1);

        let mut exclusive = SharePager::new(&store, &cfg, &cancel, "pool1", at(5), false);
        assert!(drain(&mut exclusive).await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_timestamps_across_boundary_with_dedup() {
        let store = MemoryStore::new();
        let mut shares = vec![share_at("pool1", "newest", 1.0, 10)];
        shares.extend((0..4).map(|i| share_at("pool1", &format!("tied{}", i), 1.0, 5)));
        shares.push(share_at("pool1", "oldest", 1.0, 1));
        store.insert_shares(shares.clone()).await;
        let cancel = CancellationToken::new();

        // Page size 3 cuts through the four shares at t=5
        let cfg = config(3, true);
        let mut pager = SharePager::new(&store, &cfg, &cancel, "pool1", at(10), true);
        let all = drain(&mut pager).await;

        assert_eq!(all.len(), shares.len());
        let unique: HashSet<_> = all.iter().map(|s| s.id.clone()).collect();
        assert_eq!(unique.len(), shares.len());
        assert_eq!(all.last().unwrap().miner_address, "oldest");
    }

    #[tokio::test]
    async fn test_duplicate_timestamps_across_boundary_without_dedup_skip_rows() {
        let store = MemoryStore::new();
        let mut shares = vec![share_at("pool1", "newest", 1.0, 10)];
        shares.extend((0..4).map(|i| share_at("pool1", &format!("tied{}", i), 1.0, 5)));
        shares.push(share_at("pool1", "oldest", 1.0, 1));
        store.insert_shares(shares.clone()).await;
        let cancel = CancellationToken::new();

        let cfg = config(3, false);
        let mut pager = SharePager::new(&store, &cfg, &cancel, "pool1", at(10), true);
        let all = drain(&mut pager).await;

        // Exclusive cursor at t=5 drops the two tied shares of the next page
        assert_eq!(all.len(), shares.len() - 2);
        let unique: HashSet<_> = all.iter().map(|s| s.id.clone()).collect();
        assert_eq!(unique.len(), all.len());
        assert_eq!(all.last().unwrap().miner_address, "oldest");
    }

    #[tokio::test]
    async fn test_timestamp_group_larger_than_page() {
        let store = MemoryStore::new();
        let mut shares: Vec<Share> = (0..7).map(|i| share_at("pool1", &format!("tied{}", i), 1.0, 5)).collect();
        shares.push(share_at("pool1", "oldest", 1.0, 1));
        store.insert_shares(shares.clone()).await;
        let cancel = CancellationToken::new();

        let cfg = config(2, true);
        let mut pager = SharePager::new(&store, &cfg, &cancel, "pool1", at(5), true);
        let all = drain(&mut pager).await;

        let unique: HashSet<_> = all.iter().map(|s| s.id.clone()).collect();
        assert_eq!(all.len(), shares.len());
        assert_eq!(unique.len(), shares.len());
        assert_eq!(all.last().unwrap().miner_address, "oldest");
    }

    /// Answers every inclusive read with the same two rows, repeated to
    /// fill the request.
    struct RepeatingStore {
        rows: Vec<Share>,
    }

    #[async_trait::async_trait]
    impl ShareStore for RepeatingStore {
        async fn read_shares_before(
            &self,
            _pool_id: &str,
            _before: DateTime<Utc>,
            inclusive: bool,
            page_size: usize,
        ) -> Result<Vec<Share>> {
            if !inclusive {
                return Ok(Vec::new());
            }
            Ok(self.rows.iter().cycle().take(page_size).cloned().collect())
        }
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_repeated_boundary_rows_are_flagged() {
        let store = RepeatingStore {
            rows: vec![share_at("pool1", "a", 1.0, 5), share_at("pool1", "b", 1.0, 5)],
        };
        let cancel = CancellationToken::new();
        let cfg = config(2, true);

        let mut pager = SharePager::new(&store, &cfg, &cancel, "pool1", at(5), true);
        let all = drain(&mut pager).await;

        assert_eq!(ids(&all), ids(&store.rows));
        assert!(logs_contain("remaining shares at that timestamp are skipped"));
    }

    #[tokio::test]
    async fn test_empty_log() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let cfg = config(3, true);
        let mut pager = SharePager::new(&store, &cfg, &cancel, "pool1", at(10), true);
        assert!(pager.next_page().await.unwrap().is_none());
        assert!(pager.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_per_page() {
        let store = MemoryStore::new();
        store
            .insert_shares((0..4).map(|i| share_at("pool1", "a", 1.0, i)))
            .await;
        let flaky = FlakyShareStore::transient(store, 2);
        let cancel = CancellationToken::new();
        let cfg = config(10, true);

        let mut pager = SharePager::new(&flaky, &cfg, &cancel, "pool1", at(10), true);
        assert_eq!(drain(&mut pager).await.len(), 4);
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_read() {
        let store = MemoryStore::new();
        store.insert_share(share_at("pool1", "a", 1.0, 1)).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let cfg = config(10, true);

        let mut pager = SharePager::new(&store, &cfg, &cancel, "pool1", at(10), true);
        assert!(matches!(pager.next_page().await, Err(PayoutError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_during_read() {
        let store = MemoryStore::new();
        store
            .insert_shares((0..4).map(|i| share_at("pool1", "a", 1.0, i)))
            .await;
        let cancel = CancellationToken::new();
        let cancelling = CancellingShareStore::hanging(store, cancel.clone(), 1);
        let cfg = config(2, true);

        let mut pager = SharePager::new(&cancelling, &cfg, &cancel, "pool1", at(10), true);
        assert_eq!(pager.next_page().await.unwrap().unwrap().len(), 2);
        assert!(matches!(pager.next_page().await, Err(PayoutError::Cancelled)));
    }

    #[test]
    fn test_request_size_saturates() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let cfg = config(usize::MAX, true);

        let mut pager = SharePager::new(&store, &cfg, &cancel, "pool1", at(10), true);
        pager.boundary_ids.insert("seen".to_string());
        assert_eq!(pager.request_size(), usize::MAX);

        pager.inclusive = false;
        assert_eq!(pager.request_size(), usize::MAX);
    }
}
