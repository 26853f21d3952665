use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::PayoutConfig;
use crate::database::ShareStore;
use crate::error::Result;
use crate::handler::PayoutHandler;
use crate::pager::SharePager;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscardReport {
    /// Adjusted difficulty per address, largest first.
    pub entries: Vec<(String, Decimal)>,
    pub share_count: u64,
}

impl DiscardReport {
    pub fn total(&self) -> Decimal {
        self.entries.iter().map(|(_, total)| *total).sum()
    }
}

/// Read-only pass over the shares a payout is about to prune.
pub struct DiscardedShareReporter<'a> {
    store: &'a dyn ShareStore,
    handler: &'a dyn PayoutHandler,
    config: &'a PayoutConfig,
}

impl<'a> DiscardedShareReporter<'a> {
    pub fn new(store: &'a dyn ShareStore, handler: &'a dyn PayoutHandler, config: &'a PayoutConfig) -> Self {
        Self { store, handler, config }
    }

    /// Totals every share of `pool_id` created strictly before `cutoff`.
    pub async fn report(
        &self,
        pool_id: &str,
        cutoff: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<DiscardReport> {
        let mut pager = SharePager::new(self.store, self.config, cancel, pool_id, cutoff, false);
        let mut totals: HashMap<String, Decimal> = HashMap::new();
        let mut share_count = 0u64;

        while let Some(page) = pager.next_page().await? {
            for share in page {
                // Diagnostics only, unrepresentable values count as zero
                let difficulty =
                    Decimal::from_f64(self.handler.adjust_share_difficulty(share.difficulty)).unwrap_or_default();
                *totals.entry(share.miner_address).or_insert(Decimal::ZERO) += difficulty;
                share_count += 1;
            }
        }

        let mut entries: Vec<(String, Decimal)> = totals.into_iter().collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let report = DiscardReport { entries, share_count };
        self.log(pool_id, cutoff, &report);
        Ok(report)
    }

    fn log(&self, pool_id: &str, cutoff: DateTime<Utc>, report: &DiscardReport) {
        if report.share_count == 0 {
            info!("No shares of pool {} before {} to discard", pool_id, cutoff);
            return;
        }

        info!(
            "Discarding {} shares of pool {} before {} from {} addresses, {} total difficulty",
            report.share_count,
            pool_id,
            cutoff,
            report.entries.len(),
            report.total().round_dp(2)
        );
        for (address, total) in &report.entries {
            info!("Discarded shares of {}: {}", address, total.round_dp(2));
        }
    }
}
