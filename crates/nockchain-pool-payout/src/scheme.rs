use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::accumulator::{ScoreAccumulator, ScoreOutcome};
use crate::config::{PayoutConfig, PoolConfig, RewardWindowConfig};
use crate::database::{truncate_to_millis, Block, PayoutTransaction, ShareStore};
use crate::error::{PayoutError, Result};
use crate::handler::PayoutHandler;
use crate::metrics::{BLOCKS_PROCESSED, PAYOUT_PROCESSING_TIME, SHARES_PRUNED};
use crate::pager::SharePager;
use crate::reporter::{DiscardReport, DiscardedShareReporter};

#[derive(Debug, Clone)]
pub struct PayoutSummary {
    pub pool_id: String,
    pub block_height: u64,
    pub addresses_paid: usize,
    pub total_shares: Decimal,
    /// Window rewards plus finder bonus.
    pub total_distributed: Decimal,
    pub percent_distributed: Decimal,
    pub finder_bonus: Decimal,
    pub cutoff: Option<DateTime<Utc>>,
    pub shares_pruned: u64,
    pub discarded: Option<DiscardReport>,
}

/// PPLNS payout with a finder bonus.
///
/// Scanning reads go through the share store and may run on any
/// connection. Every write goes through the caller's transaction, and only
/// once all reads have succeeded, so a failed or cancelled run leaves the
/// ledger and the share log as they were.
pub struct PplnsPayoutScheme {
    store: Arc<dyn ShareStore>,
    handler: Arc<dyn PayoutHandler>,
    config: PayoutConfig,
}

impl PplnsPayoutScheme {
    pub fn new(store: Arc<dyn ShareStore>, handler: Arc<dyn PayoutHandler>, config: PayoutConfig) -> Self {
        Self { store, handler, config }
    }

    pub async fn process<T>(
        &self,
        tx: &mut T,
        pool: &PoolConfig,
        block: &Block,
        block_reward: Decimal,
        cancel: &CancellationToken,
    ) -> Result<PayoutSummary>
    where
        T: PayoutTransaction + ?Sized,
    {
        let timer = PAYOUT_PROCESSING_TIME.start_timer();
        let window = pool.reward_window();

        info!(
            "Processing payout of {} for block {} of pool {} (window {}, finder bonus {})",
            self.handler.format_amount(block_reward),
            block.height,
            pool.pool_id,
            window.window_factor,
            window.finder_bonus_fraction
        );

        let outcome = self.compute_rewards(&window, pool, block, block_reward, cancel).await?;

        let discarded = match outcome.cutoff {
            Some(cutoff) => Some(
                DiscardedShareReporter::new(self.store.as_ref(), self.handler.as_ref(), &self.config)
                    .report(&pool.pool_id, cutoff, cancel)
                    .await?,
            ),
            None => None,
        };

        // Last chance to back out before anything is written
        if cancel.is_cancelled() {
            return Err(PayoutError::Cancelled);
        }

        let addresses_paid = self.credit_balances(tx, pool, block, &outcome).await?;

        let mut shares_pruned = 0;
        if let Some(cutoff) = outcome.cutoff {
            shares_pruned = tx.count_shares_before(&pool.pool_id, cutoff).await?;
            info!("Deleting {} shares of pool {} before {}", shares_pruned, pool.pool_id, cutoff);
            tx.delete_shares_before(&pool.pool_id, cutoff).await?;
            SHARES_PRUNED.inc_by(shares_pruned as f64);
        } else {
            info!("Share log of pool {} ran out before the window filled, nothing to prune", pool.pool_id);
        }

        let total_distributed = outcome.total_distributed();
        let percent_distributed = if block_reward > Decimal::ZERO {
            total_distributed / block_reward * dec!(100)
        } else {
            Decimal::ZERO
        };

        let summary = PayoutSummary {
            pool_id: pool.pool_id.clone(),
            block_height: block.height,
            addresses_paid,
            total_shares: outcome.total_shares(),
            total_distributed,
            percent_distributed,
            finder_bonus: outcome.finder_bonus,
            cutoff: outcome.cutoff,
            shares_pruned,
            discarded,
        };

        info!(
            "Block {} of pool {}: {} shares, rewarded {} ({}%) to {} addresses",
            summary.block_height,
            summary.pool_id,
            summary.total_shares.round_dp(2),
            self.handler.format_amount(summary.total_distributed),
            summary.percent_distributed.round_dp(2),
            summary.addresses_paid
        );

        BLOCKS_PROCESSED.inc();
        timer.observe_duration();
        Ok(summary)
    }

    /// Scores shares from the block's creation time backwards until the
    /// window fills or the share log runs out.
    pub async fn compute_rewards(
        &self,
        window: &RewardWindowConfig,
        pool: &PoolConfig,
        block: &Block,
        block_reward: Decimal,
        cancel: &CancellationToken,
    ) -> Result<ScoreOutcome> {
        let mut accumulator =
            ScoreAccumulator::new(self.handler.as_ref(), window, block_reward, &block.miner_address);
        let mut pager = SharePager::new(
            self.store.as_ref(),
            &self.config,
            cancel,
            &pool.pool_id,
            truncate_to_millis(block.created_at),
            true,
        );

        'scan: while let Some(page) = pager.next_page().await? {
            for share in &page {
                if accumulator.add_share(share)? {
                    break 'scan;
                }
            }
        }

        debug!(
            "Scored pool {} for block {}: {} remaining undistributed",
            pool.pool_id,
            block.height,
            accumulator.remaining()
        );
        Ok(accumulator.finish())
    }

    async fn credit_balances<T>(
        &self,
        tx: &mut T,
        pool: &PoolConfig,
        block: &Block,
        outcome: &ScoreOutcome,
    ) -> Result<usize>
    where
        T: PayoutTransaction + ?Sized,
    {
        let mut rewards: Vec<(&String, &Decimal)> =
            outcome.rewards.iter().filter(|(_, amount)| **amount > Decimal::ZERO).collect();
        rewards.sort_by(|a, b| a.0.cmp(b.0));

        for (address, amount) in &rewards {
            let shares = outcome.shares.get(*address).copied().unwrap_or_default();
            let memo = format!(
                "Reward for {} shares for block {}",
                shares.round_dp(2).normalize(),
                block.height
            );

            debug!("Crediting {} with {}", address, self.handler.format_amount(**amount));
            tx.add_balance_amount(&pool.pool_id, address, **amount, &memo).await?;
        }

        let mut paid = rewards.len();
        if outcome.finder_bonus > Decimal::ZERO {
            let memo = format!("Finder bonus for block {}", block.height);

            info!(
                "Crediting finder {} with bonus {}",
                outcome.finder_address,
                self.handler.format_amount(outcome.finder_bonus)
            );
            tx.add_balance_amount(&pool.pool_id, &outcome.finder_address, outcome.finder_bonus, &memo)
                .await?;

            if !outcome.rewards.contains_key(&outcome.finder_address) {
                paid += 1;
            }
        }

        Ok(paid)
    }
}
