use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::error;

use crate::config::RewardWindowConfig;
use crate::database::Share;
use crate::error::{PayoutError, Result};
use crate::handler::PayoutHandler;
use crate::metrics::CONSERVATION_VIOLATIONS;

/// Result of scoring one block.
#[derive(Debug, Clone, Default)]
pub struct ScoreOutcome {
    /// Adjusted difficulty per address, diagnostics only.
    pub shares: HashMap<String, Decimal>,
    /// Window rewards per address, finder bonus excluded.
    pub rewards: HashMap<String, Decimal>,
    pub finder_address: String,
    pub finder_bonus: Decimal,
    /// Creation time of the share that filled the window. `None` when the
    /// share log ran out first.
    pub cutoff: Option<DateTime<Utc>>,
    pub accumulated_score: Decimal,
}

impl ScoreOutcome {
    /// Window rewards plus finder bonus, per address.
    pub fn credits(&self) -> HashMap<String, Decimal> {
        let mut credits = self.rewards.clone();
        *credits.entry(self.finder_address.clone()).or_insert(Decimal::ZERO) += self.finder_bonus;
        credits
    }

    pub fn total_distributed(&self) -> Decimal {
        self.rewards.values().copied().sum::<Decimal>() + self.finder_bonus
    }

    pub fn total_shares(&self) -> Decimal {
        self.shares.values().copied().sum()
    }
}

/// Windowed PPLNS scoring. Feed shares newest first until [`is_full`]
/// reports the window filled, then [`finish`].
///
/// [`is_full`]: ScoreAccumulator::is_full
/// [`finish`]: ScoreAccumulator::finish
pub struct ScoreAccumulator<'a> {
    handler: &'a dyn PayoutHandler,
    window: Decimal,
    distributable: Decimal,
    accumulated_score: Decimal,
    remaining: Decimal,
    last_created_at: Option<DateTime<Utc>>,
    outcome: ScoreOutcome,
}

impl<'a> ScoreAccumulator<'a> {
    pub fn new(
        handler: &'a dyn PayoutHandler,
        config: &RewardWindowConfig,
        block_reward: Decimal,
        finder_address: &str,
    ) -> Self {
        let finder_bonus = block_reward * config.finder_bonus_fraction;
        let distributable = block_reward - finder_bonus;

        Self {
            handler,
            window: config.window_factor,
            distributable,
            accumulated_score: Decimal::ZERO,
            remaining: distributable,
            last_created_at: None,
            outcome: ScoreOutcome {
                finder_address: finder_address.to_string(),
                finder_bonus,
                ..Default::default()
            },
        }
    }

    pub fn is_full(&self) -> bool {
        self.outcome.cutoff.is_some()
    }

    pub fn remaining(&self) -> Decimal {
        self.remaining
    }

    /// Scores one share. Returns `true` once this share filled the window;
    /// later shares are ignored.
    pub fn add_share(&mut self, share: &Share) -> Result<bool> {
        if self.is_full() {
            return Ok(true);
        }

        if let Some(last) = self.last_created_at {
            if share.created_at > last {
                return Err(PayoutError::InvalidShare(format!(
                    "share {} at {} is newer than its predecessor at {}",
                    share.id, share.created_at, last
                )));
            }
        }
        self.last_created_at = Some(share.created_at);

        let difficulty = to_decimal(self.handler.adjust_share_difficulty(share.difficulty), "difficulty", share)?;
        if difficulty < Decimal::ZERO {
            return Err(PayoutError::InvalidShare(format!(
                "share {} has negative difficulty {}",
                share.id, difficulty
            )));
        }
        let network_difficulty = to_decimal(share.network_difficulty, "network difficulty", share)?;
        if network_difficulty <= Decimal::ZERO {
            return Err(PayoutError::InvalidShare(format!(
                "share {} has non-positive network difficulty {}",
                share.id, share.network_difficulty
            )));
        }

        *self
            .outcome
            .shares
            .entry(share.miner_address.clone())
            .or_insert(Decimal::ZERO) += difficulty;

        let mut score = difficulty
            .checked_div(network_difficulty)
            .ok_or_else(|| PayoutError::InvalidShare(format!("share {} score overflows", share.id)))?;

        if self.accumulated_score + score >= self.window {
            score = self.window - self.accumulated_score;
            self.outcome.cutoff = Some(share.created_at);
        }

        let reward = score * self.distributable / self.window;
        if reward > Decimal::ZERO {
            *self
                .outcome
                .rewards
                .entry(share.miner_address.clone())
                .or_insert(Decimal::ZERO) += reward;
        }
        self.remaining -= reward;

        if self.remaining < Decimal::ZERO && !self.is_full() {
            CONSERVATION_VIOLATIONS.inc();
            error!(
                "Reward conservation violated at share {}: remaining {} with accumulated score {} of {}",
                share.id, self.remaining, self.accumulated_score, self.window
            );
            return Err(PayoutError::ConservationViolation {
                remaining: self.remaining,
                accumulated_score: self.accumulated_score,
            });
        }

        self.accumulated_score += score;
        Ok(self.is_full())
    }

    pub fn finish(mut self) -> ScoreOutcome {
        self.outcome.accumulated_score = self.accumulated_score;
        self.outcome
    }
}

fn to_decimal(value: f64, what: &str, share: &Share) -> Result<Decimal> {
    if !value.is_finite() {
        return Err(PayoutError::InvalidShare(format!("share {} has {} {}", share.id, what, value)));
    }

    Decimal::from_f64(value)
        .ok_or_else(|| PayoutError::InvalidShare(format!("share {} {} {} out of range", share.id, what, value)))
}
