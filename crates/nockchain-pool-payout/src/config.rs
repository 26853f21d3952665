use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{PayoutError, Result};

pub const DEFAULT_WINDOW_FACTOR: Decimal = dec!(2.0);
pub const DEFAULT_FINDER_BONUS_FRACTION: Decimal = dec!(0.10);
pub const DEFAULT_PAGE_SIZE: usize = 50_000;
pub const DEFAULT_RETRY_ATTEMPTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardWindowConfig {
    /// Window size in network-difficulty units. Always positive.
    pub window_factor: Decimal,
    /// Share of the block reward credited to the finder, in [0, 1].
    pub finder_bonus_fraction: Decimal,
}

impl Default for RewardWindowConfig {
    fn default() -> Self {
        Self {
            window_factor: DEFAULT_WINDOW_FACTOR,
            finder_bonus_fraction: DEFAULT_FINDER_BONUS_FRACTION,
        }
    }
}

impl RewardWindowConfig {
    pub fn new(window_factor: Decimal, finder_bonus_fraction: Decimal) -> Result<Self> {
        if !valid_window_factor(window_factor) {
            return Err(PayoutError::Configuration(format!(
                "window factor must be positive, got {}",
                window_factor
            )));
        }
        if !valid_bonus_fraction(finder_bonus_fraction) {
            return Err(PayoutError::Configuration(format!(
                "finder bonus fraction must be within [0, 1], got {}",
                finder_bonus_fraction
            )));
        }

        Ok(Self {
            window_factor,
            finder_bonus_fraction,
        })
    }

    /// Reads the pool's payout scheme settings. Anything missing or
    /// unusable falls back to its default.
    pub fn from_scheme_config(config: &Value) -> Self {
        let window_factor = lookup_decimal(config, &["windowFactor", "factor"])
            .filter(|v| valid_window_factor(*v))
            .unwrap_or_else(|| {
                debug!("Using default window factor {}", DEFAULT_WINDOW_FACTOR);
                DEFAULT_WINDOW_FACTOR
            });

        let finder_bonus_fraction = lookup_decimal(config, &["finderBonusFraction", "finderBonus"])
            .filter(|v| valid_bonus_fraction(*v))
            .unwrap_or_else(|| {
                debug!("Using default finder bonus fraction {}", DEFAULT_FINDER_BONUS_FRACTION);
                DEFAULT_FINDER_BONUS_FRACTION
            });

        Self {
            window_factor,
            finder_bonus_fraction,
        }
    }
}

fn valid_window_factor(value: Decimal) -> bool {
    value > Decimal::ZERO
}

fn valid_bonus_fraction(value: Decimal) -> bool {
    value >= Decimal::ZERO && value <= Decimal::ONE
}

fn lookup_decimal(config: &Value, keys: &[&str]) -> Option<Decimal> {
    keys.iter()
        .filter_map(|key| config.get(*key))
        .find_map(|value| match value {
            Value::Number(n) => parse_decimal(&n.to_string()),
            Value::String(s) => parse_decimal(s.trim()),
            _ => None,
        })
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    text.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

/// Scan parameters of a payout run.
#[derive(Debug, Clone)]
pub struct PayoutConfig {
    pub page_size: usize,
    /// Total attempts per page read, first try included.
    pub retry_attempts: usize,
    /// Re-read page boundaries inclusively and drop rows already seen, so
    /// shares with identical timestamps are neither skipped nor repeated.
    pub dedup_page_boundaries: bool,
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            dedup_page_boundaries: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub pool_id: String,
    #[serde(default)]
    pub payout_scheme_config: Value,
}

impl PoolConfig {
    pub fn new(pool_id: impl Into<String>) -> Self {
        Self {
            pool_id: pool_id.into(),
            payout_scheme_config: Value::Null,
        }
    }

    pub fn with_scheme_config(mut self, config: Value) -> Self {
        self.payout_scheme_config = config;
        self
    }

    pub fn reward_window(&self) -> RewardWindowConfig {
        RewardWindowConfig::from_scheme_config(&self.payout_scheme_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_when_absent() {
        assert_eq!(RewardWindowConfig::from_scheme_config(&Value::Null), RewardWindowConfig::default());
        assert_eq!(RewardWindowConfig::from_scheme_config(&json!({})), RewardWindowConfig::default());
    }

    #[test]
    fn test_reads_numbers_and_strings() {
        let config = RewardWindowConfig::from_scheme_config(&json!({
            "windowFactor": 3.5,
            "finderBonusFraction": "0.05",
        }));
        assert_eq!(config.window_factor, dec!(3.5));
        assert_eq!(config.finder_bonus_fraction, dec!(0.05));

        let aliased = RewardWindowConfig::from_scheme_config(&json!({ "factor": "1e1", "finderBonus": 0 }));
        assert_eq!(aliased.window_factor, dec!(10));
        assert_eq!(aliased.finder_bonus_fraction, Decimal::ZERO);
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let config = RewardWindowConfig::from_scheme_config(&json!({
            "windowFactor": "lots",
            "finderBonusFraction": 1.5,
        }));
        assert_eq!(config, RewardWindowConfig::default());

        let negative = RewardWindowConfig::from_scheme_config(&json!({ "windowFactor": -2, "finderBonusFraction": [0.1] }));
        assert_eq!(negative, RewardWindowConfig::default());

        let zero = RewardWindowConfig::from_scheme_config(&json!({ "windowFactor": 0 }));
        assert_eq!(zero.window_factor, DEFAULT_WINDOW_FACTOR);
    }

    #[test]
    fn test_new_validates() {
        assert!(RewardWindowConfig::new(dec!(2), dec!(0.1)).is_ok());
        assert!(matches!(
            RewardWindowConfig::new(Decimal::ZERO, dec!(0.1)),
            Err(PayoutError::Configuration(_))
        ));
        assert!(matches!(
            RewardWindowConfig::new(dec!(2), dec!(-0.1)),
            Err(PayoutError::Configuration(_))
        ));
    }

    #[test]
    fn test_pool_config_deserializes_without_scheme() {
        let pool: PoolConfig = serde_json::from_value(json!({ "pool_id": "nock1" })).unwrap();
        assert_eq!(pool.pool_id, "nock1");
        assert_eq!(pool.reward_window(), RewardWindowConfig::default());
    }
}
