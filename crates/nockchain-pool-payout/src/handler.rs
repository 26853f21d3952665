use rust_decimal::{Decimal, RoundingStrategy};

/// Coin-specific hooks used while scoring and reporting a payout.
pub trait PayoutHandler: Send + Sync {
    /// Normalizes a share's raw difficulty into the unit the network
    /// difficulty is expressed in.
    fn adjust_share_difficulty(&self, difficulty: f64) -> f64;

    fn format_amount(&self, amount: Decimal) -> String;
}

#[derive(Debug, Clone)]
pub struct DefaultPayoutHandler {
    pub symbol: String,
    pub decimals: u32,
}

impl DefaultPayoutHandler {
    pub fn new(symbol: impl Into<String>, decimals: u32) -> Self {
        Self {
            symbol: symbol.into(),
            decimals,
        }
    }
}

impl Default for DefaultPayoutHandler {
    fn default() -> Self {
        Self::new("NOCK", 8)
    }
}

impl PayoutHandler for DefaultPayoutHandler {
    fn adjust_share_difficulty(&self, difficulty: f64) -> f64 {
        difficulty
    }

    fn format_amount(&self, amount: Decimal) -> String {
        let rounded = amount.round_dp_with_strategy(self.decimals, RoundingStrategy::MidpointNearestEven);
        format!("{} {}", rounded, self.symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_handler() {
        let handler = DefaultPayoutHandler::new("NOCK", 4);
        assert_eq!(handler.adjust_share_difficulty(12.5), 12.5);
        assert_eq!(handler.format_amount(dec!(45.123456)), "45.1235 NOCK");
        assert_eq!(handler.format_amount(dec!(10)), "10 NOCK");
    }
}
