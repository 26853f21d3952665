pub mod accumulator;
pub mod config;
pub mod database;
pub mod error;
pub mod fault;
pub mod handler;
pub mod metrics;
pub mod pager;
pub mod reporter;
pub mod scheme;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{PayoutConfig, PoolConfig, RewardWindowConfig};
pub use error::{PayoutError, Result};
pub use scheme::{PayoutSummary, PplnsPayoutScheme};
