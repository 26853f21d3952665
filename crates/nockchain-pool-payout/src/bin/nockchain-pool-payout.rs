use std::sync::Arc;
use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use rust_decimal::Decimal;
use serde_json::json;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, error};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nockchain_pool_payout::{
    PayoutConfig,
    PoolConfig,
    PplnsPayoutScheme,
    config::{DEFAULT_PAGE_SIZE, DEFAULT_RETRY_ATTEMPTS},
    database::{Block, RedisStore},
    handler::{DefaultPayoutHandler, PayoutHandler},
    metrics::{register_metrics, metrics_handler},
};

#[derive(Parser, Debug)]
#[clap(name = "nockchain-pool-payout")]
#[clap(about = "Credit miner balances for a found block", long_about = None)]
struct Args {
    /// Redis URL for share and balance storage
    #[clap(long, env = "POOL_REDIS_URL", default_value = "redis://localhost:6379")]
    redis_url: String,

    #[clap(long, env = "POOL_ID")]
    pool_id: String,

    #[clap(long)]
    block_height: u64,

    /// Address of the miner who found the block
    #[clap(long)]
    finder: String,

    /// Reward to distribute
    #[clap(long)]
    reward: Decimal,

    /// Block creation time, RFC 3339
    #[clap(long)]
    block_time: DateTime<Utc>,

    /// Window size in network-difficulty units
    #[clap(long, env = "POOL_PPLNS_WINDOW")]
    window_factor: Option<Decimal>,

    /// Fraction of the reward credited to the finder
    #[clap(long, env = "POOL_FINDER_BONUS")]
    finder_bonus: Option<Decimal>,

    #[clap(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,

    #[clap(long, default_value_t = DEFAULT_RETRY_ATTEMPTS)]
    retry_attempts: usize,

    /// Page with a plain exclusive timestamp cursor
    #[clap(long)]
    no_boundary_dedup: bool,

    #[clap(long, default_value = "NOCK")]
    symbol: String,

    #[clap(long, default_value_t = 8)]
    decimals: u32,

    /// Dump prometheus metrics after the run
    #[clap(long)]
    print_metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Redis URL: {}", args.redis_url);
    register_metrics();

    let mut scheme_config = json!({});
    if let Some(factor) = args.window_factor {
        scheme_config["windowFactor"] = json!(factor.to_string());
    }
    if let Some(bonus) = args.finder_bonus {
        scheme_config["finderBonusFraction"] = json!(bonus.to_string());
    }
    let pool = PoolConfig::new(&args.pool_id).with_scheme_config(scheme_config);

    let block = Block {
        pool_id: args.pool_id.clone(),
        height: args.block_height,
        miner_address: args.finder.clone(),
        reward: args.reward,
        created_at: args.block_time,
    };

    let store = RedisStore::new(&args.redis_url)
        .await
        .context("Failed to connect to redis")?;

    let handler = Arc::new(DefaultPayoutHandler::new(args.symbol.clone(), args.decimals));
    let scheme = PplnsPayoutScheme::new(
        Arc::new(store.clone()),
        handler.clone(),
        PayoutConfig {
            page_size: args.page_size,
            retry_attempts: args.retry_attempts,
            dedup_page_boundaries: !args.no_boundary_dedup,
        },
    );

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, abandoning payout");
            cancel_on_signal.cancel();
        }
    });

    let mut tx = store.begin();
    let summary = match scheme.process(&mut tx, &pool, &block, args.reward, &cancel).await {
        Ok(summary) => summary,
        Err(e) => {
            error!("Payout for block {} failed, nothing written: {}", block.height, e);
            return Err(e.into());
        }
    };
    tx.commit().await.context("Failed to commit payout")?;

    info!(
        "Committed block {}: {} addresses paid, {} shares pruned",
        summary.block_height, summary.addresses_paid, summary.shares_pruned
    );

    let finder_balance = store
        .get_balance(&args.pool_id, &args.finder)
        .await
        .context("Failed to read finder balance")?;
    info!("Finder {} balance: {}", args.finder, handler.format_amount(finder_balance));

    if args.print_metrics {
        println!("{}", metrics_handler());
    }

    Ok(())
}
