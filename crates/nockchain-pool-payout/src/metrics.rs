use prometheus::{Counter, Encoder, Histogram, HistogramOpts, TextEncoder};
use lazy_static::lazy_static;
use tracing::warn;

lazy_static! {
    pub static ref BLOCKS_PROCESSED: Counter = Counter::new(
        "payout_blocks_processed_total",
        "Total number of blocks paid out"
    ).unwrap();

    pub static ref PAGE_READS: Counter = Counter::new(
        "payout_page_reads_total",
        "Total number of share pages read"
    ).unwrap();

    pub static ref PAGE_READ_RETRIES: Counter = Counter::new(
        "payout_page_read_retries_total",
        "Total number of page reads retried after a transient failure"
    ).unwrap();

    pub static ref SHARES_PRUNED: Counter = Counter::new(
        "payout_shares_pruned_total",
        "Total number of shares deleted behind a reward window"
    ).unwrap();

    pub static ref CONSERVATION_VIOLATIONS: Counter = Counter::new(
        "payout_conservation_violations_total",
        "Total number of payouts aborted on a reward conservation violation"
    ).unwrap();

    pub static ref PAYOUT_PROCESSING_TIME: Histogram = Histogram::with_opts(
        HistogramOpts::new("payout_processing_seconds", "Time to process a block payout")
    ).unwrap();
}

pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(BLOCKS_PROCESSED.clone()),
        Box::new(PAGE_READS.clone()),
        Box::new(PAGE_READ_RETRIES.clone()),
        Box::new(SHARES_PRUNED.clone()),
        Box::new(CONSERVATION_VIOLATIONS.clone()),
        Box::new(PAYOUT_PROCESSING_TIME.clone()),
    ];

    for collector in collectors {
        if let Err(e) = prometheus::register(collector) {
            warn!("Failed to register metric: {}", e);
        }
    }
}

pub fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
