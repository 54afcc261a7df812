#![cfg(feature = "metrics")]

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_gauge, IntCounter, IntGauge};

pub static TXPOOL_WEIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("xeq_core_txpool_weight_bytes", "Total weight of pooled txs").unwrap()
});

pub static TXPOOL_TXS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("xeq_core_txpool_txs", "Number of txs in the pool").unwrap()
});

pub static SERVICE_NODE_COUNT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "xeq_core_service_nodes",
        "Service nodes currently in the registry"
    )
    .unwrap()
});

pub static BLOCKS_PROCESSED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "xeq_core_blocks_processed_total",
        "Blocks consumed by the registry"
    )
    .unwrap()
});
