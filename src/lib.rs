pub mod aggregator;
pub mod api;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod models;
pub mod parser;
pub mod rpc;
pub mod window;

use std::sync::Arc;

use aggregator::Aggregator;
use cache::ResultCache;
use config::Config;
use coordinator::QueryCoordinator;
use error::ContributionError;
use rpc::JsonRpcLedger;
use window::WindowSelector;

/// Wire a coordinator against the JSON-RPC node named in `cfg`.
pub fn build_coordinator(cfg: &Config) -> Result<QueryCoordinator, ContributionError> {
    let ledger = JsonRpcLedger::new(
        &cfg.rpc_http_url,
        cfg.token_address,
        cfg.rpc_timeout,
        cfg.log_chunk_blocks,
    )?;

    Ok(QueryCoordinator::new(
        Arc::new(ledger),
        WindowSelector::new(cfg.lookback_blocks),
        Aggregator::new(cfg.conversion_rate, cfg.token_decimals),
        ResultCache::new(cfg.cache_ttl),
        cfg.collection_address,
        cfg.rpc_timeout,
    ))
}
