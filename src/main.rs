use contribution_aggregator::{api, build_coordinator, config, coordinator::QueryCoordinator};
use tokio::signal;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Periodically reclaim expired cache entries; reads already ignore them.
async fn sweep_cache(coordinator: QueryCoordinator) {
    let period = coordinator.cache().ttl().max(std::time::Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let purged = coordinator.cache().purge_expired();
        if purged > 0 {
            debug!("Purged {} expired cache entries", purged);
        }
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stdout)
        .with_target(false)
        .init();

    info!("Contribution aggregator starting...");

    let cfg = config::load()?;
    info!("  RPC URL: {}", cfg.rpc_http_url);
    info!("  Collection address: {}", cfg.collection_address);
    info!("  Token: {} ({} decimals)", cfg.token_address, cfg.token_decimals);
    info!("  Lookback: {} blocks", cfg.lookback_blocks);
    info!("  Cache TTL: {:?}", cfg.cache_ttl);
    info!("  Conversion rate: {}", cfg.conversion_rate);

    let coordinator = build_coordinator(&cfg)?;

    let api_handle = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { api::serve(cfg.port, coordinator).await }
    });
    let sweeper = tokio::spawn(sweep_cache(coordinator));

    tokio::select! {
        res = api_handle => match res {
            Ok(Ok(_)) => info!("API exited cleanly"),
            Ok(Err(e)) => error!("API error: {:?}", e),
            Err(e) => error!("API task panicked: {:?}", e),
        },
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, stopping...");
        }
    }

    sweeper.abort();
    info!("Contribution aggregator stopped.");
    Ok(())
}
