//! One-shot contribution lookup against the configured ledger node.
//!
//! Usage: contribution-probe <address>

use anyhow::{bail, Context};
use contribution_aggregator::{build_coordinator, config::Config, models::ParticipantAddress};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let Some(raw) = std::env::args().nth(1) else {
        bail!("usage: contribution-probe <address>");
    };
    let address = ParticipantAddress::parse(&raw)?;

    let cfg = Config::from_lookup(|key| std::env::var(key).ok())
        .map_err(|e| anyhow::anyhow!("{e:#}"))?;
    let coordinator = build_coordinator(&cfg).context("building ledger client")?;

    println!(
        "Querying {} → {} over the last {} blocks of {}",
        address, cfg.collection_address, cfg.lookback_blocks, cfg.rpc_http_url
    );

    let result = coordinator
        .query(address)
        .await
        .with_context(|| format!("contribution query for {} failed", address))?;

    println!(
        "{:#}",
        json!({
            "address": address,
            "contribution": result.value.contribution.to_string(),
            "expectedTokens": result.value.expected_allocation.to_string(),
            "computedAt": result.computed_at_utc,
        })
    );

    Ok(())
}
