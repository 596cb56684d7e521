use dotenvy::dotenv;
use eyre::{eyre, Result, WrapErr};
use rust_decimal::Decimal;
use std::{env, str::FromStr, time::Duration};
use tracing::info;

use crate::models::ParticipantAddress;

/// A `U256` amount has at most 78 digits; a larger exponent is a typo.
const MAX_TOKEN_DECIMALS: u32 = 77;

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_http_url: String,
    pub collection_address: ParticipantAddress,
    pub token_address: ParticipantAddress,
    pub token_decimals: u32,
    pub lookback_blocks: u64,
    pub cache_ttl: Duration,
    pub conversion_rate: Decimal,
    pub rpc_timeout: Duration,
    pub log_chunk_blocks: Option<u64>,
    pub port: u16,
}

pub fn load() -> Result<Config> {
    dotenv().ok(); // Load from .env file if present

    let cfg = Config::from_lookup(|key| env::var(key).ok())?;
    info!("Loaded config: {:?}", cfg);
    Ok(cfg)
}

impl Config {
    /// Build a config from any key lookup (the process environment in `load`).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let rpc_http_url = lookup("RPC_HTTP_URL")
            .or_else(|| lookup("LEDGER_ENDPOINT"))
            .unwrap_or_else(|| "https://polygon-rpc.com".to_string());

        let collection_address = required_address(&lookup, "COLLECTION_ADDRESS")?;
        let token_address = required_address(&lookup, "TOKEN_ADDRESS")?;

        let token_decimals: u32 = parse_or(&lookup, "TOKEN_DECIMALS", 18)?;
        if token_decimals > MAX_TOKEN_DECIMALS {
            return Err(eyre!(
                "TOKEN_DECIMALS must be at most {}, got {}",
                MAX_TOKEN_DECIMALS,
                token_decimals
            ));
        }

        let lookback_blocks = parse_or(&lookup, "LOOKBACK_BLOCKS", 10_000)?;
        let cache_ttl = Duration::from_secs(parse_or(&lookup, "CACHE_TTL_SECONDS", 300)?);
        let conversion_rate = parse_or(&lookup, "CONVERSION_RATE", Decimal::from(13_000))?;
        let rpc_timeout = Duration::from_secs(parse_or(&lookup, "RPC_TIMEOUT_SECS", 15)?);
        let log_chunk_blocks = lookup("LOG_CHUNK_BLOCKS")
            .map(|raw| parse_value::<u64>("LOG_CHUNK_BLOCKS", &raw))
            .transpose()?;
        let port = parse_or(&lookup, "PORT", 8080)?;

        Ok(Self {
            rpc_http_url,
            collection_address,
            token_address,
            token_decimals,
            lookback_blocks,
            cache_ttl,
            conversion_rate,
            rpc_timeout,
            log_chunk_blocks,
            port,
        })
    }
}

fn required_address(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<ParticipantAddress> {
    let raw = lookup(key).ok_or_else(|| eyre!("{} must be set", key))?;
    ParticipantAddress::parse(&raw).wrap_err_with(|| format!("{} is not a valid address", key))
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| eyre!("invalid {} `{}`: {}", key, raw, e))
}
