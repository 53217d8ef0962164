//! DexScreener market data provider
//!
//! Prices and pool discovery from the public token-pairs API. DexScreener has
//! no order book or candle endpoints, so those capabilities are absent.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::cache::{CachedValue, ResponseCache};
use super::{
    fetch_json, http_client, Capabilities, HttpProviderConfig, MarketDataProvider, Operation,
    PriceData, TokenInfo,
};
use super::WRAPPED_SOL;
use crate::error::{ProviderError, Result};

const DEXSCREENER_BASE: &str = "https://api.dexscreener.com";
pub const DEFAULT_PRIORITY: i32 = 100;
const NAME: &str = "dexscreener";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Liquidity {
    pub usd: Option<f64>,
    pub base: Option<f64>,
    pub quote: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairToken {
    pub address: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexPair {
    #[serde(rename = "chainId")]
    pub chain_id: String,
    #[serde(rename = "dexId")]
    pub dex_id: String,
    #[serde(rename = "pairAddress")]
    pub pair_address: String,
    #[serde(rename = "baseToken")]
    pub base_token: PairToken,
    #[serde(rename = "quoteToken")]
    pub quote_token: Option<PairToken>,
    #[serde(rename = "priceUsd")]
    pub price_usd: Option<String>,
    pub liquidity: Option<Liquidity>,
}

impl DexPair {
    fn liquidity_usd(&self) -> f64 {
        self.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0)
    }

    fn price(&self) -> Option<f64> {
        self.price_usd.as_ref().and_then(|p| p.parse::<f64>().ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPairsResponse {
    pub pairs: Option<Vec<DexPair>>,
}

pub struct DexScreenerProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    cache: ResponseCache,
}

impl DexScreenerProvider {
    pub fn new(config: &HttpProviderConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_ms)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEXSCREENER_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: config.api_key.clone(),
            cache: ResponseCache::new(Duration::from_secs(config.cache_ttl_secs)),
        })
    }

    pub fn priority(config: &HttpProviderConfig) -> i32 {
        config.priority.unwrap_or(DEFAULT_PRIORITY)
    }

    async fn fetch_pairs(
        &self,
        op: Operation,
        url: &str,
    ) -> std::result::Result<Vec<DexPair>, ProviderError> {
        let response: TokenPairsResponse =
            fetch_json(&self.client, NAME, op, url, self.api_key.as_deref()).await?;
        Ok(response
            .pairs
            .unwrap_or_default()
            .into_iter()
            .filter(|p| p.chain_id == "solana")
            .collect())
    }

    /// Pairs where `mint` is the base token
    async fn token_pairs(
        &self,
        op: Operation,
        mint: &str,
    ) -> std::result::Result<Vec<DexPair>, ProviderError> {
        let url = format!("{}/latest/dex/tokens/{}", self.base_url, mint);
        let pairs = self.fetch_pairs(op, &url).await?;
        Ok(pairs
            .into_iter()
            .filter(|p| p.base_token.address == mint)
            .collect())
    }
}

/// Collapse pairs to one listing per token, keeping its deepest pool
pub fn pairs_to_tokens(pairs: Vec<DexPair>) -> Vec<TokenInfo> {
    let mut best: HashMap<String, DexPair> = HashMap::new();
    let mut order = Vec::new();

    for pair in pairs {
        let address = pair.base_token.address.clone();
        match best.get(&address) {
            Some(existing) if existing.liquidity_usd() >= pair.liquidity_usd() => {}
            Some(_) => {
                best.insert(address, pair);
            }
            None => {
                order.push(address.clone());
                best.insert(address, pair);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|address| best.remove(&address))
        .map(|pair| TokenInfo {
            address: pair.base_token.address.clone(),
            symbol: pair.base_token.symbol.clone().unwrap_or_default(),
            name: pair.base_token.name.clone().unwrap_or_default(),
            pair_address: Some(pair.pair_address.clone()),
            base_mint: pair.quote_token.as_ref().map(|q| q.address.clone()),
            liquidity_usd: pair.liquidity.as_ref().and_then(|l| l.usd),
            price_usd: pair.price(),
            source: NAME.to_string(),
        })
        .collect()
}

#[async_trait]
impl MarketDataProvider for DexScreenerProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            price: true,
            search: true,
            ..Default::default()
        }
    }

    async fn health_check(&self) -> Result<()> {
        self.token_pairs(Operation::Price, WRAPPED_SOL).await?;
        Ok(())
    }

    async fn get_price(&self, token: &str) -> Result<PriceData> {
        let key = ResponseCache::key(Operation::Price, &[token]);
        if let Some(CachedValue::Price(price)) = self.cache.get(&key) {
            return Ok(price);
        }

        let pairs = self.token_pairs(Operation::Price, token).await?;
        let deepest = pairs
            .iter()
            .filter(|p| p.price().is_some())
            .max_by(|a, b| a.liquidity_usd().total_cmp(&b.liquidity_usd()))
            .ok_or_else(|| {
                ProviderError::permanent(NAME, Operation::Price.as_str(), "no priced pair")
            })?;

        let price = PriceData {
            token: token.to_string(),
            value: deepest.price().unwrap_or_default(),
            timestamp: Utc::now(),
            source: NAME.to_string(),
        };
        debug!(token = %token, price = price.value, "DexScreener price");
        self.cache.insert(key, CachedValue::Price(price.clone()));
        Ok(price)
    }

    async fn search_tokens(&self, query: &str) -> Result<Vec<TokenInfo>> {
        let key = ResponseCache::key(Operation::Search, &[query]);
        if let Some(CachedValue::Tokens(tokens)) = self.cache.get(&key) {
            return Ok(tokens);
        }

        // Addresses go straight to the token endpoint, anything else is a text search
        let pairs = if Pubkey::from_str(query).is_ok() {
            self.token_pairs(Operation::Search, query).await?
        } else {
            let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
            let url = format!("{}/latest/dex/search?q={}", self.base_url, encoded);
            self.fetch_pairs(Operation::Search, &url).await?
        };

        let tokens = pairs_to_tokens(pairs);
        self.cache.insert(key, CachedValue::Tokens(tokens.clone()));
        Ok(tokens)
    }
}
