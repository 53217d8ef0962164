//! Jupiter market data provider (price and token search APIs)

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::cache::{CachedValue, ResponseCache};
use super::{
    fetch_json, http_client, Capabilities, HttpProviderConfig, MarketDataProvider, Operation,
    PriceData, TokenInfo,
};
use super::WRAPPED_SOL;
use crate::error::{ProviderError, Result};

const JUPITER_BASE: &str = "https://lite-api.jup.ag";
pub const DEFAULT_PRIORITY: i32 = 50;
const NAME: &str = "jupiter";

/// Entry of the price API response, keyed by mint
#[derive(Debug, Deserialize)]
struct JupiterPrice {
    #[serde(rename = "usdPrice")]
    usd_price: f64,
}

/// Token search result
#[derive(Debug, Deserialize)]
struct JupiterToken {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    symbol: String,
    #[serde(rename = "usdPrice", default)]
    usd_price: Option<f64>,
    #[serde(default)]
    liquidity: Option<f64>,
}

impl From<JupiterToken> for TokenInfo {
    fn from(token: JupiterToken) -> Self {
        TokenInfo {
            address: token.id,
            symbol: token.symbol,
            name: token.name,
            // Jupiter aggregates routes and does not name a single pool
            pair_address: None,
            base_mint: None,
            liquidity_usd: token.liquidity,
            price_usd: token.usd_price,
            source: NAME.to_string(),
        }
    }
}

pub struct JupiterProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    cache: ResponseCache,
}

impl JupiterProvider {
    pub fn new(config: &HttpProviderConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_ms)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| JUPITER_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: config.api_key.clone(),
            cache: ResponseCache::new(Duration::from_secs(config.cache_ttl_secs)),
        })
    }

    pub fn priority(config: &HttpProviderConfig) -> i32 {
        config.priority.unwrap_or(DEFAULT_PRIORITY)
    }

    async fn fetch_price(&self, token: &str) -> std::result::Result<f64, ProviderError> {
        let url = format!("{}/price/v3?ids={}", self.base_url, token);
        let prices: HashMap<String, JupiterPrice> = fetch_json(
            &self.client,
            NAME,
            Operation::Price,
            &url,
            self.api_key.as_deref(),
        )
        .await?;

        prices
            .get(token)
            .map(|p| p.usd_price)
            .ok_or_else(|| ProviderError::permanent(NAME, Operation::Price.as_str(), "token not priced"))
    }
}

#[async_trait]
impl MarketDataProvider for JupiterProvider {
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
        self.fetch_price(WRAPPED_SOL).await?;
        Ok(())
    }

    async fn get_price(&self, token: &str) -> Result<PriceData> {
        let key = ResponseCache::key(Operation::Price, &[token]);
        if let Some(CachedValue::Price(price)) = self.cache.get(&key) {
            return Ok(price);
        }

        let value = self.fetch_price(token).await?;
        debug!(token = %token, price = value, "Jupiter price");

        let price = PriceData {
            token: token.to_string(),
            value,
            timestamp: Utc::now(),
            source: NAME.to_string(),
        };
        self.cache.insert(key, CachedValue::Price(price.clone()));
        Ok(price)
    }

    async fn search_tokens(&self, query: &str) -> Result<Vec<TokenInfo>> {
        let key = ResponseCache::key(Operation::Search, &[query]);
        if let Some(CachedValue::Tokens(tokens)) = self.cache.get(&key) {
            return Ok(tokens);
        }

        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        let url = format!("{}/tokens/v2/search?query={}", self.base_url, encoded);
        let found: Vec<JupiterToken> = fetch_json(
            &self.client,
            NAME,
            Operation::Search,
            &url,
            self.api_key.as_deref(),
        )
        .await?;

        let tokens: Vec<TokenInfo> = found.into_iter().map(TokenInfo::from).collect();
        self.cache.insert(key, CachedValue::Tokens(tokens.clone()));
        Ok(tokens)
    }
}
