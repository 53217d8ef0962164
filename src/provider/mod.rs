//! Market data providers
//!
//! Each provider declares which operations it supports through
//! [`Capabilities`]; the registry checks them before dispatching so an
//! unsupported call never reaches the network.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub mod cache;
pub mod dexscreener;
pub mod jupiter;
pub mod registry;

pub use cache::ResponseCache;
pub use dexscreener::DexScreenerProvider;
pub use jupiter::JupiterProvider;
pub use registry::{ProviderRegistry, ProviderSummary};

/// Wrapped SOL mint, the usual quote side of a new pool
pub const WRAPPED_SOL: &str = "So11111111111111111111111111111111111111112";

/// Spot price quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceData {
    pub token: String,
    /// USD price
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(Error::Config(format!("unknown timeframe: {}", other))),
        }
    }
}

/// Token listing returned by search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Mint address, the dedup key when merging results
    pub address: String,
    pub symbol: String,
    pub name: String,
    /// Most liquid pool for the token, when the provider knows one
    pub pair_address: Option<String>,
    /// Quote side of that pool
    pub base_mint: Option<String>,
    pub liquidity_usd: Option<f64>,
    pub price_usd: Option<f64>,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Price,
    OrderBook,
    Ohlcv,
    Search,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Price => "get_price",
            Operation::OrderBook => "get_order_book",
            Operation::Ohlcv => "get_ohlcv",
            Operation::Search => "search_tokens",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations a provider supports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub price: bool,
    pub order_book: bool,
    pub ohlcv: bool,
    pub search: bool,
}

impl Capabilities {
    pub const ALL: Capabilities = Capabilities {
        price: true,
        order_book: true,
        ohlcv: true,
        search: true,
    };

    pub fn supports(&self, op: Operation) -> bool {
        match op {
            Operation::Price => self.price,
            Operation::OrderBook => self.order_book,
            Operation::Ohlcv => self.ohlcv,
            Operation::Search => self.search,
        }
    }
}

pub(crate) fn unsupported(provider: &str, op: Operation) -> Error {
    Error::UnsupportedCapability {
        provider: provider.to_string(),
        operation: op.as_str().to_string(),
    }
}

/// Connector to one external market data source.
///
/// Providers never retry; a failed call returns `Error::Provider` and the
/// registry moves on to the next source. Operations outside
/// [`capabilities`](MarketDataProvider::capabilities) fail with
/// `Error::UnsupportedCapability`.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// One-time setup, run by the registry before the health check
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> Result<()>;

    async fn get_price(&self, token: &str) -> Result<PriceData> {
        let _ = token;
        Err(unsupported(self.name(), Operation::Price))
    }

    async fn get_order_book(&self, token: &str, limit: usize) -> Result<OrderBook> {
        let _ = (token, limit);
        Err(unsupported(self.name(), Operation::OrderBook))
    }

    async fn get_ohlcv(&self, token: &str, timeframe: Timeframe) -> Result<Vec<Candle>> {
        let _ = (token, timeframe);
        Err(unsupported(self.name(), Operation::Ohlcv))
    }

    async fn search_tokens(&self, query: &str) -> Result<Vec<TokenInfo>> {
        let _ = query;
        Err(unsupported(self.name(), Operation::Search))
    }
}

/// Every provider the registry can hold
pub enum ProviderSource {
    DexScreener(DexScreenerProvider),
    Jupiter(JupiterProvider),
    /// Injected implementation (tests, private feeds)
    External(Arc<dyn MarketDataProvider>),
}

impl ProviderSource {
    fn inner(&self) -> &dyn MarketDataProvider {
        match self {
            ProviderSource::DexScreener(p) => p,
            ProviderSource::Jupiter(p) => p,
            ProviderSource::External(p) => p.as_ref(),
        }
    }
}

#[async_trait]
impl MarketDataProvider for ProviderSource {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner().capabilities()
    }

    async fn initialize(&self) -> Result<()> {
        self.inner().initialize().await
    }

    async fn health_check(&self) -> Result<()> {
        self.inner().health_check().await
    }

    async fn get_price(&self, token: &str) -> Result<PriceData> {
        self.inner().get_price(token).await
    }

    async fn get_order_book(&self, token: &str, limit: usize) -> Result<OrderBook> {
        self.inner().get_order_book(token, limit).await
    }

    async fn get_ohlcv(&self, token: &str, timeframe: Timeframe) -> Result<Vec<Candle>> {
        self.inner().get_ohlcv(token, timeframe).await
    }

    async fn search_tokens(&self, query: &str) -> Result<Vec<TokenInfo>> {
        self.inner().search_tokens(query).await
    }
}

/// Settings shared by the HTTP providers
#[derive(Debug, Clone, Deserialize)]
pub struct HttpProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Higher runs first; falls back to the provider's built-in priority
    #[serde(default)]
    pub priority: Option<i32>,
    /// Overrides the public API endpoint
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for HttpProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: None,
            base_url: None,
            api_key: None,
            timeout_ms: default_provider_timeout_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_provider_timeout_ms() -> u64 {
    2_000
}

fn default_cache_ttl_secs() -> u64 {
    10
}

impl HttpProviderConfig {
    fn validate(&self, name: &str) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::Config(format!(
                "providers.{}.timeout_ms must be positive",
                name
            )));
        }
        if let Some(url) = &self.base_url {
            url::Url::parse(url).map_err(|e| {
                Error::Config(format!("providers.{}.base_url is invalid: {}", name, e))
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub dexscreener: HttpProviderConfig,
    #[serde(default)]
    pub jupiter: HttpProviderConfig,
}

impl ProvidersConfig {
    pub fn validate(&self) -> Result<()> {
        self.dexscreener.validate("dexscreener")?;
        self.jupiter.validate("jupiter")?;
        Ok(())
    }
}

pub(crate) fn http_client(timeout_ms: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_millis(timeout_ms))
        .build()
        .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))
}

/// GET a JSON document, classifying failures for the registry
pub(crate) async fn fetch_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    provider: &str,
    op: Operation,
    url: &str,
    api_key: Option<&str>,
) -> std::result::Result<T, crate::error::ProviderError> {
    use crate::error::ProviderError;

    let mut request = client.get(url);
    if let Some(key) = api_key {
        request = request.header("x-api-key", key);
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            ProviderError::transient(provider, op.as_str(), "request timed out")
        } else {
            ProviderError::transient(provider, op.as_str(), e.to_string())
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let cause = format!("HTTP {}", status);
        return Err(if status.as_u16() == 429 || status.is_server_error() {
            ProviderError::transient(provider, op.as_str(), cause)
        } else {
            ProviderError::permanent(provider, op.as_str(), cause)
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::permanent(provider, op.as_str(), e.to_string()))
}
