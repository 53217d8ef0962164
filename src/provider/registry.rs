//! Provider registry with priority failover and search merging

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{
    Candle, Capabilities, DexScreenerProvider, JupiterProvider, MarketDataProvider, Operation,
    OrderBook, PriceData, ProviderSource, ProvidersConfig, Timeframe, TokenInfo,
};
use crate::error::{Error, ProviderError, Result};

struct RegisteredProvider {
    source: ProviderSource,
    priority: i32,
    timeout: Duration,
}

impl RegisteredProvider {
    fn name(&self) -> &str {
        self.source.name()
    }
}

/// Registered provider as shown to operators
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSummary {
    pub name: String,
    pub priority: i32,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub name: String,
    pub healthy: bool,
    pub error: Option<String>,
}

/// Providers ordered by priority, highest first
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<Vec<Arc<RegisteredProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every enabled HTTP provider. Providers that fail
    /// registration are logged and left out.
    pub async fn from_config(config: &ProvidersConfig) -> Result<Self> {
        let registry = Self::new();

        if config.dexscreener.enabled {
            let provider = DexScreenerProvider::new(&config.dexscreener)?;
            if let Err(e) = registry
                .register(
                    ProviderSource::DexScreener(provider),
                    DexScreenerProvider::priority(&config.dexscreener),
                    Duration::from_millis(config.dexscreener.timeout_ms),
                )
                .await
            {
                warn!("Skipping DexScreener provider: {}", e);
            }
        }

        if config.jupiter.enabled {
            let provider = JupiterProvider::new(&config.jupiter)?;
            if let Err(e) = registry
                .register(
                    ProviderSource::Jupiter(provider),
                    JupiterProvider::priority(&config.jupiter),
                    Duration::from_millis(config.jupiter.timeout_ms),
                )
                .await
            {
                warn!("Skipping Jupiter provider: {}", e);
            }
        }

        if registry.is_empty().await {
            warn!("No market data providers registered; pool discovery will reject every candidate");
        }

        Ok(registry)
    }

    /// Initialize and health-check a provider, then add it.
    /// A provider that fails either step is not added.
    pub async fn register(
        &self,
        source: ProviderSource,
        priority: i32,
        timeout: Duration,
    ) -> Result<()> {
        let name = source.name().to_string();

        if self.contains(&name).await {
            return Err(Error::ProviderRegistration {
                provider: name,
                reason: "already registered".into(),
            });
        }

        let registration_failed = |step: &str, reason: String| Error::ProviderRegistration {
            provider: name.clone(),
            reason: format!("{}: {}", step, reason),
        };

        match tokio::time::timeout(timeout, source.initialize()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(registration_failed("initialize", e.to_string())),
            Err(_) => return Err(registration_failed("initialize", "timed out".into())),
        }

        match tokio::time::timeout(timeout, source.health_check()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(registration_failed("health check", e.to_string())),
            Err(_) => return Err(registration_failed("health check", "timed out".into())),
        }

        let entry = Arc::new(RegisteredProvider {
            source,
            priority,
            timeout,
        });

        let mut providers = self.providers.write().await;
        // Re-check under the write lock; registration awaited without it
        if providers.iter().any(|p| p.name() == name) {
            return Err(Error::ProviderRegistration {
                provider: name,
                reason: "already registered".into(),
            });
        }
        // Equal priorities keep registration order
        let position = providers
            .iter()
            .position(|p| p.priority < priority)
            .unwrap_or(providers.len());
        providers.insert(position, entry);

        info!(provider = %name, priority, "Registered market data provider");
        Ok(())
    }

    /// Convenience for injected providers
    pub async fn register_external(
        &self,
        provider: Arc<dyn MarketDataProvider>,
        priority: i32,
        timeout: Duration,
    ) -> Result<()> {
        self.register(ProviderSource::External(provider), priority, timeout)
            .await
    }

    pub async fn unregister(&self, name: &str) -> bool {
        let mut providers = self.providers.write().await;
        let before = providers.len();
        providers.retain(|p| p.name() != name);
        let removed = providers.len() != before;
        if removed {
            info!(provider = %name, "Unregistered market data provider");
        }
        removed
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.providers.read().await.iter().any(|p| p.name() == name)
    }

    pub async fn is_empty(&self) -> bool {
        self.providers.read().await.is_empty()
    }

    pub async fn providers(&self) -> Vec<ProviderSummary> {
        self.providers
            .read()
            .await
            .iter()
            .map(|p| ProviderSummary {
                name: p.name().to_string(),
                priority: p.priority,
                capabilities: p.source.capabilities(),
            })
            .collect()
    }

    pub async fn health_check_all(&self) -> Vec<ProviderHealth> {
        let providers = self.snapshot().await;
        let checks = providers.iter().map(|p| async move {
            let result = match tokio::time::timeout(p.timeout, p.source.health_check()).await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!("timed out after {}ms", p.timeout.as_millis())),
            };
            ProviderHealth {
                name: p.name().to_string(),
                healthy: result.is_none(),
                error: result,
            }
        });
        join_all(checks).await
    }

    pub async fn get_price(&self, token: &str) -> Result<PriceData> {
        self.failover(Operation::Price, |p| async move {
            p.source.get_price(token).await
        })
        .await
    }

    pub async fn get_order_book(&self, token: &str, limit: usize) -> Result<OrderBook> {
        self.failover(Operation::OrderBook, |p| async move {
            p.source.get_order_book(token, limit).await
        })
        .await
    }

    pub async fn get_ohlcv(&self, token: &str, timeframe: Timeframe) -> Result<Vec<Candle>> {
        self.failover(Operation::Ohlcv, |p| async move {
            p.source.get_ohlcv(token, timeframe).await
        })
        .await
    }

    /// Query every capable provider concurrently and merge by token address.
    /// On conflict the higher-priority provider's entry wins.
    pub async fn search_tokens(&self, query: &str) -> Result<Vec<TokenInfo>> {
        let op = Operation::Search;
        let candidates = self.capable(op).await;
        if candidates.is_empty() {
            return Err(Error::NoCapableProvider(op.as_str().into()));
        }

        let searches = candidates.iter().map(|p| async move {
            let outcome = tokio::time::timeout(p.timeout, p.source.search_tokens(query)).await;
            (p, outcome)
        });

        // join_all keeps input order, so results arrive in priority order
        let results = join_all(searches).await;

        let mut merged: Vec<TokenInfo> = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut last_error = None;
        let mut answered = false;

        for (provider, outcome) in results {
            match flatten(provider, op, outcome) {
                Ok(tokens) => {
                    answered = true;
                    for token in tokens {
                        match seen.get(&token.address) {
                            Some(&index) => adopt_pool(&mut merged[index], token),
                            None => {
                                seen.insert(token.address.clone(), merged.len());
                                merged.push(token);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(provider = %provider.name(), operation = %op, "Provider failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        if !answered {
            return Err(exhausted(op, last_error));
        }

        debug!(query = %query, results = merged.len(), "Merged token search");
        Ok(merged)
    }

    async fn snapshot(&self) -> Vec<Arc<RegisteredProvider>> {
        self.providers.read().await.clone()
    }

    async fn capable(&self, op: Operation) -> Vec<Arc<RegisteredProvider>> {
        self.snapshot()
            .await
            .into_iter()
            .filter(|p| p.source.capabilities().supports(op))
            .collect()
    }

    /// Try capable providers in priority order until one answers
    async fn failover<T, F, Fut>(&self, op: Operation, call: F) -> Result<T>
    where
        F: Fn(Arc<RegisteredProvider>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let candidates = self.capable(op).await;
        if candidates.is_empty() {
            return Err(Error::NoCapableProvider(op.as_str().into()));
        }

        let mut last_error = None;
        for provider in candidates {
            let outcome = tokio::time::timeout(provider.timeout, call(provider.clone())).await;
            match flatten(&provider, op, outcome) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(
                        provider = %provider.name(),
                        operation = %op,
                        "Provider failed, trying next: {}",
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(exhausted(op, last_error))
    }
}

/// Fold a timed call into a single provider-level result
fn flatten<T>(
    provider: &RegisteredProvider,
    op: Operation,
    outcome: std::result::Result<Result<T>, tokio::time::error::Elapsed>,
) -> std::result::Result<T, ProviderError> {
    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(Error::Provider(e))) => Err(e),
        Ok(Err(e)) => Err(ProviderError::new(
            provider.name(),
            op.as_str(),
            e.to_string(),
            e.is_retryable(),
        )),
        Err(_) => Err(ProviderError::timeout(
            provider.name(),
            op.as_str(),
            provider.timeout.as_millis() as u64,
        )),
    }
}

fn exhausted(op: Operation, last: Option<ProviderError>) -> Error {
    Error::AllProvidersExhausted {
        operation: op.as_str().into(),
        last: Box::new(
            last.unwrap_or_else(|| ProviderError::permanent("registry", op.as_str(), "no answer")),
        ),
    }
}

/// Keep the higher-priority listing, but take pool details from a lower
/// one when the winner has none.
fn adopt_pool(winner: &mut TokenInfo, other: TokenInfo) {
    if winner.pair_address.is_some() || other.pair_address.is_none() {
        return;
    }
    winner.pair_address = other.pair_address;
    winner.base_mint = other.base_mint;
    winner.liquidity_usd = other.liquidity_usd;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MarketDataProvider;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProvider {
        name: String,
        fail: bool,
        healthy: bool,
        delay: Duration,
        price: f64,
        tokens: Vec<TokenInfo>,
        calls: AtomicUsize,
    }

    impl FakeProvider {
        fn new(name: &str) -> Self {
            Self {
                name: name.into(),
                fail: false,
                healthy: true,
                delay: Duration::ZERO,
                price: 1.0,
                tokens: Vec::new(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    fn token(address: &str, symbol: &str, source: &str) -> TokenInfo {
        TokenInfo {
            address: address.into(),
            symbol: symbol.into(),
            name: symbol.into(),
            pair_address: None,
            base_mint: None,
            liquidity_usd: None,
            price_usd: None,
            source: source.into(),
        }
    }

    #[async_trait]
    impl MarketDataProvider for FakeProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                price: true,
                search: true,
                ..Default::default()
            }
        }

        async fn health_check(&self) -> Result<()> {
            if self.healthy {
                Ok(())
            } else {
                Err(ProviderError::transient(&self.name, "health_check", "down").into())
            }
        }

        async fn get_price(&self, token: &str) -> Result<PriceData> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(ProviderError::transient(&self.name, "get_price", "503").into());
            }
            Ok(PriceData {
                token: token.into(),
                value: self.price,
                timestamp: Utc::now(),
                source: self.name.clone(),
            })
        }

        async fn search_tokens(&self, _query: &str) -> Result<Vec<TokenInfo>> {
            if self.fail {
                return Err(ProviderError::transient(&self.name, "search_tokens", "503").into());
            }
            Ok(self.tokens.clone())
        }
    }

    const TIMEOUT: Duration = Duration::from_millis(500);

    #[tokio::test]
    async fn test_priority_order_and_failover() {
        let registry = ProviderRegistry::new();

        let primary = Arc::new(FakeProvider {
            fail: true,
            ..FakeProvider::new("primary")
        });
        let backup = Arc::new(FakeProvider {
            price: 2.5,
            ..FakeProvider::new("backup")
        });

        registry.register_external(backup.clone(), 10, TIMEOUT).await.unwrap();
        registry.register_external(primary.clone(), 90, TIMEOUT).await.unwrap();

        let names: Vec<_> = registry.providers().await.into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["primary", "backup"]);

        let price = registry.get_price("mint").await.unwrap();
        assert_eq!(price.source, "backup");
        assert_eq!(price.value, 2.5);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_providers_exhausted_wraps_last_error() {
        let registry = ProviderRegistry::new();
        for (name, priority) in [("a", 2), ("b", 1)] {
            let p = Arc::new(FakeProvider {
                fail: true,
                ..FakeProvider::new(name)
            });
            registry.register_external(p, priority, TIMEOUT).await.unwrap();
        }

        match registry.get_price("mint").await {
            Err(Error::AllProvidersExhausted { last, .. }) => assert_eq!(last.provider, "b"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsupported_operation_has_no_capable_provider() {
        let registry = ProviderRegistry::new();
        registry
            .register_external(Arc::new(FakeProvider::new("a")), 1, TIMEOUT)
            .await
            .unwrap();

        let err = registry.get_ohlcv("mint", Timeframe::H1).await.unwrap_err();
        assert!(matches!(err, Error::NoCapableProvider(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out_and_falls_through() {
        let registry = ProviderRegistry::new();
        let slow = Arc::new(FakeProvider {
            delay: Duration::from_secs(30),
            ..FakeProvider::new("slow")
        });
        registry.register_external(slow, 10, TIMEOUT).await.unwrap();
        registry
            .register_external(Arc::new(FakeProvider::new("fast")), 1, TIMEOUT)
            .await
            .unwrap();

        let price = registry.get_price("mint").await.unwrap();
        assert_eq!(price.source, "fast");
    }

    #[tokio::test]
    async fn test_search_merge_prefers_higher_priority() {
        let registry = ProviderRegistry::new();
        let a = Arc::new(FakeProvider {
            tokens: vec![token("X", "AAA", "a"), token("Y", "YYY", "a")],
            ..FakeProvider::new("a")
        });
        let b = Arc::new(FakeProvider {
            tokens: vec![token("X", "BBB", "b"), token("Z", "ZZZ", "b")],
            ..FakeProvider::new("b")
        });
        registry.register_external(b, 1, TIMEOUT).await.unwrap();
        registry.register_external(a, 5, TIMEOUT).await.unwrap();

        let merged = registry.search_tokens("query").await.unwrap();
        assert_eq!(merged.len(), 3);

        let x: Vec<_> = merged.iter().filter(|t| t.address == "X").collect();
        assert_eq!(x.len(), 1);
        assert_eq!(x[0].symbol, "AAA");
        assert_eq!(x[0].source, "a");
    }

    #[tokio::test]
    async fn test_search_merge_keeps_pool_from_lower_priority() {
        let registry = ProviderRegistry::new();
        // Jupiter-style listing: metadata only, no pool
        let jupiter = Arc::new(FakeProvider {
            tokens: vec![token("X", "JUP", "jupiter")],
            ..FakeProvider::new("jupiter")
        });
        let dexscreener = Arc::new(FakeProvider {
            tokens: vec![TokenInfo {
                pair_address: Some("pool-x".into()),
                base_mint: Some("base".into()),
                liquidity_usd: Some(42_000.0),
                ..token("X", "DEX", "dexscreener")
            }],
            ..FakeProvider::new("dexscreener")
        });
        registry.register_external(jupiter, 200, TIMEOUT).await.unwrap();
        registry.register_external(dexscreener, 100, TIMEOUT).await.unwrap();

        let merged = registry.search_tokens("X").await.unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source, "jupiter");
        assert_eq!(merged[0].pair_address.as_deref(), Some("pool-x"));
        assert_eq!(merged[0].base_mint.as_deref(), Some("base"));
        assert_eq!(merged[0].liquidity_usd, Some(42_000.0));
    }

    #[tokio::test]
    async fn test_search_survives_one_failing_provider() {
        let registry = ProviderRegistry::new();
        let broken = Arc::new(FakeProvider {
            fail: true,
            ..FakeProvider::new("broken")
        });
        let ok = Arc::new(FakeProvider {
            tokens: vec![token("X", "X", "ok")],
            ..FakeProvider::new("ok")
        });
        registry.register_external(broken, 5, TIMEOUT).await.unwrap();
        registry.register_external(ok, 1, TIMEOUT).await.unwrap();

        let merged = registry.search_tokens("X").await.unwrap();
        assert_eq!(merged.len(), 1);
    }

    #[tokio::test]
    async fn test_unhealthy_provider_is_never_added() {
        let registry = ProviderRegistry::new();
        let sick = Arc::new(FakeProvider {
            healthy: false,
            ..FakeProvider::new("sick")
        });

        let err = registry.register_external(sick, 1, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, Error::ProviderRegistration { .. }));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_duplicate_and_unregister() {
        let registry = ProviderRegistry::new();
        registry
            .register_external(Arc::new(FakeProvider::new("a")), 1, TIMEOUT)
            .await
            .unwrap();
        assert!(registry
            .register_external(Arc::new(FakeProvider::new("a")), 2, TIMEOUT)
            .await
            .is_err());

        assert!(registry.unregister("a").await);
        assert!(!registry.unregister("a").await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_health_check_all_reports_each_provider() {
        let registry = ProviderRegistry::new();
        registry
            .register_external(Arc::new(FakeProvider::new("a")), 1, TIMEOUT)
            .await
            .unwrap();

        let health = registry.health_check_all().await;
        assert_eq!(health.len(), 1);
        assert!(health[0].healthy);
    }
}
