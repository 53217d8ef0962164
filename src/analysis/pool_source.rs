//! Pool sampling from chain state and market data

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use super::{analyze_token_distribution, PoolInfo, PoolTarget};
use crate::error::{Error, Result};
use crate::ledger::{LedgerClient, ParsedAccount};
use crate::provider::ProviderRegistry;

/// Produces one [`PoolInfo`] sample per call
#[async_trait]
pub trait PoolDataSource: Send + Sync {
    async fn sample(&self, target: &PoolTarget) -> Result<PoolInfo>;

    /// Fill in what discovery could not know (LP mint, vaults) from the
    /// pool's own state.
    async fn resolve(&self, target: PoolTarget) -> Result<PoolTarget> {
        Ok(target)
    }
}

/// Reads vault balances, holders and LP state over RPC and prices them
/// through the provider registry.
pub struct OnChainPoolSource {
    ledger: Arc<dyn LedgerClient>,
    registry: Arc<ProviderRegistry>,
    lock_holders: HashSet<String>,
    max_holders: usize,
}

impl OnChainPoolSource {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        registry: Arc<ProviderRegistry>,
        lock_holders: &[String],
        max_holders: usize,
    ) -> Self {
        Self {
            ledger,
            registry,
            lock_holders: lock_holders.iter().cloned().collect(),
            max_holders,
        }
    }

    async fn decimals(&self, mint: &str) -> Result<u8> {
        self.ledger
            .get_parsed_account_info(mint)
            .await?
            .and_then(|account| account.into_mint())
            .map(|m| m.decimals)
            .ok_or_else(|| Error::PoolAnalysis {
                pool: mint.to_string(),
                reason: "not a mint account".into(),
            })
    }

    async fn vault_amount(&self, vault: &str) -> Result<u64> {
        self.ledger
            .get_parsed_account_info(vault)
            .await?
            .and_then(|account| account.token_amount())
            .ok_or_else(|| Error::PoolAnalysis {
                pool: vault.to_string(),
                reason: "vault is not a token account".into(),
            })
    }

    async fn usd_value(&self, target: &PoolTarget, token_amount: f64, base_amount: f64) -> Result<f64> {
        let (token_price, base_price) = futures::join!(
            self.registry.get_price(&target.token_mint),
            self.registry.get_price(&target.base_mint)
        );
        let base_price = base_price?;
        let base_usd = base_amount * base_price.value;

        match token_price {
            Ok(price) => Ok(token_amount * price.value + base_usd),
            Err(e) => {
                // Constant-product pools hold equal value on both sides
                debug!(mint = %target.token_mint, "No token price, valuing from base side: {}", e);
                Ok(base_usd * 2.0)
            }
        }
    }

    /// Locked LP as (supply, locked) in raw units
    async fn lp_state(&self, lp_mint: &str) -> Result<(u64, u64)> {
        let supply = self.ledger.get_token_supply(lp_mint).await?;
        if supply == 0 {
            return Ok((0, 0));
        }
        let holders = self.ledger.get_token_holders(lp_mint, self.max_holders).await?;
        let locked = holders
            .iter()
            .filter(|h| self.lock_holders.contains(&h.owner))
            .map(|h| h.amount)
            .sum();
        Ok((supply, locked))
    }
}

fn ui_amount(raw: u64, decimals: u8) -> f64 {
    raw as f64 / 10f64.powi(decimals as i32)
}

#[async_trait]
impl PoolDataSource for OnChainPoolSource {
    async fn sample(&self, target: &PoolTarget) -> Result<PoolInfo> {
        let mut info = PoolInfo::empty(target);

        let (token_decimals, base_decimals) =
            futures::try_join!(self.decimals(&target.token_mint), self.decimals(&target.base_mint))?;
        let (token_raw, base_raw) = match (&target.token_vault, &target.base_vault) {
            (Some(token_vault), Some(base_vault)) => futures::try_join!(
                self.vault_amount(token_vault),
                self.vault_amount(base_vault)
            )?,
            _ => futures::try_join!(
                self.ledger.get_token_balance(&target.pool, &target.token_mint),
                self.ledger.get_token_balance(&target.pool, &target.base_mint),
            )?,
        };
        let supply = self.ledger.get_token_supply(&target.token_mint).await?;

        info.liquidity.token_amount = ui_amount(token_raw, token_decimals);
        info.liquidity.base_amount = ui_amount(base_raw, base_decimals);
        info.liquidity.usd_value = self
            .usd_value(target, info.liquidity.token_amount, info.liquidity.base_amount)
            .await?;

        let holders = self
            .ledger
            .get_token_holders(&target.token_mint, self.max_holders + 1)
            .await?;
        let balances: Vec<u64> = holders
            .iter()
            .filter(|h| h.owner != target.pool)
            .filter(|h| target.token_vault.as_deref() != Some(h.token_account.as_str()))
            .map(|h| h.amount)
            .collect();
        info.liquidity.distribution = analyze_token_distribution(&balances, self.max_holders);

        match &target.lp_mint {
            Some(lp_mint) => {
                let (lp_supply, locked) = self.lp_state(lp_mint).await?;
                info.lp.total_supply = lp_supply as f64;
                info.lp.locked_amount = locked as f64;
            }
            None => warn!(pool = %target.pool, "No LP mint known, treating LP as unlocked"),
        }

        if let Some(creator) = &target.creator {
            let balance = self.ledger.get_token_balance(creator, &target.token_mint).await?;
            info.creator.balance = ui_amount(balance, token_decimals);
            if supply > 0 {
                info.creator.percentage = balance as f64 / supply as f64 * 100.0;
            }
        }

        info.sampled_at = Utc::now();
        info.sanitize();
        Ok(info)
    }

    async fn resolve(&self, mut target: PoolTarget) -> Result<PoolTarget> {
        if target.lp_mint.is_some() && target.token_vault.is_some() {
            return Ok(target);
        }

        let account = self.ledger.get_parsed_account_info(&target.pool).await?;
        let Some(amm) = account.and_then(ParsedAccount::into_amm_pool) else {
            debug!(pool = %target.pool, "Pool layout not recognized, reading owner balances");
            return Ok(target);
        };
        let Some((token_vault, base_vault)) = amm.vaults_for(&target.token_mint) else {
            warn!(pool = %target.pool, mint = %target.token_mint, "Pool does not trade this mint");
            return Ok(target);
        };

        if let Some(counter) = amm.counter_mint(&target.token_mint) {
            target.base_mint = counter.to_string();
        }
        target.token_vault = Some(token_vault);
        target.base_vault = Some(base_vault);
        if target.lp_mint.is_none() {
            target.lp_mint = Some(amm.lp_mint);
        }
        debug!(pool = %target.pool, lp_mint = ?target.lp_mint, "Pool resolved");
        Ok(target)
    }
}
