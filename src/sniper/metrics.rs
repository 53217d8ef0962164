//! Trade records and performance metrics

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entered position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub mint: String,
    pub creator: String,
    pub pool: Option<String>,
    pub position_size: f64,
    pub tx_hash: Option<String>,
    pub entered_at: DateTime<Utc>,
    /// Fractional return once closed (0.25 = +25%)
    pub return_pct: Option<f64>,
    pub rugged: bool,
    pub closed_at: Option<DateTime<Utc>>,
}

impl TradeRecord {
    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

/// Bounded trade log. When full, the oldest closed trade is evicted first so
/// open positions stay closable; only a log of nothing but open trades drops
/// its oldest entry.
#[derive(Debug)]
pub struct TradeHistory {
    records: VecDeque<TradeRecord>,
    capacity: usize,
}

impl TradeHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn push(&mut self, record: TradeRecord) {
        if self.records.len() >= self.capacity {
            match self.records.iter().position(|t| t.is_closed()) {
                Some(index) => {
                    self.records.remove(index);
                }
                None => {
                    self.records.pop_front();
                }
            }
        }
        self.records.push_back(record);
    }

    /// Latest open trade for `mint`
    pub fn latest_open_mut(&mut self, mint: &str) -> Option<&mut TradeRecord> {
        self.records
            .iter_mut()
            .rev()
            .find(|t| t.mint == mint && !t.is_closed())
    }

    pub fn iter(&self) -> impl Iterator<Item = &TradeRecord> {
        self.records.iter()
    }

    pub fn to_vec(&self) -> Vec<TradeRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        PerformanceMetrics::from_trades(self.records.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_trades: usize,
    pub closed_trades: usize,
    /// 0-1
    pub win_rate: f64,
    pub average_return: f64,
    /// Average win over absolute average loss
    pub risk_reward_ratio: f64,
    /// Largest peak-to-trough fall of the compounded equity curve, 0-1
    pub max_drawdown: f64,
}

impl PerformanceMetrics {
    pub fn from_trades<'a, I>(trades: I) -> Self
    where
        I: IntoIterator<Item = &'a TradeRecord>,
    {
        let trades: Vec<&TradeRecord> = trades.into_iter().collect();
        let mut closed: Vec<&TradeRecord> =
            trades.iter().copied().filter(|t| t.is_closed()).collect();
        closed.sort_by_key(|t| t.closed_at);
        let returns: Vec<f64> = closed.iter().filter_map(|t| t.return_pct).collect();

        let mut metrics = Self {
            total_trades: trades.len(),
            closed_trades: returns.len(),
            ..Default::default()
        };
        if returns.is_empty() {
            return metrics;
        }

        let n = returns.len() as f64;
        let wins: Vec<f64> = returns.iter().copied().filter(|r| *r > 0.0).collect();
        let losses: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();

        metrics.win_rate = wins.len() as f64 / n;
        metrics.average_return = returns.iter().sum::<f64>() / n;

        let avg_win = if wins.is_empty() {
            0.0
        } else {
            wins.iter().sum::<f64>() / wins.len() as f64
        };
        let avg_loss = if losses.is_empty() {
            0.0
        } else {
            (losses.iter().sum::<f64>() / losses.len() as f64).abs()
        };
        metrics.risk_reward_ratio = if avg_loss > 0.0 {
            avg_win / avg_loss
        } else {
            avg_win
        };

        let mut equity = 1.0_f64;
        let mut peak = 1.0_f64;
        for r in &returns {
            equity *= (1.0 + r).max(0.0);
            peak = peak.max(equity);
            if peak > 0.0 {
                metrics.max_drawdown = metrics.max_drawdown.max((peak - equity) / peak);
            }
        }

        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn trade(offset_secs: i64, return_pct: Option<f64>) -> TradeRecord {
        let entered = Utc::now();
        TradeRecord {
            mint: "mint".into(),
            creator: "creator".into(),
            pool: None,
            position_size: 1.0,
            tx_hash: None,
            entered_at: entered,
            return_pct,
            rugged: false,
            closed_at: return_pct.map(|_| entered + Duration::seconds(offset_secs)),
        }
    }

    #[test]
    fn test_empty_history() {
        let metrics = PerformanceMetrics::from_trades(&Vec::<TradeRecord>::new());
        assert_eq!(metrics, PerformanceMetrics::default());
    }

    #[test]
    fn test_open_trades_do_not_count() {
        let metrics = PerformanceMetrics::from_trades(&[trade(0, None), trade(1, Some(0.5))]);
        assert_eq!(metrics.total_trades, 2);
        assert_eq!(metrics.closed_trades, 1);
        assert_eq!(metrics.win_rate, 1.0);
    }

    #[test]
    fn test_mixed_returns() {
        let trades = vec![
            trade(1, Some(0.5)),
            trade(2, Some(-0.5)),
            trade(3, Some(0.2)),
            trade(4, Some(-0.1)),
        ];
        let metrics = PerformanceMetrics::from_trades(&trades);
        assert_eq!(metrics.win_rate, 0.5);
        assert!((metrics.average_return - 0.025).abs() < 1e-9);
        // avg win 0.35, avg loss 0.30
        assert!((metrics.risk_reward_ratio - 0.35 / 0.30).abs() < 1e-9);
        // 1.5 -> 0.75 is the deepest fall from peak
        assert!((metrics.max_drawdown - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_history_evicts_closed_trades_first() {
        let mut history = TradeHistory::new(3);
        history.push(trade(0, None));
        history.push(trade(1, Some(0.1)));
        history.push(trade(2, None));
        history.push(trade(3, Some(0.2)));

        assert_eq!(history.len(), 3);
        let closed: Vec<_> = history.iter().filter_map(|t| t.return_pct).collect();
        assert_eq!(closed, vec![0.2]);
        assert_eq!(history.iter().filter(|t| !t.is_closed()).count(), 2);
        assert_eq!(history.metrics().closed_trades, 1);
    }

    #[test]
    fn test_history_of_open_trades_drops_oldest() {
        let mut history = TradeHistory::new(2);
        for _ in 0..5 {
            history.push(trade(0, None));
        }
        assert_eq!(history.len(), 2);
        assert!(history.latest_open_mut("mint").is_some());
    }

    #[test]
    fn test_rug_is_full_drawdown() {
        let metrics = PerformanceMetrics::from_trades(&[trade(1, Some(-1.0))]);
        assert_eq!(metrics.max_drawdown, 1.0);
        assert_eq!(metrics.win_rate, 0.0);
    }
}
