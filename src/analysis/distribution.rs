//! Holder concentration metrics

use super::DistributionMetrics;

/// Gini coefficient and top-10 share over the largest `max_holders` balances.
///
/// Gini is the all-pairs mean absolute difference normalized by
/// `2 * n * sum`, so the cost is quadratic in the holder cap. Zero holders
/// (or an all-zero supply) yields all-zero metrics.
pub fn analyze_token_distribution(balances: &[u64], max_holders: usize) -> DistributionMetrics {
    let mut holders: Vec<f64> = balances
        .iter()
        .filter(|b| **b > 0)
        .map(|b| *b as f64)
        .collect();
    holders.sort_by(|a, b| b.total_cmp(a));
    holders.truncate(max_holders);

    let n = holders.len();
    let total: f64 = holders.iter().sum();
    if n == 0 || total <= 0.0 {
        return DistributionMetrics::default();
    }

    let mut abs_diff = 0.0;
    for x in &holders {
        for y in &holders {
            abs_diff += (x - y).abs();
        }
    }
    let gini = (abs_diff / (2.0 * n as f64 * total)).clamp(0.0, 1.0);

    let top10: f64 = holders.iter().take(10).sum();

    DistributionMetrics {
        gini,
        top10_percentage: (top10 / total * 100.0).clamp(0.0, 100.0),
        holder_count: n,
    }
}
