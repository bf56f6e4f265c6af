//! Per-policy rolling performance book
//!
//! Trade outcomes are attributed to the policy and regime that produced the
//! trade. Metrics are recomputed on read from a bounded ring buffer:
//! Sharpe ratio, win rate, drawdown-based stability, and a per-regime split.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::regime::MarketRegime;
use crate::domain::PolicyKind;

/// One closed trade attributed to a policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub policy: PolicyKind,
    pub regime: MarketRegime,
    /// Realized return of the trade (profit / notional, or R multiple)
    pub return_value: f64,
    pub closed_at: DateTime<Utc>,
}

/// Performance restricted to one regime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegimePerformance {
    pub trades: usize,
    pub average_return: f64,
    pub win_rate: f64,
    pub sharpe_ratio: f64,
    pub stability_score: f64,
}

/// Rolling metrics for one policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPerformanceMetrics {
    pub policy: PolicyKind,
    pub sharpe_ratio: f64,
    /// 0.0-1.0, higher = steadier equity curve
    pub stability_score: f64,
    pub average_return: f64,
    pub win_rate: f64,
    pub trades: usize,
    pub regime_performance: HashMap<MarketRegime, RegimePerformance>,
}

impl AgentPerformanceMetrics {
    /// Neutral metrics for a policy with no history
    pub fn empty(policy: PolicyKind) -> Self {
        Self {
            policy,
            sharpe_ratio: 0.0,
            stability_score: 0.5,
            average_return: 0.0,
            win_rate: 0.5,
            trades: 0,
            regime_performance: HashMap::new(),
        }
    }

    pub fn in_regime(&self, regime: MarketRegime) -> Option<&RegimePerformance> {
        self.regime_performance.get(&regime)
    }
}

/// Concurrent outcome store shared by the correlator (writer) and the
/// decision pipeline (reader).
pub struct PerformanceBook {
    window: usize,
    outcomes: DashMap<PolicyKind, VecDeque<TradeOutcome>>,
}

impl PerformanceBook {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            outcomes: DashMap::new(),
        }
    }

    pub fn record(&self, outcome: TradeOutcome) {
        let mut buffer = self.outcomes.entry(outcome.policy).or_default();
        buffer.push_back(outcome);
        while buffer.len() > self.window {
            buffer.pop_front();
        }
    }

    pub fn metrics(&self, policy: PolicyKind) -> AgentPerformanceMetrics {
        let Some(buffer) = self.outcomes.get(&policy) else {
            return AgentPerformanceMetrics::empty(policy);
        };

        let returns: Vec<f64> = buffer.iter().map(|o| o.return_value).collect();
        let overall = compute(&returns);

        let mut by_regime: HashMap<MarketRegime, Vec<f64>> = HashMap::new();
        for o in buffer.iter() {
            by_regime.entry(o.regime).or_default().push(o.return_value);
        }

        AgentPerformanceMetrics {
            policy,
            sharpe_ratio: overall.sharpe_ratio,
            stability_score: overall.stability_score,
            average_return: overall.average_return,
            win_rate: overall.win_rate,
            trades: overall.trades,
            regime_performance: by_regime
                .into_iter()
                .map(|(regime, r)| (regime, compute(&r)))
                .collect(),
        }
    }

    /// Per-policy stability for `regime`, falling back to the overall score.
    pub fn stability_scores(&self, regime: MarketRegime) -> HashMap<PolicyKind, f64> {
        [PolicyKind::Baseline, PolicyKind::Constrained]
            .into_iter()
            .map(|kind| {
                let m = self.metrics(kind);
                let score = m
                    .in_regime(regime)
                    .map(|r| r.stability_score)
                    .unwrap_or(m.stability_score);
                (kind, score)
            })
            .collect()
    }

    pub fn total_trades(&self) -> usize {
        self.outcomes.iter().map(|e| e.value().len()).sum()
    }
}

fn compute(returns: &[f64]) -> RegimePerformance {
    if returns.is_empty() {
        return RegimePerformance {
            stability_score: 0.5,
            win_rate: 0.5,
            ..Default::default()
        };
    }

    let n = returns.len() as f64;
    let wins = returns.iter().filter(|r| **r > 0.0).count();
    let win_rate = wins as f64 / n;
    let mean = returns.iter().sum::<f64>() / n;

    if returns.len() < 2 {
        return RegimePerformance {
            trades: returns.len(),
            average_return: mean,
            win_rate,
            sharpe_ratio: 0.0,
            stability_score: 0.5,
        };
    }

    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    let sharpe = if std_dev > 1e-12 { mean / std_dev * n.sqrt() } else { 0.0 };

    // drawdown on the cumulative return curve
    let mut equity = 0.0f64;
    let mut peak = 0.0f64;
    let mut max_dd = 0.0f64;
    for r in returns {
        equity += r;
        peak = peak.max(equity);
        max_dd = max_dd.max(peak - equity);
    }
    let drawdown_ratio = if peak > 1e-12 {
        (max_dd / peak).clamp(0.0, 1.0)
    } else if max_dd > 0.0 {
        1.0
    } else {
        0.0
    };

    RegimePerformance {
        trades: returns.len(),
        average_return: mean,
        win_rate,
        sharpe_ratio: sharpe,
        stability_score: (0.5 * (1.0 - drawdown_ratio) + 0.5 * win_rate).clamp(0.0, 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(policy: PolicyKind, regime: MarketRegime, r: f64) -> TradeOutcome {
        TradeOutcome {
            policy,
            regime,
            return_value: r,
            closed_at: Utc::now(),
        }
    }

    #[test]
    fn empty_book_is_neutral() {
        let book = PerformanceBook::new(100);
        let m = book.metrics(PolicyKind::Baseline);
        assert_eq!(m.trades, 0);
        assert_eq!(m.stability_score, 0.5);
        assert_eq!(book.stability_scores(MarketRegime::Ranging)[&PolicyKind::Constrained], 0.5);
    }

    #[test]
    fn window_is_bounded() {
        let book = PerformanceBook::new(3);
        for i in 0..5 {
            book.record(outcome(PolicyKind::Baseline, MarketRegime::Trending, i as f64));
        }
        assert_eq!(book.metrics(PolicyKind::Baseline).trades, 3);
        assert_eq!(book.total_trades(), 3);
    }

    #[test]
    fn steady_winner_outscores_choppy_policy() {
        let book = PerformanceBook::new(100);
        for r in [1.0, 1.2, 0.9, 1.1] {
            book.record(outcome(PolicyKind::Baseline, MarketRegime::Trending, r));
        }
        for r in [2.0, -3.0, 1.5, -2.0] {
            book.record(outcome(PolicyKind::Constrained, MarketRegime::Trending, r));
        }

        let steady = book.metrics(PolicyKind::Baseline);
        let choppy = book.metrics(PolicyKind::Constrained);
        assert_eq!(steady.win_rate, 1.0);
        assert!(steady.sharpe_ratio > choppy.sharpe_ratio);
        assert!(steady.stability_score > choppy.stability_score);
    }

    #[test]
    fn regime_split() {
        let book = PerformanceBook::new(100);
        book.record(outcome(PolicyKind::Constrained, MarketRegime::HighVol, 1.0));
        book.record(outcome(PolicyKind::Constrained, MarketRegime::HighVol, 0.5));
        book.record(outcome(PolicyKind::Constrained, MarketRegime::Ranging, -1.0));

        let m = book.metrics(PolicyKind::Constrained);
        assert_eq!(m.in_regime(MarketRegime::HighVol).map(|r| r.trades), Some(2));
        assert_eq!(m.in_regime(MarketRegime::Ranging).map(|r| r.win_rate), Some(0.0));
        assert!(m.in_regime(MarketRegime::LowVol).is_none());
    }
}
