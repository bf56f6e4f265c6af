//! Turns a voted direction into a priced, risk-annotated `TradingAction`.

use chrono::Utc;

use super::config::EnsembleConfig;
use crate::domain::{
    symbol_spec, ConstraintViolation, Direction, MarketContext, PolicyKind, RiskLevel,
    TradingAction, UncertaintyEstimate,
};
use crate::selector::{TrendDirection, VolatilityLevel};

/// Inputs decided by the vote (or by the authoritative policy)
#[derive(Debug, Clone)]
pub struct Verdict {
    pub direction: Direction,
    pub confidence: f64,
    pub value_estimate: f64,
    pub authoritative_policy: Option<PolicyKind>,
}

/// Absolute (stop_loss, take_profit) prices for a directional action.
///
/// Distances are ATR multiples expressed in pips, the stop clamped to the
/// symbol's range and the target clamped to the configured R:R band.
pub fn protective_levels(
    direction: Direction,
    ctx: &MarketContext,
    config: &EnsembleConfig,
) -> Option<(f64, f64)> {
    if direction == Direction::Hold || !ctx.price.is_finite() || ctx.price <= 0.0 {
        return None;
    }

    let spec = symbol_spec(&ctx.symbol);
    let atr_pips = ctx.atr.max(0.0) / spec.pip_value;

    let sl_pips = (atr_pips * config.sl_atr_multiplier).clamp(spec.min_sl_pips, spec.max_sl_pips);
    let tp_pips = (atr_pips * config.tp_atr_multiplier).clamp(
        sl_pips * config.min_risk_reward,
        sl_pips * config.max_risk_reward,
    );

    let sign = direction.sign();
    let stop_loss = ctx.price - sign * sl_pips * spec.pip_value;
    let take_profit = ctx.price + sign * tp_pips * spec.pip_value;
    (stop_loss.is_finite() && take_profit.is_finite()).then_some((stop_loss, take_profit))
}

pub fn build_action(
    verdict: &Verdict,
    uncertainty: UncertaintyEstimate,
    constraints: Vec<ConstraintViolation>,
    ctx: &MarketContext,
    config: &EnsembleConfig,
) -> TradingAction {
    let direction = verdict.direction;
    let levels = protective_levels(direction, ctx, config);
    let high_uncertainty = uncertainty.total > config.high_uncertainty;

    let intensity = if direction == Direction::Hold {
        0.0
    } else {
        let mut i = verdict.confidence * (1.0 - 0.5 * uncertainty.total.min(1.0));
        if !constraints.is_empty() {
            i *= 0.5;
        }
        i.clamp(0.0, 1.0)
    };

    let expected_reward = match levels {
        Some((sl, tp)) => {
            let risk = (ctx.price - sl).abs();
            let reward = (tp - ctx.price).abs();
            let rr = if risk > 0.0 { reward / risk } else { 0.0 };
            rr * verdict.confidence * alignment_factor(direction, ctx)
        }
        None => 0.0,
    };

    let risk_level = risk_level(direction, ctx, high_uncertainty, !constraints.is_empty());
    let reasoning = reasoning(verdict, ctx, &constraints, high_uncertainty);

    TradingAction {
        symbol: ctx.symbol.clone(),
        direction,
        intensity,
        confidence: verdict.confidence.clamp(0.0, 1.0),
        entry_price: ctx.price,
        stop_loss: levels.map(|(sl, _)| sl),
        take_profit: levels.map(|(_, tp)| tp),
        expected_reward,
        risk_level,
        value_estimate: verdict.value_estimate,
        reasoning,
        uncertainty,
        constraints,
        authoritative_policy: verdict.authoritative_policy,
        timestamp: Utc::now(),
    }
}

/// Trend and sentiment agreement with the trade direction
fn alignment_factor(direction: Direction, ctx: &MarketContext) -> f64 {
    let trend = match (ctx.regime.trend_direction, direction) {
        (TrendDirection::Up, Direction::Buy) | (TrendDirection::Down, Direction::Sell) => 1.2,
        (TrendDirection::Up, Direction::Sell) | (TrendDirection::Down, Direction::Buy) => 0.8,
        _ => 1.0,
    };
    let s = ctx.sentiment.clamp(-1.0, 1.0);
    let sentiment = if s * direction.sign() >= 0.0 {
        1.0 + 0.2 * s.abs()
    } else {
        1.0 - 0.2 * s.abs()
    };
    trend * sentiment
}

fn against_trend(direction: Direction, trend: TrendDirection) -> bool {
    matches!(
        (direction, trend),
        (Direction::Buy, TrendDirection::Down) | (Direction::Sell, TrendDirection::Up)
    )
}

fn risk_level(
    direction: Direction,
    ctx: &MarketContext,
    high_uncertainty: bool,
    constrained: bool,
) -> RiskLevel {
    let mut score = match ctx.regime.volatility {
        VolatilityLevel::Low | VolatilityLevel::Normal => 0,
        VolatilityLevel::High => 1,
        VolatilityLevel::Extreme => 2,
    };
    if against_trend(direction, ctx.regime.trend_direction) {
        score += 1;
    }
    if high_uncertainty {
        score += 1;
    }
    if constrained {
        score += 1;
    }

    match score {
        0 => RiskLevel::Low,
        1 => RiskLevel::Medium,
        2 => RiskLevel::High,
        _ => RiskLevel::Extreme,
    }
}

fn reasoning(
    verdict: &Verdict,
    ctx: &MarketContext,
    constraints: &[ConstraintViolation],
    high_uncertainty: bool,
) -> String {
    let mut parts = vec![format!(
        "{} in {} regime (trend {:?}/{:?}), confidence {:.2}",
        verdict.direction,
        ctx.regime.regime,
        ctx.regime.trend_direction,
        ctx.regime.trend_strength,
        verdict.confidence
    )];

    if ctx.regime.is_volatile() {
        parts.push(format!("{:?} volatility", ctx.regime.volatility).to_lowercase());
    }
    if high_uncertainty {
        parts.push("high model uncertainty".to_string());
    }
    for c in constraints {
        parts.push(format!("{} constraint: {}", c.severity, c.message));
    }
    if let Some(kind) = verdict.authoritative_policy {
        parts.push(format!("{kind} policy authoritative"));
    }
    parts.join("; ")
}
