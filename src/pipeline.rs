//! One decision tick end to end: inference and selection on the blocking
//! pool, then sizing and dispatch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{AppConfig, SizingConfig};
use crate::dispatch::{CommandHandle, DecisionTag, Dispatcher};
use crate::domain::{CommandAction, FeatureVector, MarketContext, TradeCommand, TradingAction};
use crate::ensemble::{EnsembleEngine, EnsemblePrediction};
use crate::error::{Result, TradegateError};
use crate::selector::{AgentDecision, AgentSelector, RegimeClassifier, RegimeConfig, RegimeInputs, RegimeSnapshot};
use crate::services::Metrics;

/// One line of tick input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTick {
    pub account_id: String,
    pub symbol: String,
    pub price: f64,
    pub atr: f64,
    pub features: Vec<f64>,
    #[serde(default)]
    pub sentiment: f64,
    /// External regime, when the caller has one
    #[serde(default)]
    pub regime: Option<RegimeSnapshot>,
    /// Raw readings for the built-in classifier otherwise
    #[serde(default)]
    pub regime_inputs: Option<RegimeInputs>,
}

impl DecisionTick {
    /// Price must be finite and positive, ATR finite and non-negative.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if !self.price.is_finite() || self.price <= 0.0 {
            errors.push(format!("price {} must be finite and positive", self.price));
        }
        if !self.atr.is_finite() || self.atr < 0.0 {
            errors.push(format!("atr {} must be finite and non-negative", self.atr));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(TradegateError::Validation(errors.join("; ")))
        }
    }
}

/// Inference result before any dispatch
#[derive(Debug, Clone)]
pub struct Decision {
    pub prediction: EnsemblePrediction,
    pub selection: AgentDecision,
    pub action: TradingAction,
    pub regime: RegimeSnapshot,
}

pub enum TickOutcome {
    Hold(Decision),
    Dispatched {
        decision: Decision,
        handle: CommandHandle,
    },
}

pub struct DecisionPipeline {
    engine: Arc<EnsembleEngine>,
    selector: Arc<AgentSelector>,
    dispatcher: Dispatcher,
    metrics: Arc<Metrics>,
    sizing: SizingConfig,
    regime_config: RegimeConfig,
    classifiers: Mutex<HashMap<String, RegimeClassifier>>,
    magic_numbers: HashMap<String, u32>,
    command_timeout_ms: u64,
}

impl DecisionPipeline {
    pub fn new(
        config: &AppConfig,
        engine: Arc<EnsembleEngine>,
        selector: Arc<AgentSelector>,
        dispatcher: Dispatcher,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            engine,
            selector,
            dispatcher,
            metrics,
            sizing: config.sizing.clone(),
            regime_config: config.regime.clone(),
            classifiers: Mutex::new(HashMap::new()),
            magic_numbers: config
                .accounts
                .iter()
                .map(|a| (a.account_id.clone(), a.magic_number))
                .collect(),
            command_timeout_ms: config.connector.command_timeout_ms,
        }
    }

    /// Regime for this tick: the supplied snapshot, else the per-symbol
    /// classifier, else neutral.
    fn resolve_regime(&self, tick: &DecisionTick) -> RegimeSnapshot {
        if let Some(regime) = &tick.regime {
            return regime.clone();
        }
        let Some(inputs) = tick.regime_inputs else {
            return RegimeSnapshot::default();
        };
        match self.classifiers.lock() {
            Ok(mut classifiers) => {
                let classifier = classifiers
                    .entry(tick.symbol.clone())
                    .or_insert_with(|| RegimeClassifier::new(self.regime_config.clone()));
                let (snapshot, changed) = classifier.observe(inputs);
                if changed {
                    info!(symbol = %tick.symbol, regime = %snapshot.regime, "regime changed");
                }
                snapshot
            }
            Err(_) => crate::selector::classify(&self.regime_config, inputs),
        }
    }

    /// Inference and selection for one tick on the blocking pool.
    pub async fn decide(&self, tick: &DecisionTick) -> Result<Decision> {
        tick.validate()?;
        let features = FeatureVector::new(tick.features.clone())?;
        let regime = self.resolve_regime(tick);
        let ctx = MarketContext {
            symbol: tick.symbol.clone(),
            price: tick.price,
            atr: tick.atr,
            stability_scores: self.selector.performance_book().stability_scores(regime.regime),
            regime: regime.clone(),
            sentiment: tick.sentiment,
        };

        let engine = Arc::clone(&self.engine);
        let selector = Arc::clone(&self.selector);
        let outcome = tokio::task::spawn_blocking(move || -> Result<Decision> {
            let prediction = engine.predict(&features, &ctx)?;
            let selection = selector.select(&ctx.regime, prediction.constraint_need());
            let action = engine.finalize(&prediction, &selection, &ctx);
            Ok(Decision {
                prediction,
                selection,
                action,
                regime: ctx.regime,
            })
        })
        .await
        .map_err(|e| TradegateError::Internal(format!("inference task failed: {e}")))?;

        match &outcome {
            Ok(decision) => {
                Metrics::inc(&self.metrics.decisions);
                debug!(
                    symbol = %tick.symbol,
                    direction = %decision.action.direction,
                    confidence = decision.action.confidence,
                    agent = %decision.selection.agent,
                    "decision ready"
                );
            }
            Err(TradegateError::NoPredictionAvailable(reason)) => {
                Metrics::inc(&self.metrics.no_prediction);
                warn!(symbol = %tick.symbol, reason = %reason, "tick skipped, no prediction");
            }
            Err(_) => {}
        }
        outcome
    }

    /// Decide, size, and dispatch. HOLD never reaches the dispatcher.
    pub async fn process(&self, tick: &DecisionTick) -> Result<TickOutcome> {
        let decision = self.decide(tick).await?;
        let Some(command_action) = CommandAction::from_direction(decision.action.direction) else {
            return Ok(TickOutcome::Hold(decision));
        };

        let command = self.build_command(tick, &decision.action, command_action)?;
        let tag = DecisionTag {
            policy: decision
                .action
                .authoritative_policy
                .unwrap_or(decision.selection.agent),
            regime: decision.regime.regime,
        };
        let handle = self
            .dispatcher
            .send_tagged(command, &decision.action.constraints, Some(tag));

        Ok(TickOutcome::Dispatched { decision, handle })
    }

    /// Directional commands never leave without both protective levels.
    fn build_command(&self, tick: &DecisionTick, action: &TradingAction, side: CommandAction) -> Result<TradeCommand> {
        let stop_loss = action.stop_loss.and_then(Decimal::from_f64);
        let take_profit = action.take_profit.and_then(Decimal::from_f64);
        if stop_loss.is_none() || take_profit.is_none() {
            warn!(symbol = %tick.symbol, direction = %action.direction, "no protective levels, not dispatching");
            return Err(TradegateError::Validation(format!(
                "{} {} has no stop-loss or take-profit",
                action.direction, tick.symbol
            )));
        }

        let lot = self.sizing.lot_for(action.intensity);
        Ok(
            TradeCommand::market(&tick.account_id, &tick.symbol, side, lot, self.command_timeout_ms)
                .with_protection(stop_loss, take_profit)
                .with_magic_number(self.magic_numbers.get(&tick.account_id).copied().unwrap_or(0)),
        )
    }
}
