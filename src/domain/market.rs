use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::action::PolicyKind;
use crate::selector::RegimeSnapshot;

/// Market inputs that accompany a feature vector into a decision tick.
///
/// The feature vector itself is opaque; everything the action builder needs
/// in price space travels here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketContext {
    pub symbol: String,
    /// Latest close / mid price
    pub price: f64,
    /// Average true range in price units
    pub atr: f64,
    pub regime: RegimeSnapshot,
    /// Aggregate sentiment in [-1, 1]; 0 when unknown
    #[serde(default)]
    pub sentiment: f64,
    /// Historical stability score per policy for the current regime (ensemble tie-break)
    #[serde(default)]
    pub stability_scores: HashMap<PolicyKind, f64>,
}

impl MarketContext {
    pub fn stability_of(&self, kind: PolicyKind) -> f64 {
        self.stability_scores.get(&kind).copied().unwrap_or(0.5)
    }

    /// ATR as a fraction of price
    pub fn atr_ratio(&self) -> f64 {
        if self.price > 0.0 {
            self.atr / self.price
        } else {
            0.0
        }
    }
}

/// Per-symbol pip geometry used to clamp protective distances
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymbolSpec {
    pub pip_value: f64,
    pub min_sl_pips: f64,
    pub max_sl_pips: f64,
}

const EUR_USD: SymbolSpec = SymbolSpec {
    pip_value: 0.0001,
    min_sl_pips: 10.0,
    max_sl_pips: 50.0,
};

/// Lookup accepts both `EUR_USD` and `EURUSD` spellings; unknown symbols use EUR_USD geometry.
pub fn symbol_spec(symbol: &str) -> SymbolSpec {
    let normalized: String = symbol
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_uppercase();

    match normalized.as_str() {
        "EURUSD" | "AUDUSD" | "USDCAD" | "NZDUSD" => EUR_USD,
        "GBPUSD" => SymbolSpec {
            pip_value: 0.0001,
            min_sl_pips: 12.0,
            max_sl_pips: 60.0,
        },
        "USDJPY" => SymbolSpec {
            pip_value: 0.01,
            min_sl_pips: 10.0,
            max_sl_pips: 50.0,
        },
        "XAUUSD" => SymbolSpec {
            pip_value: 0.1,
            min_sl_pips: 50.0,
            max_sl_pips: 200.0,
        },
        _ => EUR_USD,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_lookup_normalizes_separators() {
        assert_eq!(symbol_spec("XAU_USD"), symbol_spec("xauusd"));
        assert_eq!(symbol_spec("USD/JPY").pip_value, 0.01);
    }

    #[test]
    fn unknown_symbol_falls_back() {
        assert_eq!(symbol_spec("DOGE_BTC"), EUR_USD);
    }
}
