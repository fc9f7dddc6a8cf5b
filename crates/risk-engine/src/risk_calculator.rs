//! Risk-based position sizing with ATR-aware volatility scaling.
//!
//! Sizing allocates an aggressive fraction of equity per trade (85.75% by
//! default), scaled down 25% when current volatility runs above its 20-day
//! average and capped per asset class for liquidity protection.

use dashmap::DashMap;
use engine_core::config::EngineConfig;
use engine_core::types::{average_true_range, AssetClass, Candle};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

/// Per-trade risk metrics for logging and validation.
#[derive(Debug, Clone, Serialize)]
pub struct RiskSummary {
    pub capital: Decimal,
    pub risk_pct: Decimal,
    pub max_loss_allowed: Decimal,
    pub actual_risk: Decimal,
    pub lots: i64,
    pub stop_distance: Decimal,
}

/// Position sizing and stop-buffer arithmetic.
pub struct RiskCalculator {
    risk_pct: Decimal,
    max_lots_stock: i64,
    max_lots_crypto: i64,
    max_lots_option: i64,
    atr_period: usize,
    atr_history_len: usize,
    /// Rolling ATR samples per symbol, for the 20-day comparison.
    atr_history: DashMap<String, Vec<Decimal>>,
}

impl RiskCalculator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            risk_pct: config.risk_pct,
            max_lots_stock: config.max_lots.stock,
            max_lots_crypto: config.max_lots.crypto,
            max_lots_option: config.max_lots.option,
            atr_period: config.atr_period,
            atr_history_len: config.atr_history_len,
            atr_history: DashMap::new(),
        }
    }

    /// ATR over the configured lookback; zero with insufficient bars.
    pub fn atr(&self, bars: &[Candle]) -> Decimal {
        let atr = average_true_range(bars, self.atr_period);
        if atr.is_zero() {
            warn!(
                bars = bars.len(),
                period = self.atr_period,
                "not enough bars for ATR"
            );
        }
        atr
    }

    /// Append an ATR sample for `symbol`, keeping the rolling window.
    pub fn update_atr_history(&self, symbol: &str, atr: Decimal) {
        let mut history = self.atr_history.entry(symbol.to_string()).or_default();
        history.push(atr);
        if history.len() > self.atr_history_len {
            history.remove(0);
        }
    }

    /// Mean of the recorded ATR samples for `symbol`; zero if none.
    pub fn avg_atr(&self, symbol: &str) -> Decimal {
        match self.atr_history.get(symbol) {
            Some(history) if !history.is_empty() => {
                let sum: Decimal = history.iter().sum();
                sum / Decimal::from(history.len() as u64)
            }
            _ => Decimal::ZERO,
        }
    }

    /// Number of lots to trade for the given equity and stop distance.
    ///
    /// `max_loss = capital * risk_pct`, divided by the per-lot stop
    /// distance. Elevated volatility (current ATR above its average)
    /// scales the result by 0.75. The result is floored, capped per asset
    /// class, and bumped to a minimum of one lot whenever risk capital is
    /// positive. A non-positive stop distance sizes to zero.
    pub fn position_size(
        &self,
        capital: Decimal,
        stop_distance: Decimal,
        current_atr: Decimal,
        avg_atr: Decimal,
        asset_class: AssetClass,
    ) -> i64 {
        if stop_distance <= Decimal::ZERO {
            warn!(%stop_distance, "invalid stop distance, sizing to zero");
            return 0;
        }

        let max_loss = capital * self.risk_pct;
        let mut lots = max_loss / stop_distance;

        if avg_atr > Decimal::ZERO && current_atr > avg_atr {
            lots *= Decimal::new(75, 2);
            info!(
                current_atr = %current_atr,
                avg_atr = %avg_atr,
                "volatility elevated, reducing size by 25%"
            );
        }

        let mut lots = lots.floor().to_i64().unwrap_or(0);

        let max_allowed = self.max_lots_for(asset_class);
        if lots > max_allowed {
            warn!(
                lots,
                max_allowed,
                asset_class = ?asset_class,
                "position size exceeds lot cap, capping"
            );
            lots = max_allowed;
        }

        if lots < 1 && max_loss > Decimal::ZERO {
            lots = 1;
        }

        lots
    }

    pub fn max_lots_for(&self, asset_class: AssetClass) -> i64 {
        match asset_class {
            AssetClass::Stock => self.max_lots_stock,
            AssetClass::Crypto => self.max_lots_crypto,
            AssetClass::Option => self.max_lots_option,
        }
    }

    /// True if `lots` respects the per-class liquidity cap.
    pub fn validate_max_lots(&self, lots: i64, asset_class: AssetClass) -> bool {
        lots <= self.max_lots_for(asset_class)
    }

    /// Stop-loss buffer: `max(0.15% of entry, 0.25 * ATR)`.
    pub fn stop_buffer(entry_price: Decimal, atr_1m: Decimal) -> Decimal {
        let pct_buffer = entry_price * Decimal::new(15, 4);
        let atr_buffer = Decimal::new(25, 2) * atr_1m;
        pct_buffer.max(atr_buffer)
    }

    pub fn risk_summary(
        &self,
        capital: Decimal,
        lots: i64,
        entry_price: Decimal,
        stop_price: Decimal,
    ) -> RiskSummary {
        let stop_distance = (entry_price - stop_price).abs();
        RiskSummary {
            capital,
            risk_pct: self.risk_pct * Decimal::ONE_HUNDRED,
            max_loss_allowed: capital * self.risk_pct,
            actual_risk: Decimal::from(lots) * stop_distance,
            lots,
            stop_distance,
        }
    }
}
