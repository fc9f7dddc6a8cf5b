//! Pre-trade validation gate.
//!
//! Every trade passes six checks before execution: zone valid, higher
//! timeframe bias aligned, stop defined, risk within limits, trade mode
//! classified, and exit plan derivable.

use engine_core::config::EngineConfig;
use engine_core::events::{EngineEvent, EventBus};
use engine_core::types::{Side, Signal};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

/// A failed pre-trade check, with its stable rejection code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckFailure {
    ZoneInvalid,
    HtfBiasNotAligned,
    StopNotDefined,
    RiskExceedsLimit,
    TradeModeUnknown,
    ExitPlanMissing,
}

impl CheckFailure {
    pub fn as_code(&self) -> &'static str {
        match self {
            CheckFailure::ZoneInvalid => "ZONE_INVALID",
            CheckFailure::HtfBiasNotAligned => "HTF_BIAS_NOT_ALIGNED",
            CheckFailure::StopNotDefined => "STOP_NOT_DEFINED",
            CheckFailure::RiskExceedsLimit => "RISK_EXCEEDS_LIMIT",
            CheckFailure::TradeModeUnknown => "TRADE_MODE_UNKNOWN",
            CheckFailure::ExitPlanMissing => "EXIT_PLAN_MISSING",
        }
    }
}

pub struct TradeValidator {
    risk_pct: Decimal,
    max_risk_pct: Decimal,
    events: EventBus,
}

impl TradeValidator {
    pub fn new(config: &EngineConfig, events: EventBus) -> Self {
        Self {
            risk_pct: config.risk_pct,
            max_risk_pct: config.max_risk_pct,
            events,
        }
    }

    /// Run the full checklist. Returns every failed check, empty when the
    /// trade may proceed. `htf_bias` is the higher-timeframe direction
    /// when the strategy layer supplies one; absent means no opinion.
    pub fn validate(
        &self,
        signal: &Signal,
        stop_price: Decimal,
        lots: i64,
        capital: Decimal,
        htf_bias: Option<Side>,
    ) -> Vec<CheckFailure> {
        let mut failed = Vec::new();

        if !self.check_zone_valid(signal) {
            failed.push(CheckFailure::ZoneInvalid);
        }
        if !self.check_htf_bias(signal, htf_bias) {
            failed.push(CheckFailure::HtfBiasNotAligned);
        }
        if !self.check_stop_defined(signal, stop_price) {
            failed.push(CheckFailure::StopNotDefined);
        }
        if !self.check_risk_limit(signal, stop_price, lots, capital) {
            failed.push(CheckFailure::RiskExceedsLimit);
        }
        if signal.mode.is_none() {
            failed.push(CheckFailure::TradeModeUnknown);
        }
        if !self.check_exit_plan(signal, stop_price) {
            failed.push(CheckFailure::ExitPlanMissing);
        }

        if failed.is_empty() {
            info!(symbol = %signal.symbol, "trade validation passed");
        } else {
            let codes: Vec<&str> = failed.iter().map(|f| f.as_code()).collect();
            warn!(
                symbol = %signal.symbol,
                failed_checks = ?codes,
                "trade validation failed"
            );
            self.events.emit(EngineEvent::TradeRejected {
                symbol: signal.symbol.clone(),
                failed_checks: codes.iter().map(|c| c.to_string()).collect(),
            });
        }

        failed
    }

    /// Entry must sit inside the zone when one is attached. Signals
    /// without a zone pass.
    fn check_zone_valid(&self, signal: &Signal) -> bool {
        match signal.zone {
            Some(zone) => zone.contains(signal.entry_price),
            None => true,
        }
    }

    /// Higher-timeframe bias, when provided, must match the trade side.
    fn check_htf_bias(&self, signal: &Signal, htf_bias: Option<Side>) -> bool {
        match htf_bias {
            Some(bias) => bias == signal.action,
            None => true,
        }
    }

    /// Stop must be positive, meaningfully away from entry, and on the
    /// protective side of it.
    fn check_stop_defined(&self, signal: &Signal, stop_price: Decimal) -> bool {
        if stop_price <= Decimal::ZERO {
            return false;
        }
        if (stop_price - signal.entry_price).abs() < Decimal::new(1, 2) {
            return false;
        }
        match signal.action {
            Side::Buy => stop_price < signal.entry_price,
            Side::Sell => stop_price > signal.entry_price,
        }
    }

    /// Actual risk (lots * stop distance) over capital must stay within
    /// the configured fraction (10% tolerance) and under the hard cap.
    fn check_risk_limit(
        &self,
        signal: &Signal,
        stop_price: Decimal,
        lots: i64,
        capital: Decimal,
    ) -> bool {
        if capital <= Decimal::ZERO {
            return false;
        }

        let stop_distance = (signal.entry_price - stop_price).abs();
        let actual_risk = Decimal::from(lots) * stop_distance;
        let risk_fraction = actual_risk / capital;

        if risk_fraction > self.risk_pct * Decimal::new(11, 1) {
            warn!(
                risk_fraction = %risk_fraction,
                target = %self.risk_pct,
                "risk exceeds configured target"
            );
            return false;
        }

        if risk_fraction > self.max_risk_pct {
            warn!(
                risk_fraction = %risk_fraction,
                hard_cap = %self.max_risk_pct,
                "risk exceeds hard cap"
            );
            return false;
        }

        true
    }

    /// The TP ladder is derivable from entry and stop alone.
    fn check_exit_plan(&self, signal: &Signal, stop_price: Decimal) -> bool {
        signal.entry_price > Decimal::ZERO && stop_price > Decimal::ZERO
    }
}
