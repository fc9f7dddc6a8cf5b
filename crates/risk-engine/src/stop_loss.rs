//! Three-level stop-loss system.
//!
//! 1. Structural stop: zone boundary plus an ATR buffer, evaluated on
//!    candle close only (a wick through the level does not exit).
//! 2. Time stop: exit after 45 minutes without fresh momentum, protecting
//!    option premium from theta decay.
//! 3. Volatility stop: strong reversal candle against the trade. Runs in
//!    detect-only mode by default; the reference deployment found forcing
//!    the exit hurt results.

use chrono::{DateTime, Utc};
use engine_core::config::EngineConfig;
use engine_core::events::{EngineEvent, EventBus};
use engine_core::types::{Candle, ExitReason, Position, Side, Zone};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::risk_calculator::RiskCalculator;

/// Outcome of evaluating all stop conditions for one bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    Hold,
    Exit(ExitReason),
}

impl StopDecision {
    pub fn is_exit(&self) -> bool {
        matches!(self, StopDecision::Exit(_))
    }
}

pub struct StopLossManager {
    time_stop_minutes: i64,
    volatility_body_ratio: Decimal,
    volatility_blocks_exit: bool,
    events: EventBus,
}

impl StopLossManager {
    pub fn new(config: &EngineConfig, events: EventBus) -> Self {
        Self {
            time_stop_minutes: config.time_stop_minutes,
            volatility_body_ratio: config.volatility_body_ratio,
            volatility_blocks_exit: config.volatility_stop_blocks_exit,
            events,
        }
    }

    /// Structural stop level for an entry.
    ///
    /// Longs stop below the demand zone, shorts above the supply zone,
    /// each padded by `max(0.15% of entry, 0.25 * ATR)`. Without a zone
    /// the entry price itself anchors the stop.
    pub fn structural_stop(
        entry_price: Decimal,
        zone: Option<Zone>,
        side: Side,
        atr_1m: Decimal,
    ) -> Decimal {
        let buffer = RiskCalculator::stop_buffer(entry_price, atr_1m);
        match side {
            Side::Buy => {
                let anchor = zone.map(|z| z.low).unwrap_or(entry_price);
                anchor - buffer
            }
            Side::Sell => {
                let anchor = zone.map(|z| z.high).unwrap_or(entry_price);
                anchor + buffer
            }
        }
    }

    /// True if the bar CLOSED beyond the stop. Intrabar wicks through the
    /// level do not count.
    pub fn structural_stop_hit(candle: &Candle, stop_price: Decimal, side: Side) -> bool {
        match side {
            Side::Buy => candle.close < stop_price,
            Side::Sell => candle.close > stop_price,
        }
    }

    /// Time stop: trade older than the limit with no new higher high
    /// (long) or lower low (short) since entry.
    pub fn time_stop_hit(
        &self,
        entry_time: DateTime<Utc>,
        now: DateTime<Utc>,
        bars_since_entry: &[Candle],
        side: Side,
    ) -> bool {
        let elapsed = (now - entry_time).num_minutes();
        if elapsed <= self.time_stop_minutes {
            return false;
        }
        if bars_since_entry.len() < 2 {
            return false;
        }

        let first = &bars_since_entry[0];
        let momentum_renewed = match side {
            Side::Buy => bars_since_entry
                .iter()
                .any(|bar| bar.high > first.high),
            Side::Sell => bars_since_entry.iter().any(|bar| bar.low < first.low),
        };

        if momentum_renewed {
            return false;
        }

        warn!(
            elapsed_minutes = elapsed,
            limit_minutes = self.time_stop_minutes,
            "time stop hit, no new momentum since entry"
        );
        true
    }

    /// A strong candle (body at least 70% of range) against the trade.
    pub fn volatility_reversal(&self, candle: &Candle, side: Side) -> bool {
        if candle.body_ratio() < self.volatility_body_ratio {
            return false;
        }
        match side {
            Side::Buy => candle.is_bearish(),
            Side::Sell => candle.is_bullish(),
        }
    }

    /// Run all three stop checks for one completed bar, in priority order.
    pub fn evaluate(
        &self,
        position: &Position,
        candle: &Candle,
        bars_since_entry: &[Candle],
        now: DateTime<Utc>,
    ) -> StopDecision {
        if Self::structural_stop_hit(candle, position.trailing_stop, position.side) {
            warn!(
                position_id = %position.id,
                close = %candle.close,
                stop = %position.trailing_stop,
                "structural stop hit"
            );
            self.events.emit(EngineEvent::StopTriggered {
                position_id: position.id.clone(),
                reason: ExitReason::StructuralStop,
                price: candle.close,
            });
            return StopDecision::Exit(ExitReason::StructuralStop);
        }

        if self.time_stop_hit(position.entry_time, now, bars_since_entry, position.side) {
            self.events.emit(EngineEvent::StopTriggered {
                position_id: position.id.clone(),
                reason: ExitReason::TimeStop,
                price: candle.close,
            });
            return StopDecision::Exit(ExitReason::TimeStop);
        }

        if self.volatility_reversal(candle, position.side) {
            warn!(
                position_id = %position.id,
                body_ratio = %candle.body_ratio(),
                blocking = self.volatility_blocks_exit,
                "volatility reversal candle detected"
            );
            self.events.emit(EngineEvent::VolatilityStopDetected {
                position_id: position.id.clone(),
                body_ratio: candle.body_ratio(),
                blocking: self.volatility_blocks_exit,
            });
            if self.volatility_blocks_exit {
                self.events.emit(EngineEvent::StopTriggered {
                    position_id: position.id.clone(),
                    reason: ExitReason::VolatilityStop,
                    price: candle.close,
                });
                return StopDecision::Exit(ExitReason::VolatilityStop);
            }
        }

        StopDecision::Hold
    }

    /// Trail the stop behind recent structure: longs under the highest of
    /// the last five lows, shorts over the lowest of the last five highs.
    /// Returns `true` if the stop moved.
    pub fn update_trailing_stop(&self, position: &mut Position, bars_1m: &[Candle]) -> bool {
        if bars_1m.len() < 3 {
            return false;
        }

        let lookback = bars_1m.len().min(5);
        let recent = &bars_1m[bars_1m.len() - lookback..];

        let candidate = match position.side {
            Side::Buy => recent.iter().map(|bar| bar.low).max(),
            Side::Sell => recent.iter().map(|bar| bar.high).min(),
        };

        let Some(candidate) = candidate else {
            return false;
        };

        if position.tighten_trailing_stop(candidate) {
            info!(
                position_id = %position.id,
                stop = %position.trailing_stop,
                "trailing stop updated"
            );
            self.events.emit(EngineEvent::TrailingStopMoved {
                position_id: position.id.clone(),
                stop: position.trailing_stop,
            });
            true
        } else {
            false
        }
    }
}
