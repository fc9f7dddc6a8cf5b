//! Abnormal market and system condition detection.
//!
//! Three watchdogs: ATR spiking to 3x its average, repeated broker errors
//! inside a short window, and fills slipping more than 0.2% from the
//! expected price.

use chrono::{DateTime, Utc};
use engine_core::clock::Clock;
use engine_core::events::{EngineEvent, EventBus};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{error, warn};

const MAX_TRACKED_ERRORS: usize = 10;
const ERROR_STREAK_LEN: usize = 3;
const ERROR_WINDOW_SECONDS: i64 = 300;
const MAX_TRACKED_SLIPPAGE: usize = 20;

pub struct AnomalyDetector {
    clock: Arc<dyn Clock>,
    events: EventBus,
    /// Spike threshold as a multiple of average ATR.
    atr_spike_multiplier: Decimal,
    /// Maximum tolerated slippage as a fraction of the expected price.
    max_slippage: Decimal,
    broker_errors: VecDeque<(DateTime<Utc>, String)>,
    slippage_history: VecDeque<Decimal>,
}

impl AnomalyDetector {
    pub fn new(clock: Arc<dyn Clock>, events: EventBus) -> Self {
        Self {
            clock,
            events,
            atr_spike_multiplier: Decimal::from(3),
            max_slippage: Decimal::new(2, 3),
            broker_errors: VecDeque::with_capacity(MAX_TRACKED_ERRORS),
            slippage_history: VecDeque::with_capacity(MAX_TRACKED_SLIPPAGE),
        }
    }

    /// ATR spiking past its threshold multiple of the average.
    pub fn check_volatility_spike(
        &self,
        symbol: &str,
        current_atr: Decimal,
        avg_atr: Decimal,
    ) -> bool {
        if avg_atr <= Decimal::ZERO {
            return false;
        }
        if current_atr > avg_atr * self.atr_spike_multiplier {
            warn!(
                symbol,
                current_atr = %current_atr,
                avg_atr = %avg_atr,
                "volatility spike detected"
            );
            self.events.emit(EngineEvent::AtrSpikeDetected {
                symbol: symbol.to_string(),
                atr: current_atr,
                average_atr: avg_atr,
            });
            return true;
        }
        false
    }

    /// Record a broker API failure.
    pub fn record_broker_error(&mut self, message: impl Into<String>) {
        self.broker_errors.push_back((self.clock.now(), message.into()));
        if self.broker_errors.len() > MAX_TRACKED_ERRORS {
            self.broker_errors.pop_front();
        }
    }

    /// Three or more broker errors inside five minutes.
    pub fn broker_error_streak(&self) -> bool {
        if self.broker_errors.len() < ERROR_STREAK_LEN {
            return false;
        }

        let recent: Vec<_> = self
            .broker_errors
            .iter()
            .rev()
            .take(ERROR_STREAK_LEN)
            .collect();
        let span = (recent[0].0 - recent[ERROR_STREAK_LEN - 1].0).num_seconds();

        if span < ERROR_WINDOW_SECONDS {
            error!(
                count = ERROR_STREAK_LEN,
                span_seconds = span,
                "broker error streak detected"
            );
            self.events.emit(EngineEvent::BrokerErrorStreak {
                count: ERROR_STREAK_LEN,
                window_minutes: ERROR_WINDOW_SECONDS / 60,
            });
            return true;
        }
        false
    }

    /// Record a fill and flag it if slippage exceeds the tolerance.
    pub fn check_slippage(
        &mut self,
        symbol: &str,
        expected_price: Decimal,
        fill_price: Decimal,
    ) -> bool {
        if expected_price <= Decimal::ZERO {
            return false;
        }

        let slippage = (fill_price - expected_price).abs() / expected_price;
        self.slippage_history.push_back(slippage);
        if self.slippage_history.len() > MAX_TRACKED_SLIPPAGE {
            self.slippage_history.pop_front();
        }

        if slippage > self.max_slippage {
            warn!(
                symbol,
                slippage_pct = %(slippage * Decimal::ONE_HUNDRED),
                expected = %expected_price,
                fill = %fill_price,
                "excessive slippage"
            );
            self.events.emit(EngineEvent::SlippageAnomaly {
                symbol: symbol.to_string(),
                slippage_pct: slippage * Decimal::ONE_HUNDRED,
            });
            return true;
        }
        false
    }

    /// Mean slippage over the recorded window; zero with no fills.
    pub fn avg_slippage(&self) -> Decimal {
        if self.slippage_history.is_empty() {
            return Decimal::ZERO;
        }
        let sum: Decimal = self.slippage_history.iter().sum();
        sum / Decimal::from(self.slippage_history.len() as u64)
    }
}
