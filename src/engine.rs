//! Engine orchestrator.
//!
//! Wires sizing, validation, stops, exits, the circuit breaker, anomaly
//! detection, position tracking, and the journal into one trade
//! lifecycle. The flow per signal: breaker gate, structural stop, sizing
//! (with any drawdown reduction applied), validation, open. Per bar:
//! end-of-day cutoff first, then stops, then partial take-profits,
//! break-even promotion, and trailing stops.

use anyhow::Result;
use chrono::Utc;
use engine_core::clock::Clock;
use engine_core::config::EngineConfig;
use engine_core::events::{EngineEvent, EventBus};
use engine_core::types::{Candle, EngineState, ExitReason, Position, Side, Signal};
use risk_engine::{
    AnomalyDetector, BreakerAction, BreakerStatus, CircuitBreaker, ExitManager, RiskCalculator,
    StopDecision, StopLossManager, TradeValidator,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use trade_ledger::{PositionTracker, TradeJournal};
use tracing::{info, warn};

/// Per-day session accounting.
#[derive(Debug, Clone)]
struct Session {
    starting_balance: Decimal,
    capital: Decimal,
    trades_today: u64,
}

/// The risk and execution engine.
pub struct Engine {
    clock: Arc<dyn Clock>,
    events: EventBus,
    risk: RiskCalculator,
    stops: StopLossManager,
    exits: ExitManager,
    validator: TradeValidator,
    breaker: CircuitBreaker,
    anomaly: AnomalyDetector,
    tracker: PositionTracker,
    journal: Arc<TradeJournal>,
    session: Session,
    /// Last seen close per symbol, used as the liquidation mark.
    marks: HashMap<String, Decimal>,
}

impl Engine {
    /// Build an engine and the receiver draining its event stream.
    pub fn new(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        starting_capital: Decimal,
    ) -> Result<(Self, UnboundedReceiver<EngineEvent>)> {
        let (events, rx) = EventBus::new();

        let journal = Arc::new(TradeJournal::new(&config, clock.clone(), events.clone())?);
        let tracker = PositionTracker::new(clock.clone(), events.clone(), journal.clone());

        let engine = Self {
            risk: RiskCalculator::new(&config),
            stops: StopLossManager::new(&config, events.clone()),
            exits: ExitManager::new(&config),
            validator: TradeValidator::new(&config, events.clone()),
            breaker: CircuitBreaker::new(&config, clock.clone(), events.clone()),
            anomaly: AnomalyDetector::new(clock.clone(), events.clone()),
            tracker,
            journal,
            session: Session {
                starting_balance: starting_capital,
                capital: starting_capital,
                trades_today: 0,
            },
            marks: HashMap::new(),
            clock,
            events,
        };

        info!(starting_capital = %starting_capital, "engine initialized");
        Ok((engine, rx))
    }

    /// Start a fresh trading day from the given equity.
    pub async fn reset_daily(&mut self, starting_balance: Decimal) {
        self.session = Session {
            starting_balance,
            capital: starting_balance,
            trades_today: 0,
        };
        self.breaker.reset_daily().await;
        info!(starting_balance = %starting_balance, "daily session reset");
    }

    /// Process a mark-to-market equity update. Trips the circuit breaker
    /// ladder as drawdown deepens; a Level 3 trip liquidates the book.
    pub async fn on_equity_update(&mut self, equity: Decimal) -> Result<()> {
        self.session.capital = equity;

        if let Some((_, action)) = self
            .breaker
            .check_drawdown(equity, self.session.starting_balance)
            .await
        {
            match action {
                BreakerAction::Pause => self.breaker.pause_trading().await,
                BreakerAction::Reduce => self.breaker.activate_size_reduction().await,
                BreakerAction::Liquidate => {
                    self.events.emit(EngineEvent::LiquidationOrdered);
                    self.liquidate_all().await?;
                }
            }
        }
        Ok(())
    }

    /// Attempt to open a position from a signal.
    ///
    /// Runs the full entry pipeline; returns `Ok(None)` when any gate
    /// rejects the trade (breaker, sizing, validation), with the reason
    /// logged and published as an event.
    pub async fn try_open(
        &mut self,
        signal: &Signal,
        htf_bias: Option<Side>,
    ) -> Result<Option<Position>> {
        if let Err(gate) = self.breaker.allow_new_trades().await {
            warn!(
                symbol = %signal.symbol,
                reason = gate.as_code(),
                "new trade blocked by circuit breaker"
            );
            self.events.emit(EngineEvent::TradeBlocked {
                symbol: signal.symbol.clone(),
                reason: gate.as_code().to_string(),
            });
            return Ok(None);
        }

        let stop_price = StopLossManager::structural_stop(
            signal.entry_price,
            signal.zone,
            signal.action,
            signal.atr_1m,
        );

        self.risk.update_atr_history(&signal.symbol, signal.atr_1m);
        let avg_atr = self.risk.avg_atr(&signal.symbol);
        self.anomaly
            .check_volatility_spike(&signal.symbol, signal.atr_1m, avg_atr);

        let stop_distance = (signal.entry_price - stop_price).abs();
        let base_lots = self.risk.position_size(
            self.session.capital,
            stop_distance,
            signal.atr_1m,
            avg_atr,
            signal.asset_class,
        );

        let multiplier = self.breaker.size_multiplier().await;
        let lots = if multiplier < Decimal::ONE && base_lots > 0 {
            let reduced = (Decimal::from(base_lots) * multiplier)
                .floor()
                .to_i64()
                .unwrap_or(0)
                .max(1);
            self.events.emit(EngineEvent::SizeCapped {
                symbol: signal.symbol.clone(),
                requested: base_lots,
                capped: reduced,
            });
            reduced
        } else {
            base_lots
        };

        if lots == 0 {
            warn!(symbol = %signal.symbol, "sized to zero lots, skipping");
            return Ok(None);
        }

        let failed = self.validator.validate(
            signal,
            stop_price,
            lots,
            self.session.capital,
            htf_bias,
        );
        if !failed.is_empty() {
            return Ok(None);
        }

        let position = self.tracker.open(signal, stop_price, lots)?;
        self.session.trades_today += 1;
        self.marks.insert(signal.symbol.clone(), signal.entry_price);
        Ok(Some(position))
    }

    /// Process one completed 1-minute bar for a symbol.
    ///
    /// `bars_since_entry` is the window of bars since the oldest open
    /// position's entry, most recent last; it drives the time stop and
    /// the trailing-stop structure.
    pub async fn on_bar(
        &mut self,
        symbol: &str,
        candle: &Candle,
        bars_since_entry: &[Candle],
    ) -> Result<()> {
        self.marks.insert(symbol.to_string(), candle.close);
        let now = self.clock.now();

        for position in self.tracker.open_by_symbol(symbol) {
            // Forced flat at the venue cutoff takes priority over
            // everything else.
            if self.exits.eod_reached(now) {
                self.tracker
                    .close(&position.id, candle.close, ExitReason::EodExit)
                    .await?;
                continue;
            }

            if let StopDecision::Exit(reason) =
                self.stops.evaluate(&position, candle, bars_since_entry, now)
            {
                self.tracker.close(&position.id, candle.close, reason).await?;
                continue;
            }

            self.run_take_profits(&position.id, candle.close).await?;

            let Some(current) = self.tracker.get(&position.id) else {
                continue;
            };
            if !current.is_open {
                continue;
            }

            if self.exits.should_move_to_breakeven(&current, candle.close) {
                let moved = self
                    .tracker
                    .with_mut(&current.id, |p| p.move_to_breakeven())?;
                if moved {
                    self.events.emit(EngineEvent::MovedToBreakeven {
                        position_id: current.id.clone(),
                    });
                }
            }

            let stops = &self.stops;
            self.tracker
                .with_mut(&current.id, |p| stops.update_trailing_stop(p, bars_since_entry))?;
        }

        Ok(())
    }

    /// Fire every take-profit level the price has reached, in order. A
    /// gap through multiple targets fills them all on the same bar.
    async fn run_take_profits(&mut self, position_id: &str, price: Decimal) -> Result<()> {
        loop {
            let Some(position) = self.tracker.get(position_id) else {
                return Ok(());
            };
            if !position.is_open {
                return Ok(());
            }

            let Some(level) = self.exits.check_partial_tp(&position, price) else {
                return Ok(());
            };
            let qty = self.exits.partial_exit_qty(&position, level);
            if qty == 0 {
                return Ok(());
            }
            self.tracker
                .partial_exit(position_id, qty, price, level)
                .await?;
        }
    }

    /// Record a fill and check its slippage. Returns `true` when the fill
    /// slipped past the tolerance.
    pub fn on_fill(&mut self, symbol: &str, expected_price: Decimal, fill_price: Decimal) -> bool {
        self.anomaly.check_slippage(symbol, expected_price, fill_price)
    }

    /// Record a broker API failure. A streak of failures pauses trading.
    pub async fn on_broker_error(&mut self, message: impl Into<String>) -> bool {
        self.anomaly.record_broker_error(message);
        if self.anomaly.broker_error_streak() {
            self.breaker.pause_trading().await;
            return true;
        }
        false
    }

    /// Close every open position at its last known mark.
    pub async fn liquidate_all(&mut self) -> Result<()> {
        for position in self.tracker.open_positions() {
            let mark = self
                .marks
                .get(&position.symbol)
                .copied()
                .unwrap_or(position.entry_price);
            self.tracker
                .close(&position.id, mark, ExitReason::Liquidation)
                .await?;
        }
        Ok(())
    }

    /// Persist the session snapshot for restart recovery.
    pub fn save_state(&self) {
        self.journal.save_state(EngineState {
            capital: self.session.capital,
            pnl_today: self.session.capital - self.session.starting_balance,
            trades_today: self.session.trades_today,
            open_positions: self.tracker.summary().open_positions as u64,
            last_saved: None,
        });
    }

    pub async fn breaker_status(&self) -> BreakerStatus {
        self.breaker.status().await
    }

    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    pub fn journal(&self) -> &TradeJournal {
        &self.journal
    }

    pub fn capital(&self) -> Decimal {
        self.session.capital
    }

    pub fn now(&self) -> chrono::DateTime<Utc> {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use engine_core::clock::ManualClock;
    use engine_core::types::TradeMode;
    use tempfile::TempDir;

    fn engine(dir: &TempDir) -> (Engine, Arc<ManualClock>, UnboundedReceiver<EngineEvent>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 4, 0, 0).unwrap(),
        ));
        let config = EngineConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let (engine, rx) =
            Engine::new(config, clock.clone(), Decimal::from(100_000)).unwrap();
        (engine, clock, rx)
    }

    fn signal() -> Signal {
        Signal::new("NIFTY", Side::Buy, Decimal::from(100), Decimal::TWO)
            .with_zone(Decimal::from(95), Decimal::from(105))
            .with_mode(TradeMode::Scalp)
    }

    fn bar(open: i64, high: i64, low: i64, close: i64) -> Candle {
        Candle {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 4, 1, 0).unwrap(),
            open: Decimal::from(open),
            high: Decimal::from(high),
            low: Decimal::from(low),
            close: Decimal::from(close),
            volume: Decimal::from(1000),
        }
    }

    #[tokio::test]
    async fn valid_signal_opens_a_position() {
        let dir = TempDir::new().unwrap();
        let (mut engine, _, _rx) = engine(&dir);

        let position = engine.try_open(&signal(), None).await.unwrap().unwrap();
        assert_eq!(position.symbol, "NIFTY");
        // Stop anchored at zone low 95 minus buffer 0.5.
        assert_eq!(position.stop_price, Decimal::new(945, 1));
        // Stock class caps at 100 lots.
        assert_eq!(position.original_qty, 100);
        assert_eq!(engine.tracker().open_positions().len(), 1);
    }

    #[tokio::test]
    async fn level_three_drawdown_liquidates_the_book() {
        let dir = TempDir::new().unwrap();
        let (mut engine, _, _rx) = engine(&dir);

        engine.try_open(&signal(), None).await.unwrap().unwrap();
        engine.on_equity_update(Decimal::from(88_000)).await.unwrap();

        assert!(engine.tracker().open_positions().is_empty());
        let status = engine.breaker_status().await;
        assert_eq!(
            status.current_level,
            Some(risk_engine::BreakerLevel::Level3)
        );

        // New entries stay blocked.
        let blocked = engine.try_open(&signal(), None).await.unwrap();
        assert!(blocked.is_none());
    }

    #[tokio::test]
    async fn level_two_drawdown_halves_new_sizes() {
        let dir = TempDir::new().unwrap();
        let (mut engine, _, _rx) = engine(&dir);

        engine.on_equity_update(Decimal::from(94_500)).await.unwrap();

        let position = engine.try_open(&signal(), None).await.unwrap().unwrap();
        // Cap would give 100; halved to 50.
        assert_eq!(position.original_qty, 50);
    }

    #[tokio::test]
    async fn gap_through_two_targets_fills_both() {
        let dir = TempDir::new().unwrap();
        let (mut engine, _, _rx) = engine(&dir);
        let position = engine.try_open(&signal(), None).await.unwrap().unwrap();

        // Entry 100, stop 94.5, so 1R = 105.5 and 2R = 111. A close at
        // 111 fills both partials on one bar.
        engine
            .on_bar("NIFTY", &bar(100, 112, 100, 111), &[])
            .await
            .unwrap();

        let current = engine.tracker().get(&position.id).unwrap();
        assert!(current.tp_hits.r1);
        assert!(current.tp_hits.r2);
        assert!(!current.tp_hits.r3);
        // 100 - 60 - 30
        assert_eq!(current.current_qty, 10);
        assert!(current.moved_to_be);
    }

    #[tokio::test]
    async fn eod_flattens_before_anything_else() {
        let dir = TempDir::new().unwrap();
        let (mut engine, clock, _rx) = engine(&dir);
        let position = engine.try_open(&signal(), None).await.unwrap().unwrap();

        // 09:40 UTC = 15:10 venue-local.
        clock.set(Utc.with_ymd_and_hms(2024, 3, 1, 9, 40, 0).unwrap());
        engine
            .on_bar("NIFTY", &bar(100, 112, 100, 111), &[])
            .await
            .unwrap();

        let closed = engine.tracker().get(&position.id).unwrap();
        assert!(!closed.is_open);
        assert_eq!(closed.close_reason, Some(ExitReason::EodExit));
        // No partials fired, the whole book went flat at the cutoff.
        assert!(!closed.tp_hits.r1);
    }

    #[tokio::test]
    async fn broker_error_streak_pauses_trading() {
        let dir = TempDir::new().unwrap();
        let (mut engine, _, _rx) = engine(&dir);

        assert!(!engine.on_broker_error("timeout").await);
        assert!(!engine.on_broker_error("timeout").await);
        assert!(engine.on_broker_error("timeout").await);

        let blocked = engine.try_open(&signal(), None).await.unwrap();
        assert!(blocked.is_none());
    }

    #[tokio::test]
    async fn state_snapshot_round_trips() {
        let dir = TempDir::new().unwrap();
        let (mut engine, _, _rx) = engine(&dir);
        engine.try_open(&signal(), None).await.unwrap().unwrap();
        engine.on_equity_update(Decimal::from(99_000)).await.unwrap();
        engine.save_state();

        let state = engine.journal().load_state();
        assert_eq!(state.capital, Decimal::from(99_000));
        assert_eq!(state.pnl_today, Decimal::from(-1000));
        assert_eq!(state.trades_today, 1);
        assert_eq!(state.open_positions, 1);
    }
}
