//! Open-position bookkeeping with partial-exit tracking.
//!
//! The tracker is the only component that closes positions, and closing a
//! position is the only path into the trade journal. Partial exits that
//! drain the remaining quantity close the position automatically with a
//! `FULL_EXIT_<level>` reason.

use dashmap::DashMap;
use engine_core::clock::Clock;
use engine_core::events::{EngineEvent, EventBus};
use engine_core::types::{ExitReason, JournalEntry, Position, Signal, TpLevel};
use engine_core::{Error, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::trade_journal::TradeJournal;

/// Portfolio-level snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerSummary {
    pub total_positions: usize,
    pub open_positions: usize,
    pub closed_positions: usize,
    pub open_symbols: Vec<String>,
    pub total_qty_deployed: i64,
}

pub struct PositionTracker {
    positions: DashMap<String, Position>,
    counter: AtomicU64,
    clock: Arc<dyn Clock>,
    events: EventBus,
    journal: Arc<TradeJournal>,
}

impl PositionTracker {
    pub fn new(clock: Arc<dyn Clock>, events: EventBus, journal: Arc<TradeJournal>) -> Self {
        Self {
            positions: DashMap::new(),
            counter: AtomicU64::new(0),
            clock,
            events,
            journal,
        }
    }

    /// Open a position from a validated signal. The signal must carry a
    /// trade mode; the validator guarantees this upstream.
    pub fn open(&self, signal: &Signal, stop_price: Decimal, qty: i64) -> Result<Position> {
        let mode = signal.mode.ok_or_else(|| {
            Error::InvalidInput(format!("signal for {} has no trade mode", signal.symbol))
        })?;
        if qty <= 0 {
            return Err(Error::InvalidInput(format!(
                "cannot open {} with qty {qty}",
                signal.symbol
            )));
        }

        let now = self.clock.now();
        let seq = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{}_{}_{}", signal.symbol, seq, now.format("%Y%m%d%H%M%S"));

        let mut position = Position::new(
            id.clone(),
            signal.symbol.clone(),
            signal.action,
            signal.entry_price,
            stop_price,
            qty,
            now,
            signal.zone,
            signal.atr_1m,
            mode,
        );
        position.strike = signal.strike;
        position.option_type = signal.option_type;

        info!(
            position_id = %id,
            symbol = %signal.symbol,
            side = ?signal.action,
            qty,
            entry = %signal.entry_price,
            stop = %stop_price,
            "position opened"
        );
        self.events.emit(EngineEvent::PositionOpened {
            position_id: id.clone(),
            symbol: signal.symbol.clone(),
            qty,
            entry_price: signal.entry_price,
            stop_price,
        });

        self.positions.insert(id, position.clone());
        Ok(position)
    }

    pub fn get(&self, position_id: &str) -> Option<Position> {
        self.positions.get(position_id).map(|p| p.clone())
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.positions
            .iter()
            .filter(|p| p.is_open)
            .map(|p| p.clone())
            .collect()
    }

    pub fn open_by_symbol(&self, symbol: &str) -> Vec<Position> {
        self.positions
            .iter()
            .filter(|p| p.is_open && p.symbol == symbol)
            .map(|p| p.clone())
            .collect()
    }

    /// Run a mutation against a live position under the map lock.
    pub fn with_mut<R>(
        &self,
        position_id: &str,
        f: impl FnOnce(&mut Position) -> R,
    ) -> Result<R> {
        let mut position = self
            .positions
            .get_mut(position_id)
            .ok_or_else(|| Error::Position(format!("{position_id}: not found")))?;
        Ok(f(&mut position))
    }

    /// Record a partial take-profit exit. Draining the last unit closes
    /// the position with `FULL_EXIT_<level>` and journals it.
    pub async fn partial_exit(
        &self,
        position_id: &str,
        qty: i64,
        price: Decimal,
        level: TpLevel,
    ) -> Result<()> {
        let now = self.clock.now();
        let remaining = self.with_mut(position_id, |position| {
            position
                .apply_partial_exit(qty, price, level, now)
                .map(|()| position.current_qty)
        })??;

        info!(
            position_id,
            level = level.label(),
            exited = qty,
            remaining,
            "partial exit recorded"
        );
        self.events.emit(EngineEvent::PartialExitFilled {
            position_id: position_id.to_string(),
            level,
            qty,
            price,
        });

        if remaining == 0 {
            self.close(position_id, price, ExitReason::FullExit(level))
                .await?;
        }
        Ok(())
    }

    /// Close a position completely and journal the completed trade. This
    /// is the single entry point into the journal.
    pub async fn close(
        &self,
        position_id: &str,
        price: Decimal,
        reason: ExitReason,
    ) -> Result<Option<JournalEntry>> {
        let now = self.clock.now();
        let closed = self.with_mut(position_id, |position| {
            position.close(price, reason, now).map(|()| position.clone())
        })??;

        let pnl = closed.realized_pnl();
        info!(
            position_id,
            reason = %reason.as_code(),
            pnl = %pnl,
            "position closed"
        );
        self.events.emit(EngineEvent::PositionClosed {
            position_id: position_id.to_string(),
            reason,
            pnl,
        });

        Ok(self.journal.record_closed(&closed).await)
    }

    /// Close every open position at the given mark, liquidation-style.
    pub async fn close_all(&self, price: Decimal, reason: ExitReason) -> Result<Decimal> {
        let open_ids: Vec<String> = self
            .positions
            .iter()
            .filter(|p| p.is_open)
            .map(|p| p.id.clone())
            .collect();

        let mut total_pnl = Decimal::ZERO;
        for id in open_ids {
            if let Some(entry) = self.close(&id, price, reason).await? {
                total_pnl += entry.pnl;
            }
        }
        Ok(total_pnl)
    }

    pub fn summary(&self) -> TrackerSummary {
        let mut open = 0usize;
        let mut closed = 0usize;
        let mut symbols = BTreeSet::new();
        let mut deployed = 0i64;

        for position in self.positions.iter() {
            if position.is_open {
                open += 1;
                symbols.insert(position.symbol.clone());
                deployed += position.current_qty;
            } else {
                closed += 1;
            }
        }

        TrackerSummary {
            total_positions: open + closed,
            open_positions: open,
            closed_positions: closed,
            open_symbols: symbols.into_iter().collect(),
            total_qty_deployed: deployed,
        }
    }

    /// Export the full position map as JSON, open and closed alike.
    pub fn export(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .positions
            .iter()
            .filter_map(|p| {
                serde_json::to_value(p.value())
                    .ok()
                    .map(|v| (p.key().clone(), v))
            })
            .collect();
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use engine_core::clock::ManualClock;
    use engine_core::config::EngineConfig;
    use engine_core::types::{Side, TradeMode};
    use tempfile::TempDir;

    fn tracker(dir: &TempDir) -> (PositionTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
        ));
        let config = EngineConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let journal =
            Arc::new(TradeJournal::new(&config, clock.clone(), EventBus::disabled()).unwrap());
        (
            PositionTracker::new(clock.clone(), EventBus::disabled(), journal),
            clock,
        )
    }

    fn signal() -> Signal {
        Signal::new("NIFTY", Side::Buy, Decimal::from(100), Decimal::ONE)
            .with_zone(Decimal::from(95), Decimal::from(105))
            .with_mode(TradeMode::Scalp)
    }

    #[tokio::test]
    async fn open_assigns_deterministic_ids() {
        let dir = TempDir::new().unwrap();
        let (tracker, _) = tracker(&dir);

        let first = tracker.open(&signal(), Decimal::from(98), 10).unwrap();
        let second = tracker.open(&signal(), Decimal::from(98), 10).unwrap();
        assert_eq!(first.id, "NIFTY_1_20240301093000");
        assert_eq!(second.id, "NIFTY_2_20240301093000");
        assert_eq!(tracker.open_positions().len(), 2);
    }

    #[tokio::test]
    async fn unclassified_signal_cannot_open() {
        let dir = TempDir::new().unwrap();
        let (tracker, _) = tracker(&dir);
        let unclassified = Signal::new("NIFTY", Side::Buy, Decimal::from(100), Decimal::ONE);
        assert!(tracker.open(&unclassified, Decimal::from(98), 10).is_err());
    }

    #[tokio::test]
    async fn draining_partials_closes_and_journals() {
        let dir = TempDir::new().unwrap();
        let (tracker, _) = tracker(&dir);
        let pos = tracker.open(&signal(), Decimal::from(98), 10).unwrap();

        tracker
            .partial_exit(&pos.id, 6, Decimal::from(102), TpLevel::R1)
            .await
            .unwrap();
        tracker
            .partial_exit(&pos.id, 3, Decimal::from(104), TpLevel::R2)
            .await
            .unwrap();
        assert_eq!(tracker.open_positions().len(), 1);

        tracker
            .partial_exit(&pos.id, 1, Decimal::from(106), TpLevel::R3)
            .await
            .unwrap();

        let closed = tracker.get(&pos.id).unwrap();
        assert!(!closed.is_open);
        assert_eq!(
            closed.close_reason,
            Some(ExitReason::FullExit(TpLevel::R3))
        );
        // 6*2 + 3*4 + 1*6
        assert_eq!(closed.realized_pnl(), Decimal::from(30));

        // Exactly one journal entry, written at close.
        assert_eq!(tracker.journal.entry_count().await, 1);
    }

    #[tokio::test]
    async fn stop_close_journals_once() {
        let dir = TempDir::new().unwrap();
        let (tracker, _) = tracker(&dir);
        let pos = tracker.open(&signal(), Decimal::from(98), 10).unwrap();

        let entry = tracker
            .close(&pos.id, Decimal::from(97), ExitReason::StructuralStop)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.exit_reason, "STRUCTURAL_STOP");
        assert_eq!(entry.pnl, Decimal::from(-30));

        // Closing again is an error and must not double-journal.
        assert!(tracker
            .close(&pos.id, Decimal::from(97), ExitReason::Manual)
            .await
            .is_err());
        assert_eq!(tracker.journal.entry_count().await, 1);
    }

    #[tokio::test]
    async fn close_all_liquidates_every_open_position() {
        let dir = TempDir::new().unwrap();
        let (tracker, _) = tracker(&dir);
        tracker.open(&signal(), Decimal::from(98), 10).unwrap();
        tracker.open(&signal(), Decimal::from(98), 5).unwrap();

        let pnl = tracker
            .close_all(Decimal::from(99), ExitReason::Liquidation)
            .await
            .unwrap();
        assert_eq!(pnl, Decimal::from(-15));
        assert!(tracker.open_positions().is_empty());

        let summary = tracker.summary();
        assert_eq!(summary.closed_positions, 2);
        assert_eq!(summary.total_qty_deployed, 0);
    }

    #[tokio::test]
    async fn summary_reflects_open_book() {
        let dir = TempDir::new().unwrap();
        let (tracker, _) = tracker(&dir);
        tracker.open(&signal(), Decimal::from(98), 10).unwrap();

        let other = Signal::new("BANKNIFTY", Side::Sell, Decimal::from(200), Decimal::ONE)
            .with_mode(TradeMode::Trend);
        tracker.open(&other, Decimal::from(204), 5).unwrap();

        let summary = tracker.summary();
        assert_eq!(summary.open_positions, 2);
        assert_eq!(summary.open_symbols, vec!["BANKNIFTY", "NIFTY"]);
        assert_eq!(summary.total_qty_deployed, 15);
    }
}
