//! Persisted journal records and running performance statistics.

use crate::types::position::{ExitReason, Position};
use crate::types::signal::{OptionType, Side};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One completed trade as written to the journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Sequential id assigned by the journal.
    pub id: u64,
    pub symbol: String,
    pub side: Side,
    pub strike: Option<i64>,
    pub option_type: Option<OptionType>,
    pub qty: i64,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub pnl: Decimal,
    /// P&L as a percentage of the entry notional.
    pub pnl_pct: Decimal,
    /// Stable exit-reason code, e.g. `STRUCTURAL_STOP` or `FULL_EXIT_3R`.
    pub exit_reason: String,
    /// Venue-local trade date used for daily grouping.
    pub date: NaiveDate,
    /// Free-form market context captured at close (ATR, zone, mode).
    pub market_snapshot: serde_json::Value,
}

impl JournalEntry {
    /// Build an entry from a closed position. Returns `None` while the
    /// position is still open.
    pub fn from_closed(id: u64, position: &Position, date: NaiveDate) -> Option<Self> {
        let exit_time = position.close_time?;
        let exit_price = position.close_price?;
        let reason = position.close_reason.unwrap_or(ExitReason::Manual);

        let pnl = position.realized_pnl();
        let notional = position.entry_price * Decimal::from(position.original_qty);
        let pnl_pct = if notional.is_zero() {
            Decimal::ZERO
        } else {
            pnl / notional * Decimal::ONE_HUNDRED
        };

        Some(Self {
            id,
            symbol: position.symbol.clone(),
            side: position.side,
            strike: position.strike,
            option_type: position.option_type,
            qty: position.original_qty,
            entry_price: position.entry_price,
            exit_price,
            entry_time: position.entry_time,
            exit_time,
            pnl,
            pnl_pct,
            exit_reason: reason.as_code(),
            date,
            market_snapshot: serde_json::json!({
                "atr_1m": position.atr_1m,
                "zone": position.zone,
                "mode": position.mode,
                "partial_exits": position.partial_exits.len(),
            }),
        })
    }

    pub fn is_winner(&self) -> bool {
        self.pnl > Decimal::ZERO
    }
}

/// Aggregate performance statistics, maintained incrementally as trades
/// are recorded and recomputable from the full entry list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunningStats {
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub total_pnl: Decimal,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub best_trade: Decimal,
    pub worst_trade: Decimal,
    pub last_updated: Option<DateTime<Utc>>,
}

impl RunningStats {
    /// Fold one trade result into the aggregates.
    pub fn record(&mut self, pnl: Decimal, at: DateTime<Utc>) {
        if self.total_trades == 0 {
            self.best_trade = pnl;
            self.worst_trade = pnl;
        } else {
            self.best_trade = self.best_trade.max(pnl);
            self.worst_trade = self.worst_trade.min(pnl);
        }

        self.total_trades += 1;
        self.total_pnl += pnl;
        if pnl > Decimal::ZERO {
            self.winning_trades += 1;
            self.gross_profit += pnl;
        } else if pnl < Decimal::ZERO {
            self.losing_trades += 1;
            self.gross_loss += pnl.abs();
        }
        self.last_updated = Some(at);
    }

    /// Rebuild aggregates from scratch, used when loading a journal file.
    pub fn recompute(entries: &[JournalEntry], at: DateTime<Utc>) -> Self {
        let mut stats = Self::default();
        for entry in entries {
            stats.record(entry.pnl, at);
        }
        stats
    }

    /// Winning trades over total, as a fraction. Zero with no trades.
    pub fn win_rate(&self) -> Decimal {
        if self.total_trades == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(self.winning_trades) / Decimal::from(self.total_trades)
        }
    }

    /// Gross profit over gross loss. With zero losses this reports gross
    /// profit itself rather than dividing by zero.
    pub fn profit_factor(&self) -> Decimal {
        if self.gross_loss.is_zero() {
            self.gross_profit
        } else {
            self.gross_profit / self.gross_loss
        }
    }

    pub fn avg_pnl(&self) -> Decimal {
        if self.total_trades == 0 {
            Decimal::ZERO
        } else {
            self.total_pnl / Decimal::from(self.total_trades)
        }
    }
}

/// Snapshot of engine state persisted across restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineState {
    pub capital: Decimal,
    pub pnl_today: Decimal,
    pub trades_today: u64,
    pub open_positions: u64,
    pub last_saved: Option<DateTime<Utc>>,
}
