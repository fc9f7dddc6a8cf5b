//! Position lifecycle: the single record mutated over a trade's life.
//!
//! Quantity conservation (`sum(partial_exits.qty) + current_qty ==
//! original_qty`), trailing-stop monotonicity, one-shot TP levels, and the
//! close-once rule are all enforced here so no caller can violate them.

use crate::types::signal::{OptionType, Side, TradeMode, Zone};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// R-multiple take-profit levels, in firing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TpLevel {
    R1,
    R2,
    R3,
}

impl TpLevel {
    pub const ALL: [TpLevel; 3] = [TpLevel::R1, TpLevel::R2, TpLevel::R3];

    /// R-multiple distance from entry.
    pub fn multiple(&self) -> Decimal {
        match self {
            TpLevel::R1 => Decimal::ONE,
            TpLevel::R2 => Decimal::TWO,
            TpLevel::R3 => Decimal::from(3),
        }
    }

    /// Fraction of the original quantity to exit at this level.
    pub fn exit_fraction(&self) -> Decimal {
        match self {
            TpLevel::R1 => Decimal::new(60, 2),
            TpLevel::R2 => Decimal::new(30, 2),
            TpLevel::R3 => Decimal::new(10, 2),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TpLevel::R1 => "1R",
            TpLevel::R2 => "2R",
            TpLevel::R3 => "3R",
        }
    }
}

/// Which TP levels have already been realized. Each fires at most once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpHits {
    pub r1: bool,
    pub r2: bool,
    pub r3: bool,
}

impl TpHits {
    pub fn is_hit(&self, level: TpLevel) -> bool {
        match level {
            TpLevel::R1 => self.r1,
            TpLevel::R2 => self.r2,
            TpLevel::R3 => self.r3,
        }
    }

    fn mark(&mut self, level: TpLevel) {
        match level {
            TpLevel::R1 => self.r1 = true,
            TpLevel::R2 => self.r2 = true,
            TpLevel::R3 => self.r3 = true,
        }
    }
}

/// Machine-readable reason a position (or part of it) was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StructuralStop,
    TimeStop,
    VolatilityStop,
    EodExit,
    FullExit(TpLevel),
    Liquidation,
    Manual,
}

impl ExitReason {
    /// Stable code for logs, events, and the journal.
    pub fn as_code(&self) -> String {
        match self {
            ExitReason::StructuralStop => "STRUCTURAL_STOP".to_string(),
            ExitReason::TimeStop => "TIME_STOP".to_string(),
            ExitReason::VolatilityStop => "VOLATILITY_STOP".to_string(),
            ExitReason::EodExit => "EOD_EXIT".to_string(),
            ExitReason::FullExit(level) => format!("FULL_EXIT_{}", level.label()),
            ExitReason::Liquidation => "LIQUIDATION".to_string(),
            ExitReason::Manual => "MANUAL".to_string(),
        }
    }
}

/// One slice of quantity leaving the position.
///
/// TP partials carry their level; the terminal exit of the remaining
/// quantity at close is recorded with `level: None` so that quantity
/// conservation holds through the full lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialExit {
    pub time: DateTime<Utc>,
    pub qty: i64,
    pub price: Decimal,
    pub level: Option<TpLevel>,
    pub pnl: Decimal,
}

/// One open or closed trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Deterministic id: `symbol_counter_timestamp`.
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    /// Initial structural stop; never changes after creation.
    pub stop_price: Decimal,
    pub original_qty: i64,
    pub entry_time: DateTime<Utc>,
    pub zone: Option<Zone>,
    pub atr_1m: Decimal,
    pub mode: TradeMode,
    pub strike: Option<i64>,
    pub option_type: Option<OptionType>,

    /// Active stop; only ever moves in the profit direction.
    pub trailing_stop: Decimal,
    /// Remaining quantity; non-increasing, zero once fully exited.
    pub current_qty: i64,
    pub tp_hits: TpHits,
    /// One-way flag: break-even promotion is irreversible.
    pub moved_to_be: bool,
    /// Append-only log of exits.
    pub partial_exits: Vec<PartialExit>,

    pub is_open: bool,
    pub close_time: Option<DateTime<Utc>>,
    pub close_price: Option<Decimal>,
    pub close_reason: Option<ExitReason>,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        symbol: String,
        side: Side,
        entry_price: Decimal,
        stop_price: Decimal,
        original_qty: i64,
        entry_time: DateTime<Utc>,
        zone: Option<Zone>,
        atr_1m: Decimal,
        mode: TradeMode,
    ) -> Self {
        Self {
            id,
            symbol,
            side,
            entry_price,
            stop_price,
            original_qty,
            entry_time,
            zone,
            atr_1m,
            mode,
            strike: None,
            option_type: None,
            trailing_stop: stop_price,
            current_qty: original_qty,
            tp_hits: TpHits::default(),
            moved_to_be: false,
            partial_exits: Vec::new(),
            is_open: true,
            close_time: None,
            close_price: None,
            close_reason: None,
        }
    }

    /// One R: the per-unit risk between entry and the initial stop.
    pub fn r_unit(&self) -> Decimal {
        (self.entry_price - self.stop_price).abs()
    }

    /// Signed P&L per the trade direction for `qty` units exited at `price`.
    pub fn exit_pnl(&self, qty: i64, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.side.sign() * Decimal::from(qty)
    }

    /// Unrealized P&L on the remaining quantity at `price`.
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        self.exit_pnl(self.current_qty, price)
    }

    /// Realized P&L accumulated over all recorded exits.
    pub fn realized_pnl(&self) -> Decimal {
        self.partial_exits.iter().map(|pe| pe.pnl).sum()
    }

    /// Total quantity that has left the position so far.
    pub fn exited_qty(&self) -> i64 {
        self.partial_exits.iter().map(|pe| pe.qty).sum()
    }

    /// Apply a partial take-profit exit at `level`.
    ///
    /// Rejects closed positions, already-hit levels, and quantities that
    /// would break conservation.
    pub fn apply_partial_exit(
        &mut self,
        qty: i64,
        price: Decimal,
        level: TpLevel,
        time: DateTime<Utc>,
    ) -> Result<()> {
        if !self.is_open {
            return Err(Error::Position(format!(
                "{}: cannot partially exit a closed position",
                self.id
            )));
        }
        if self.tp_hits.is_hit(level) {
            return Err(Error::Position(format!(
                "{}: TP {} already realized",
                self.id,
                level.label()
            )));
        }
        if qty <= 0 || qty > self.current_qty {
            return Err(Error::Position(format!(
                "{}: invalid partial exit qty {} (current {})",
                self.id, qty, self.current_qty
            )));
        }

        let pnl = self.exit_pnl(qty, price);
        self.partial_exits.push(PartialExit {
            time,
            qty,
            price,
            level: Some(level),
            pnl,
        });
        self.current_qty -= qty;
        self.tp_hits.mark(level);
        Ok(())
    }

    /// Tighten the trailing stop toward price. Returns `true` if the stop
    /// moved; candidates in the loosening direction are ignored.
    pub fn tighten_trailing_stop(&mut self, candidate: Decimal) -> bool {
        if !self.is_open {
            return false;
        }
        let improved = match self.side {
            Side::Buy => candidate > self.trailing_stop,
            Side::Sell => candidate < self.trailing_stop,
        };
        if improved {
            self.trailing_stop = candidate;
        }
        improved
    }

    /// Promote the stop to break-even (entry price). One-way.
    pub fn move_to_breakeven(&mut self) -> bool {
        if self.moved_to_be || !self.is_open {
            return false;
        }
        self.moved_to_be = true;
        self.tighten_trailing_stop(self.entry_price);
        true
    }

    /// Close the position. Terminal and irreversible; the remaining
    /// quantity is recorded as a final exit slice so conservation holds.
    pub fn close(&mut self, price: Decimal, reason: ExitReason, time: DateTime<Utc>) -> Result<()> {
        if !self.is_open {
            return Err(Error::Position(format!(
                "{}: position already closed",
                self.id
            )));
        }

        if self.current_qty > 0 {
            let pnl = self.exit_pnl(self.current_qty, price);
            self.partial_exits.push(PartialExit {
                time,
                qty: self.current_qty,
                price,
                level: None,
                pnl,
            });
            self.current_qty = 0;
        }

        self.is_open = false;
        self.close_time = Some(time);
        self.close_price = Some(price);
        self.close_reason = Some(reason);
        Ok(())
    }
}
