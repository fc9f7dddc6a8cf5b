//! Typed engine events.
//!
//! Components publish events over an unbounded channel instead of calling
//! into each other; the orchestrator (or tests) drain the receiver. A bus
//! with no receiver drops events silently so components never block on
//! observers.

use crate::types::{ExitReason, TpLevel};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Everything noteworthy the engine does, as a typed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    CircuitBreakerTripped {
        level: String,
        action: String,
        drawdown_pct: Decimal,
    },
    TradingPaused {
        until: DateTime<Utc>,
    },
    SizeReductionActivated {
        multiplier: Decimal,
    },
    LiquidationOrdered,
    TradeRejected {
        symbol: String,
        failed_checks: Vec<String>,
    },
    TradeBlocked {
        symbol: String,
        reason: String,
    },
    SizeCapped {
        symbol: String,
        requested: i64,
        capped: i64,
    },
    PositionOpened {
        position_id: String,
        symbol: String,
        qty: i64,
        entry_price: Decimal,
        stop_price: Decimal,
    },
    StopTriggered {
        position_id: String,
        reason: ExitReason,
        price: Decimal,
    },
    VolatilityStopDetected {
        position_id: String,
        body_ratio: Decimal,
        blocking: bool,
    },
    PartialExitFilled {
        position_id: String,
        level: TpLevel,
        qty: i64,
        price: Decimal,
    },
    MovedToBreakeven {
        position_id: String,
    },
    TrailingStopMoved {
        position_id: String,
        stop: Decimal,
    },
    PositionClosed {
        position_id: String,
        reason: ExitReason,
        pnl: Decimal,
    },
    AtrSpikeDetected {
        symbol: String,
        atr: Decimal,
        average_atr: Decimal,
    },
    BrokerErrorStreak {
        count: usize,
        window_minutes: i64,
    },
    SlippageAnomaly {
        symbol: String,
        slippage_pct: Decimal,
    },
    JournalWriteFailed {
        path: String,
        message: String,
    },
}

/// Send side of the event channel, cheap to clone into every component.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: Option<mpsc::UnboundedSender<EngineEvent>>,
}

impl EventBus {
    /// Create a connected bus and the receiver to drain it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A bus that discards everything, for components run standalone.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Publish an event. A closed or absent receiver is not an error.
    pub fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
