//! Trade Ledger Library
//!
//! Position tracking across the trade lifecycle and the persistent JSON
//! trade journal with aggregated performance reporting.

pub mod position_tracker;
pub mod trade_journal;

pub use position_tracker::{PositionTracker, TrackerSummary};
pub use trade_journal::{DailyReport, PeriodReport, TradeJournal};
