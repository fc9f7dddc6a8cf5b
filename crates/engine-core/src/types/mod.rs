//! Domain types shared across the engine.

pub mod candle;
pub mod journal;
pub mod position;
pub mod signal;

pub use candle::{average_true_range, Candle};
pub use journal::{EngineState, JournalEntry, RunningStats};
pub use position::{ExitReason, PartialExit, Position, TpHits, TpLevel};
pub use signal::{AssetClass, OptionType, Side, Signal, TradeMode, Zone};
