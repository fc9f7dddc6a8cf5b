//! Engine Core Library
//!
//! Shared domain types, error taxonomy, configuration, the injectable
//! clock, and the typed event bus used by every zone-trader component.

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use events::{EngineEvent, EventBus};
