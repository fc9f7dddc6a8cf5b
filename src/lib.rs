//! Zone-Trader: Intraday Risk and Execution Engine
//!
//! The root crate hosts the [`Engine`] orchestrator that wires the
//! workspace components together. For direct access use the individual
//! crates:
//!
//! - `engine-core`: Shared types, errors, config, clock, event bus
//! - `risk-engine`: Sizing, stops, exits, validation, circuit breaker
//! - `trade-ledger`: Position tracking and the persistent trade journal

pub mod engine;
pub mod telemetry;

pub use engine::Engine;
pub use engine_core as core;
pub use risk_engine as risk;
pub use trade_ledger as ledger;
