//! Risk Engine Library
//!
//! Position sizing, the three-level stop system, partial take-profit
//! management, the pre-trade validation gate, the drawdown circuit
//! breaker, and anomaly detection.

pub mod anomaly;
pub mod circuit_breaker;
pub mod exit_manager;
pub mod risk_calculator;
pub mod stop_loss;
pub mod trade_validator;

pub use anomaly::AnomalyDetector;
pub use circuit_breaker::{BreakerAction, BreakerLevel, BreakerStatus, CircuitBreaker, TradeGate};
pub use exit_manager::{ExitManager, RTargets};
pub use risk_calculator::{RiskCalculator, RiskSummary};
pub use stop_loss::{StopDecision, StopLossManager};
pub use trade_validator::{CheckFailure, TradeValidator};
