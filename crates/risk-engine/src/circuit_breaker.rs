//! Multi-level drawdown circuit breaker.
//!
//! Graduated response to intraday drawdown: pause new trades at -2%,
//! halve position size at -5%, liquidate everything at -10%. Levels are
//! checked most-severe first and each transition fires at most once.

use chrono::{DateTime, Duration, Utc};
use engine_core::clock::Clock;
use engine_core::config::EngineConfig;
use engine_core::events::{EngineEvent, EventBus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Drawdown severity levels, in escalating order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerLevel {
    Level1,
    Level2,
    Level3,
}

impl BreakerLevel {
    /// Checked most-severe first so a hard gap straight to -11% reports
    /// Level 3, not Level 1.
    pub const DESCENDING: [BreakerLevel; 3] =
        [BreakerLevel::Level3, BreakerLevel::Level2, BreakerLevel::Level1];

    /// Drawdown threshold as a (negative) fraction of starting equity.
    pub fn threshold(&self) -> Decimal {
        match self {
            BreakerLevel::Level1 => Decimal::new(-2, 2),
            BreakerLevel::Level2 => Decimal::new(-5, 2),
            BreakerLevel::Level3 => Decimal::new(-10, 2),
        }
    }

    pub fn action(&self) -> BreakerAction {
        match self {
            BreakerLevel::Level1 => BreakerAction::Pause,
            BreakerLevel::Level2 => BreakerAction::Reduce,
            BreakerLevel::Level3 => BreakerAction::Liquidate,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BreakerLevel::Level1 => "LEVEL_1",
            BreakerLevel::Level2 => "LEVEL_2",
            BreakerLevel::Level3 => "LEVEL_3",
        }
    }
}

/// What a tripped level demands of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerAction {
    Pause,
    Reduce,
    Liquidate,
}

impl BreakerAction {
    pub fn label(&self) -> &'static str {
        match self {
            BreakerAction::Pause => "PAUSE",
            BreakerAction::Reduce => "REDUCE",
            BreakerAction::Liquidate => "LIQUIDATE",
        }
    }
}

/// Why new trades are currently blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeGate {
    TradingPaused,
    LiquidationMode,
}

impl TradeGate {
    pub fn as_code(&self) -> &'static str {
        match self {
            TradeGate::TradingPaused => "TRADING_PAUSED",
            TradeGate::LiquidationMode => "LIQUIDATION_MODE",
        }
    }
}

/// Mutable breaker state for one trading session.
#[derive(Debug, Clone, Default, Serialize)]
struct BreakerSession {
    current_level: Option<BreakerLevel>,
    triggered_at: Option<DateTime<Utc>>,
    pause_until: Option<DateTime<Utc>>,
    size_reduction_active: bool,
}

/// Serializable snapshot of the breaker state.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub current_level: Option<BreakerLevel>,
    pub trading_paused: bool,
    pub pause_until: Option<DateTime<Utc>>,
    pub size_reduction_active: bool,
    pub size_multiplier: Decimal,
}

pub struct CircuitBreaker {
    pause_minutes: i64,
    clock: Arc<dyn Clock>,
    events: EventBus,
    session: RwLock<BreakerSession>,
}

impl CircuitBreaker {
    pub fn new(config: &EngineConfig, clock: Arc<dyn Clock>, events: EventBus) -> Self {
        Self {
            pause_minutes: config.pause_minutes,
            clock,
            events,
            session: RwLock::new(BreakerSession::default()),
        }
    }

    /// Evaluate the day's drawdown against the breaker ladder.
    ///
    /// Returns the newly-tripped level and its action, or `None` when no
    /// threshold is crossed or the level already fired this session.
    pub async fn check_drawdown(
        &self,
        current_balance: Decimal,
        starting_balance: Decimal,
    ) -> Option<(BreakerLevel, BreakerAction)> {
        if starting_balance <= Decimal::ZERO {
            return None;
        }

        let dd_fraction = (current_balance - starting_balance) / starting_balance;

        for level in BreakerLevel::DESCENDING {
            if dd_fraction <= level.threshold() {
                let mut session = self.session.write().await;
                // Escalation only: a partial recovery never steps the
                // session back down to a milder level.
                if session.current_level.is_some_and(|current| current >= level) {
                    return None;
                }
                session.current_level = Some(level);
                session.triggered_at = Some(self.clock.now());

                let action = level.action();
                error!(
                    level = level.label(),
                    action = action.label(),
                    drawdown_pct = %(dd_fraction * Decimal::ONE_HUNDRED),
                    "circuit breaker tripped"
                );
                self.events.emit(EngineEvent::CircuitBreakerTripped {
                    level: level.label().to_string(),
                    action: action.label().to_string(),
                    drawdown_pct: dd_fraction * Decimal::ONE_HUNDRED,
                });
                return Some((level, action));
            }
        }

        None
    }

    /// Block new entries for the configured pause window.
    pub async fn pause_trading(&self) {
        let until = self.clock.now() + Duration::minutes(self.pause_minutes);
        self.session.write().await.pause_until = Some(until);

        warn!(until = %until, minutes = self.pause_minutes, "trading paused");
        self.events.emit(EngineEvent::TradingPaused { until });
    }

    /// True while a pause window is active; an expired window is cleared.
    pub async fn is_trading_paused(&self) -> bool {
        let mut session = self.session.write().await;
        match session.pause_until {
            Some(until) if self.clock.now() >= until => {
                info!("trading pause expired, resuming");
                session.pause_until = None;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Halve position sizes for the rest of the session.
    pub async fn activate_size_reduction(&self) {
        self.session.write().await.size_reduction_active = true;

        warn!("position size reduced to 50% due to drawdown");
        self.events.emit(EngineEvent::SizeReductionActivated {
            multiplier: Decimal::new(5, 1),
        });
    }

    /// 1.0 normally, 0.5 while size reduction is active.
    pub async fn size_multiplier(&self) -> Decimal {
        if self.session.read().await.size_reduction_active {
            Decimal::new(5, 1)
        } else {
            Decimal::ONE
        }
    }

    /// Whether new entries are allowed right now.
    pub async fn allow_new_trades(&self) -> Result<(), TradeGate> {
        if self.is_trading_paused().await {
            return Err(TradeGate::TradingPaused);
        }
        if self.session.read().await.current_level == Some(BreakerLevel::Level3) {
            return Err(TradeGate::LiquidationMode);
        }
        Ok(())
    }

    /// Clear all breaker state at the start of a trading day.
    pub async fn reset_daily(&self) {
        *self.session.write().await = BreakerSession::default();
        info!("circuit breaker reset for new day");
    }

    pub async fn status(&self) -> BreakerStatus {
        let session = self.session.read().await;
        let now = self.clock.now();
        let trading_paused = session.pause_until.map(|until| now < until).unwrap_or(false);
        BreakerStatus {
            current_level: session.current_level,
            trading_paused,
            pause_until: session.pause_until,
            size_reduction_active: session.size_reduction_active,
            size_multiplier: if session.size_reduction_active {
                Decimal::new(5, 1)
            } else {
                Decimal::ONE
            },
        }
    }
}
