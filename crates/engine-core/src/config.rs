//! Configuration for the zone-trader engine.

use crate::{Error, Result};
use chrono::NaiveTime;
use rust_decimal::Decimal;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Per-asset-class position size caps (liquidity protection).
#[derive(Debug, Clone)]
pub struct MaxLots {
    pub stock: i64,
    pub crypto: i64,
    pub option: i64,
}

impl Default for MaxLots {
    fn default() -> Self {
        Self {
            stock: 100,
            crypto: 10,
            option: 50,
        }
    }
}

/// Engine configuration.
///
/// Loaded from environment variables with defaults matching the reference
/// deployment; `EngineConfig::default()` is used directly in tests.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Risk capital fraction per trade (0.8575 = 85.75% of equity).
    pub risk_pct: Decimal,
    /// Hard cap on risk per trade regardless of `risk_pct` (0.90 = 90%).
    pub max_risk_pct: Decimal,
    /// Per-asset-class lot caps.
    pub max_lots: MaxLots,
    /// Time stop threshold in minutes.
    pub time_stop_minutes: i64,
    /// Whether a detected volatility-stop candle actually forces an exit.
    /// The reference deployment runs this check in detect-only mode.
    pub volatility_stop_blocks_exit: bool,
    /// Candle body / range ratio that qualifies as a strong reversal bar.
    pub volatility_body_ratio: Decimal,
    /// Pause duration after a Level 1 circuit-breaker trip, in minutes.
    pub pause_minutes: i64,
    /// End-of-day forced-exit cutoff, venue-local wall clock.
    pub eod_cutoff: NaiveTime,
    /// Trading-venue UTC offset in minutes (default +05:30).
    pub venue_utc_offset_minutes: i32,
    /// Directory for journal files (trades/state/stats).
    pub data_dir: PathBuf,
    /// ATR lookback period in bars.
    pub atr_period: usize,
    /// Number of historical ATR samples kept per symbol.
    pub atr_history_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            risk_pct: Decimal::new(8575, 4),    // 85.75%
            max_risk_pct: Decimal::new(90, 2),  // 90%
            max_lots: MaxLots::default(),
            time_stop_minutes: 45,
            volatility_stop_blocks_exit: false,
            volatility_body_ratio: Decimal::new(70, 2), // 0.70
            pause_minutes: 60,
            eod_cutoff: NaiveTime::from_hms_opt(15, 10, 0).expect("valid cutoff"),
            venue_utc_offset_minutes: 330, // +05:30
            data_dir: PathBuf::from("data"),
            atr_period: 14,
            atr_history_len: 20,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let eod_cutoff = match env::var("EOD_CUTOFF") {
            Ok(raw) => NaiveTime::parse_from_str(&raw, "%H:%M").map_err(|_| Error::Config {
                message: format!("EOD_CUTOFF must be HH:MM, got {raw:?}"),
            })?,
            Err(_) => defaults.eod_cutoff,
        };

        Ok(Self {
            risk_pct: decimal_var("RISK_PCT", defaults.risk_pct)?,
            max_risk_pct: decimal_var("MAX_RISK_PCT", defaults.max_risk_pct)?,
            max_lots: MaxLots {
                stock: int_var("MAX_LOTS_STOCK", defaults.max_lots.stock)?,
                crypto: int_var("MAX_LOTS_CRYPTO", defaults.max_lots.crypto)?,
                option: int_var("MAX_LOTS_OPTION", defaults.max_lots.option)?,
            },
            time_stop_minutes: int_var("TIME_STOP_MINUTES", defaults.time_stop_minutes)?,
            volatility_stop_blocks_exit: env::var("VOLATILITY_STOP_BLOCKS_EXIT")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.volatility_stop_blocks_exit),
            volatility_body_ratio: decimal_var(
                "VOLATILITY_BODY_RATIO",
                defaults.volatility_body_ratio,
            )?,
            pause_minutes: int_var("PAUSE_MINUTES", defaults.pause_minutes)?,
            eod_cutoff,
            venue_utc_offset_minutes: int_var(
                "VENUE_UTC_OFFSET_MINUTES",
                defaults.venue_utc_offset_minutes as i64,
            )? as i32,
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            atr_period: int_var("ATR_PERIOD", defaults.atr_period as i64)? as usize,
            atr_history_len: int_var("ATR_HISTORY_LEN", defaults.atr_history_len as i64)? as usize,
        })
    }
}

fn decimal_var(name: &str, default: Decimal) -> Result<Decimal> {
    match env::var(name) {
        Ok(raw) => Decimal::from_str(&raw).map_err(|_| Error::Config {
            message: format!("{name} must be a decimal number, got {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}

fn int_var(name: &str, default: i64) -> Result<i64> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| Error::Config {
            message: format!("{name} must be an integer, got {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}
