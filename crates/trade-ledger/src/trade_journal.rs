//! Persistent trade journal backed by JSON files.
//!
//! Three files under the data directory: `trades.json` (every completed
//! trade), `state.json` (engine state for restart recovery), and
//! `stats.json` (aggregate statistics). Statistics are maintained
//! incrementally as trades are recorded and rebuilt from the trade list
//! on load, so a stale stats file can never disagree with the trades.
//!
//! Persistence failures are reported over the event bus and logged but
//! never propagated: a full disk must not take the engine down mid-trade.

use chrono::{Datelike, Duration, FixedOffset, NaiveDate, Offset, Utc};
use engine_core::clock::Clock;
use engine_core::config::EngineConfig;
use engine_core::events::{EngineEvent, EventBus};
use engine_core::types::{EngineState, JournalEntry, Position, RunningStats};
use engine_core::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Per-day trading summary.
#[derive(Debug, Clone, Serialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub trades: usize,
    pub pnl: Decimal,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: Decimal,
    pub best_trade: Decimal,
    pub worst_trade: Decimal,
}

/// Weekly or monthly trading summary.
#[derive(Debug, Clone, Serialize)]
pub struct PeriodReport {
    pub period: String,
    pub trades: usize,
    pub pnl: Decimal,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: Decimal,
    pub avg_pnl: Decimal,
    /// Peak-to-trough drawdown over the period, monthly reports only.
    pub max_drawdown: Option<Decimal>,
    pub profit_factor: Option<Decimal>,
}

struct JournalInner {
    entries: Vec<JournalEntry>,
    stats: RunningStats,
}

pub struct TradeJournal {
    trades_file: PathBuf,
    state_file: PathBuf,
    stats_file: PathBuf,
    venue_offset: FixedOffset,
    clock: Arc<dyn Clock>,
    events: EventBus,
    inner: RwLock<JournalInner>,
}

impl TradeJournal {
    /// Open (or create) the journal under the configured data directory,
    /// loading any existing trade history.
    pub fn new(config: &EngineConfig, clock: Arc<dyn Clock>, events: EventBus) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let trades_file = config.data_dir.join("trades.json");
        let entries: Vec<JournalEntry> = load_json(&trades_file).unwrap_or_default();
        let stats = RunningStats::recompute(&entries, clock.now());

        info!(
            data_dir = %config.data_dir.display(),
            historical_trades = entries.len(),
            "trade journal initialized"
        );

        let secs = config.venue_utc_offset_minutes * 60;
        Ok(Self {
            trades_file,
            state_file: config.data_dir.join("state.json"),
            stats_file: config.data_dir.join("stats.json"),
            venue_offset: FixedOffset::east_opt(secs).unwrap_or_else(|| Utc.fix()),
            clock,
            events,
            inner: RwLock::new(JournalInner { entries, stats }),
        })
    }

    /// Venue-local trade date for the current instant.
    fn today(&self) -> NaiveDate {
        self.clock.now().with_timezone(&self.venue_offset).date_naive()
    }

    /// Record a completed trade from a closed position and flush to disk.
    /// Returns `None` if the position is still open.
    pub async fn record_closed(&self, position: &Position) -> Option<JournalEntry> {
        let mut inner = self.inner.write().await;

        let id = inner.entries.len() as u64 + 1;
        let entry = JournalEntry::from_closed(id, position, self.today())?;

        inner.stats.record(entry.pnl, self.clock.now());
        inner.entries.push(entry.clone());

        info!(
            symbol = %entry.symbol,
            pnl = %entry.pnl,
            exit_reason = %entry.exit_reason,
            "trade journaled"
        );

        self.flush(&self.trades_file, &inner.entries);
        self.flush(&self.stats_file, &inner.stats);

        Some(entry)
    }

    /// Persist engine state for restart recovery.
    pub fn save_state(&self, mut state: EngineState) {
        state.last_saved = Some(self.clock.now());
        self.flush(&self.state_file, &state);
    }

    /// Load previously saved engine state, defaulting when absent.
    pub fn load_state(&self) -> EngineState {
        load_json(&self.state_file).unwrap_or_default()
    }

    pub async fn all_time_stats(&self) -> RunningStats {
        self.inner.read().await.stats.clone()
    }

    pub async fn entry_count(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Summary for one trading day; defaults to the venue-local today.
    pub async fn daily_report(&self, date: Option<NaiveDate>) -> DailyReport {
        let date = date.unwrap_or_else(|| self.today());
        let inner = self.inner.read().await;
        let day: Vec<&JournalEntry> =
            inner.entries.iter().filter(|e| e.date == date).collect();

        if day.is_empty() {
            return DailyReport {
                date,
                trades: 0,
                pnl: Decimal::ZERO,
                wins: 0,
                losses: 0,
                win_rate: Decimal::ZERO,
                best_trade: Decimal::ZERO,
                worst_trade: Decimal::ZERO,
            };
        }

        let pnl: Decimal = day.iter().map(|e| e.pnl).sum();
        let wins = day.iter().filter(|e| e.is_winner()).count();
        let best = day.iter().map(|e| e.pnl).max().unwrap_or(Decimal::ZERO);
        let worst = day.iter().map(|e| e.pnl).min().unwrap_or(Decimal::ZERO);

        DailyReport {
            date,
            trades: day.len(),
            pnl,
            wins,
            losses: day.len() - wins,
            win_rate: Decimal::from(wins as u64) / Decimal::from(day.len() as u64)
                * Decimal::ONE_HUNDRED,
            best_trade: best,
            worst_trade: worst,
        }
    }

    /// Summary for the current venue-local week (Monday start).
    pub async fn weekly_report(&self) -> PeriodReport {
        let today = self.today();
        let week_start =
            today - Duration::days(today.weekday().num_days_from_monday() as i64);
        self.period_report(
            format!("Week of {week_start}"),
            week_start,
            false,
        )
        .await
    }

    /// Summary for the current venue-local month, with drawdown.
    pub async fn monthly_report(&self) -> PeriodReport {
        let today = self.today();
        let month_start = today.with_day(1).unwrap_or(today);
        self.period_report(format!("{}-{:02}", today.year(), today.month()), month_start, true)
            .await
    }

    async fn period_report(
        &self,
        period: String,
        start: NaiveDate,
        with_drawdown: bool,
    ) -> PeriodReport {
        let inner = self.inner.read().await;
        let mut in_period: Vec<&JournalEntry> =
            inner.entries.iter().filter(|e| e.date >= start).collect();

        if in_period.is_empty() {
            return PeriodReport {
                period,
                trades: 0,
                pnl: Decimal::ZERO,
                wins: 0,
                losses: 0,
                win_rate: Decimal::ZERO,
                avg_pnl: Decimal::ZERO,
                max_drawdown: None,
                profit_factor: None,
            };
        }

        let pnl: Decimal = in_period.iter().map(|e| e.pnl).sum();
        let wins = in_period.iter().filter(|e| e.is_winner()).count();
        let count = in_period.len();

        let max_drawdown = if with_drawdown {
            in_period.sort_by_key(|e| e.exit_time);
            let mut running = Decimal::ZERO;
            let mut peak = Decimal::ZERO;
            let mut max_dd = Decimal::ZERO;
            for entry in &in_period {
                running += entry.pnl;
                peak = peak.max(running);
                max_dd = max_dd.max(peak - running);
            }
            Some(max_dd)
        } else {
            None
        };

        PeriodReport {
            period,
            trades: count,
            pnl,
            wins,
            losses: count - wins,
            win_rate: Decimal::from(wins as u64) / Decimal::from(count as u64)
                * Decimal::ONE_HUNDRED,
            avg_pnl: pnl / Decimal::from(count as u64),
            max_drawdown,
            profit_factor: with_drawdown.then(|| inner.stats.profit_factor()),
        }
    }

    fn flush<T: Serialize>(&self, path: &Path, data: &T) {
        let payload = match serde_json::to_vec_pretty(data) {
            Ok(payload) => payload,
            Err(err) => {
                error!(path = %path.display(), error = %err, "journal serialization failed");
                self.events.emit(EngineEvent::JournalWriteFailed {
                    path: path.display().to_string(),
                    message: err.to_string(),
                });
                return;
            }
        };
        if let Err(err) = std::fs::write(path, payload) {
            error!(path = %path.display(), error = %err, "journal write failed");
            self.events.emit(EngineEvent::JournalWriteFailed {
                path: path.display().to_string(),
                message: err.to_string(),
            });
        }
    }
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.exists() {
        return None;
    }
    match std::fs::read(path) {
        Ok(raw) => match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to parse journal file");
                None
            }
        },
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read journal file");
            None
        }
    }
}
