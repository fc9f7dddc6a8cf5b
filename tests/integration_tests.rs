//! Integration tests for component interactions.
//!
//! These tests drive the full engine through realistic trade lifecycles
//! with a manual clock and verify that sizing, stops, exits, the circuit
//! breaker, and the journal agree with each other.

use chrono::{DateTime, Duration, TimeZone, Utc};
use engine_core::clock::{Clock, ManualClock};
use engine_core::config::EngineConfig;
use engine_core::events::EngineEvent;
use engine_core::types::{Candle, ExitReason, Side, Signal, TradeMode};
use rust_decimal::Decimal;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use zone_trader::Engine;

fn session_start() -> DateTime<Utc> {
    // 09:30 venue-local (+05:30).
    Utc.with_ymd_and_hms(2024, 3, 1, 4, 0, 0).unwrap()
}

fn build_engine(
    dir: &TempDir,
) -> (Engine, Arc<ManualClock>, UnboundedReceiver<EngineEvent>) {
    let clock = Arc::new(ManualClock::new(session_start()));
    let config = EngineConfig {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let (engine, rx) = Engine::new(config, clock.clone(), Decimal::from(100_000)).unwrap();
    (engine, clock, rx)
}

fn nifty_signal() -> Signal {
    Signal::new("NIFTY", Side::Buy, Decimal::from(100), Decimal::TWO)
        .with_zone(Decimal::from(95), Decimal::from(105))
        .with_mode(TradeMode::Scalp)
}

fn bar_at(clock: &ManualClock, open: i64, high: i64, low: i64, close: i64) -> Candle {
    Candle {
        timestamp: clock.now(),
        open: Decimal::from(open),
        high: Decimal::from(high),
        low: Decimal::from(low),
        close: Decimal::from(close),
        volume: Decimal::from(1000),
    }
}

fn drain(rx: &mut UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// A trade that rides the full take-profit ladder ends up journaled with
/// a FULL_EXIT_3R reason and a profit equal to the staged exits.
#[tokio::test]
async fn full_take_profit_ladder_journals_one_winner() {
    let dir = TempDir::new().unwrap();
    let (mut engine, clock, mut rx) = build_engine(&dir);

    let position = engine
        .try_open(&nifty_signal(), None)
        .await
        .unwrap()
        .unwrap();
    // Zone low 95 minus buffer max(0.15, 0.5).
    assert_eq!(position.stop_price, Decimal::new(945, 1));
    assert_eq!(position.original_qty, 100);

    // Walk price through 1R (105.5), 2R (111), 3R (116.5).
    clock.advance(Duration::minutes(1));
    engine
        .on_bar("NIFTY", &bar_at(&clock, 100, 106, 100, 106), &[])
        .await
        .unwrap();
    clock.advance(Duration::minutes(1));
    engine
        .on_bar("NIFTY", &bar_at(&clock, 106, 112, 105, 111), &[])
        .await
        .unwrap();
    clock.advance(Duration::minutes(1));
    engine
        .on_bar("NIFTY", &bar_at(&clock, 111, 117, 110, 117), &[])
        .await
        .unwrap();

    let closed = engine.tracker().get(&position.id).unwrap();
    assert!(!closed.is_open);
    assert_eq!(
        closed.close_reason.map(|r| r.as_code()),
        Some("FULL_EXIT_3R".to_string())
    );
    // 60 lots at +6, 30 at +11, 10 at +17.
    assert_eq!(closed.realized_pnl(), Decimal::from(860));

    let stats = engine.journal().all_time_stats().await;
    assert_eq!(stats.total_trades, 1);
    assert_eq!(stats.total_pnl, Decimal::from(860));

    let events = drain(&mut rx);
    let partial_fills = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::PartialExitFilled { .. }))
        .count();
    assert_eq!(partial_fills, 3);
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::MovedToBreakeven { .. })));
}

/// A close below the structural stop exits the whole position; the wick
/// alone never does.
#[tokio::test]
async fn structural_stop_needs_a_close_beyond_the_level() {
    let dir = TempDir::new().unwrap();
    let (mut engine, clock, _rx) = build_engine(&dir);
    let position = engine
        .try_open(&nifty_signal(), None)
        .await
        .unwrap()
        .unwrap();

    // Wick through 94.5 but close back above: still open.
    clock.advance(Duration::minutes(1));
    engine
        .on_bar("NIFTY", &bar_at(&clock, 100, 100, 93, 96), &[])
        .await
        .unwrap();
    assert!(engine.tracker().get(&position.id).unwrap().is_open);

    // Close at 94: stopped out.
    clock.advance(Duration::minutes(1));
    engine
        .on_bar("NIFTY", &bar_at(&clock, 96, 96, 93, 94), &[])
        .await
        .unwrap();

    let closed = engine.tracker().get(&position.id).unwrap();
    assert!(!closed.is_open);
    assert_eq!(closed.close_reason, Some(ExitReason::StructuralStop));

    let report = engine.journal().daily_report(None).await;
    assert_eq!(report.trades, 1);
    assert_eq!(report.losses, 1);
}

/// Forty-five minutes without a new high forces a stale long out.
#[tokio::test]
async fn time_stop_exits_a_stalled_trade() {
    let dir = TempDir::new().unwrap();
    let (mut engine, clock, _rx) = build_engine(&dir);
    let position = engine
        .try_open(&nifty_signal(), None)
        .await
        .unwrap()
        .unwrap();

    // Price drifts sideways for 46 minutes, never exceeding the first
    // bar's high.
    let first = bar_at(&clock, 100, 101, 99, 100);
    clock.advance(Duration::minutes(46));
    let last = bar_at(&clock, 100, 100, 99, 100);
    engine
        .on_bar("NIFTY", &last, &[first, last])
        .await
        .unwrap();

    let closed = engine.tracker().get(&position.id).unwrap();
    assert!(!closed.is_open);
    assert_eq!(closed.close_reason, Some(ExitReason::TimeStop));
}

/// The breaker ladder escalates from pause to size reduction to
/// liquidation as equity bleeds.
#[tokio::test]
async fn breaker_ladder_escalates_with_drawdown() {
    let dir = TempDir::new().unwrap();
    let (mut engine, clock, mut rx) = build_engine(&dir);

    engine
        .try_open(&nifty_signal(), None)
        .await
        .unwrap()
        .unwrap();

    // -2.5%: pause new trades, existing position stays.
    engine.on_equity_update(Decimal::from(97_500)).await.unwrap();
    assert!(engine.try_open(&nifty_signal(), None).await.unwrap().is_none());
    assert_eq!(engine.tracker().open_positions().len(), 1);

    // Pause expires; -5.5% halves new sizes.
    clock.advance(Duration::minutes(61));
    engine.on_equity_update(Decimal::from(94_500)).await.unwrap();
    let reduced = engine
        .try_open(&nifty_signal(), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reduced.original_qty, 50);

    // -11%: everything goes flat and stays blocked.
    engine.on_equity_update(Decimal::from(89_000)).await.unwrap();
    assert!(engine.tracker().open_positions().is_empty());
    assert!(engine.try_open(&nifty_signal(), None).await.unwrap().is_none());

    let events = drain(&mut rx);
    let trips: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::CircuitBreakerTripped { level, .. } => Some(level.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(trips, vec!["LEVEL_1", "LEVEL_2", "LEVEL_3"]);
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::LiquidationOrdered)));
}

/// Validation failures reject the signal and publish the failed codes.
#[tokio::test]
async fn invalid_signal_is_rejected_with_codes() {
    let dir = TempDir::new().unwrap();
    let (mut engine, _clock, mut rx) = build_engine(&dir);

    // Entry outside its own zone and no trade mode.
    let bad = Signal::new("NIFTY", Side::Buy, Decimal::from(110), Decimal::TWO)
        .with_zone(Decimal::from(95), Decimal::from(105));
    assert!(engine.try_open(&bad, None).await.unwrap().is_none());
    assert!(engine.tracker().open_positions().is_empty());

    let events = drain(&mut rx);
    let rejected = events.iter().find_map(|e| match e {
        EngineEvent::TradeRejected { failed_checks, .. } => Some(failed_checks.clone()),
        _ => None,
    });
    let codes = rejected.unwrap();
    assert!(codes.contains(&"ZONE_INVALID".to_string()));
    assert!(codes.contains(&"TRADE_MODE_UNKNOWN".to_string()));
}

/// Journal history and reports survive an engine restart.
#[tokio::test]
async fn journal_survives_restart() {
    let dir = TempDir::new().unwrap();

    {
        let (mut engine, clock, _rx) = build_engine(&dir);
        let position = engine
            .try_open(&nifty_signal(), None)
            .await
            .unwrap()
            .unwrap();
        clock.advance(Duration::minutes(1));
        engine
            .on_bar("NIFTY", &bar_at(&clock, 100, 100, 93, 94), &[])
            .await
            .unwrap();
        assert!(!engine.tracker().get(&position.id).unwrap().is_open);
        engine.save_state();
    }

    let (engine, _, _rx) = build_engine(&dir);
    let stats = engine.journal().all_time_stats().await;
    assert_eq!(stats.total_trades, 1);
    assert_eq!(stats.losing_trades, 1);

    let state = engine.journal().load_state();
    assert_eq!(state.trades_today, 1);
}

/// The EOD cutoff flattens every open position at 15:10 venue-local.
#[tokio::test]
async fn eod_cutoff_flattens_the_book() {
    let dir = TempDir::new().unwrap();
    let (mut engine, clock, _rx) = build_engine(&dir);

    engine
        .try_open(&nifty_signal(), None)
        .await
        .unwrap()
        .unwrap();
    let other = Signal::new("BANKNIFTY", Side::Sell, Decimal::from(200), Decimal::TWO)
        .with_zone(Decimal::from(195), Decimal::from(205))
        .with_mode(TradeMode::Trend);
    engine.try_open(&other, None).await.unwrap().unwrap();

    // 15:10 venue-local.
    clock.set(Utc.with_ymd_and_hms(2024, 3, 1, 9, 40, 0).unwrap());
    engine
        .on_bar("NIFTY", &bar_at(&clock, 100, 101, 99, 100), &[])
        .await
        .unwrap();
    engine
        .on_bar("BANKNIFTY", &bar_at(&clock, 200, 201, 199, 200), &[])
        .await
        .unwrap();

    assert!(engine.tracker().open_positions().is_empty());
    let report = engine.journal().daily_report(None).await;
    assert_eq!(report.trades, 2);
}
