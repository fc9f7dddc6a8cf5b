//! Exit strategy: staged partial take-profits, break-even promotion, and
//! the end-of-day forced exit.
//!
//! The TP schedule exits 60% of the original quantity at 1R, 30% at 2R,
//! and 10% at 3R, with the stop moved to break-even once 1R trades.

use chrono::{DateTime, FixedOffset, NaiveTime, Offset, Utc};
use engine_core::config::EngineConfig;
use engine_core::types::{Position, Side, TpLevel};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{info, warn};

/// R-multiple target prices for one entry/stop pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RTargets {
    pub r1: Decimal,
    pub r2: Decimal,
    pub r3: Decimal,
}

impl RTargets {
    pub fn target(&self, level: TpLevel) -> Decimal {
        match level {
            TpLevel::R1 => self.r1,
            TpLevel::R2 => self.r2,
            TpLevel::R3 => self.r3,
        }
    }
}

pub struct ExitManager {
    eod_cutoff: NaiveTime,
    venue_offset: FixedOffset,
}

impl ExitManager {
    pub fn new(config: &EngineConfig) -> Self {
        let secs = config.venue_utc_offset_minutes * 60;
        Self {
            eod_cutoff: config.eod_cutoff,
            venue_offset: FixedOffset::east_opt(secs).unwrap_or_else(|| Utc.fix()),
        }
    }

    /// Target prices at 1R, 2R, and 3R from entry, in the profit direction.
    pub fn r_targets(entry_price: Decimal, stop_price: Decimal, side: Side) -> RTargets {
        let risk = (entry_price - stop_price).abs();
        let sign = side.sign();
        RTargets {
            r1: entry_price + risk * sign,
            r2: entry_price + risk * Decimal::TWO * sign,
            r3: entry_price + risk * Decimal::from(3) * sign,
        }
    }

    /// First unhit TP level the current price has reached, in 1R, 2R, 3R
    /// order.
    pub fn check_partial_tp(&self, position: &Position, price: Decimal) -> Option<TpLevel> {
        let targets =
            Self::r_targets(position.entry_price, position.stop_price, position.side);

        for level in TpLevel::ALL {
            if position.tp_hits.is_hit(level) {
                continue;
            }
            let reached = match position.side {
                Side::Buy => price >= targets.target(level),
                Side::Sell => price <= targets.target(level),
            };
            if reached {
                info!(
                    position_id = %position.id,
                    level = level.label(),
                    price = %price,
                    target = %targets.target(level),
                    "take-profit target hit"
                );
                return Some(level);
            }
        }
        None
    }

    /// Quantity to exit at `level`: the level's fraction of the ORIGINAL
    /// size, floored, clamped to what remains, and never zero while
    /// quantity remains.
    pub fn partial_exit_qty(&self, position: &Position, level: TpLevel) -> i64 {
        if position.current_qty <= 0 {
            warn!(
                position_id = %position.id,
                level = level.label(),
                "no quantity remaining for partial exit"
            );
            return 0;
        }

        let raw = Decimal::from(position.original_qty) * level.exit_fraction();
        let mut qty = raw.floor().to_i64().unwrap_or(0);
        qty = qty.min(position.current_qty);
        if qty == 0 {
            qty = 1;
        }
        qty
    }

    /// Move the stop to break-even after the 1R target trades.
    pub fn should_move_to_breakeven(&self, position: &Position, price: Decimal) -> bool {
        if position.moved_to_be {
            return false;
        }
        let targets =
            Self::r_targets(position.entry_price, position.stop_price, position.side);
        match position.side {
            Side::Buy => price >= targets.r1,
            Side::Sell => price <= targets.r1,
        }
    }

    /// True once the venue-local wall clock reaches the EOD cutoff.
    pub fn eod_reached(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.venue_offset);
        if local.time() >= self.eod_cutoff {
            warn!(
                local_time = %local.time(),
                cutoff = %self.eod_cutoff,
                "end-of-day cutoff reached"
            );
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use engine_core::types::TradeMode;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 5, 0, 0).unwrap()
    }

    fn manager() -> ExitManager {
        ExitManager::new(&EngineConfig::default())
    }

    fn long_position(qty: i64) -> Position {
        Position::new(
            "NIFTY_1_t".to_string(),
            "NIFTY".to_string(),
            Side::Buy,
            Decimal::from(100),
            Decimal::from(98),
            qty,
            ts(),
            None,
            Decimal::ONE,
            TradeMode::Scalp,
        )
    }

    #[test]
    fn r_targets_follow_trade_direction() {
        let long = ExitManager::r_targets(Decimal::from(100), Decimal::from(98), Side::Buy);
        assert_eq!(long.r1, Decimal::from(102));
        assert_eq!(long.r2, Decimal::from(104));
        assert_eq!(long.r3, Decimal::from(106));

        let short = ExitManager::r_targets(Decimal::from(100), Decimal::from(102), Side::Sell);
        assert_eq!(short.r1, Decimal::from(98));
        assert_eq!(short.r3, Decimal::from(94));
    }

    #[test]
    fn staged_exits_are_sixty_thirty_ten() {
        let mgr = manager();
        let mut pos = long_position(10);

        // 1R: 60% of 10 = 6
        let qty = mgr.partial_exit_qty(&pos, TpLevel::R1);
        assert_eq!(qty, 6);
        pos.apply_partial_exit(qty, Decimal::from(102), TpLevel::R1, ts())
            .unwrap();
        assert_eq!(pos.current_qty, 4);

        // 2R: 30% of original = 3
        let qty = mgr.partial_exit_qty(&pos, TpLevel::R2);
        assert_eq!(qty, 3);
        pos.apply_partial_exit(qty, Decimal::from(104), TpLevel::R2, ts())
            .unwrap();
        assert_eq!(pos.current_qty, 1);

        // 3R: 10% of original = 1, the runt
        let qty = mgr.partial_exit_qty(&pos, TpLevel::R3);
        assert_eq!(qty, 1);
        pos.apply_partial_exit(qty, Decimal::from(106), TpLevel::R3, ts())
            .unwrap();
        assert_eq!(pos.current_qty, 0);
    }

    #[test]
    fn tiny_position_always_exits_at_least_one() {
        let mgr = manager();
        let pos = long_position(3);
        // 10% of 3 floors to 0, bumped to 1.
        assert_eq!(mgr.partial_exit_qty(&pos, TpLevel::R3), 1);
    }

    #[test]
    fn tp_levels_fire_in_order_and_once() {
        let mgr = manager();
        let mut pos = long_position(10);

        // Price at 2R: 1R is still the first unhit level.
        assert_eq!(
            mgr.check_partial_tp(&pos, Decimal::from(104)),
            Some(TpLevel::R1)
        );

        pos.apply_partial_exit(6, Decimal::from(102), TpLevel::R1, ts())
            .unwrap();
        assert_eq!(
            mgr.check_partial_tp(&pos, Decimal::from(104)),
            Some(TpLevel::R2)
        );

        // Below every remaining target: nothing fires.
        assert_eq!(mgr.check_partial_tp(&pos, Decimal::from(101)), None);
    }

    #[test]
    fn breakeven_after_one_r() {
        let mgr = manager();
        let mut pos = long_position(10);
        assert!(!mgr.should_move_to_breakeven(&pos, Decimal::from(101)));
        assert!(mgr.should_move_to_breakeven(&pos, Decimal::from(102)));

        pos.move_to_breakeven();
        assert!(!mgr.should_move_to_breakeven(&pos, Decimal::from(103)));
    }

    #[test]
    fn eod_cutoff_is_venue_local() {
        let mgr = manager();
        // 09:35 UTC = 15:05 IST, before the 15:10 cutoff.
        let before = Utc.with_ymd_and_hms(2024, 3, 1, 9, 35, 0).unwrap();
        assert!(!mgr.eod_reached(before));

        // 09:40 UTC = 15:10 IST, at the cutoff.
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 40, 0).unwrap();
        assert!(mgr.eod_reached(at));
    }
}
