//! OHLCV bars and volatility helpers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Absolute open-to-close distance.
    pub fn body(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    /// Full high-to-low range.
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    /// Body as a fraction of the full range; zero-range bars report zero.
    pub fn body_ratio(&self) -> Decimal {
        let range = self.range();
        if range.is_zero() {
            Decimal::ZERO
        } else {
            self.body() / range
        }
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Average True Range over the trailing `period` bars.
///
/// True Range = max(H-L, |H-prev C|, |L-prev C|). Returns zero when there
/// are not enough bars to form `period` true ranges.
pub fn average_true_range(bars: &[Candle], period: usize) -> Decimal {
    if period == 0 || bars.len() < period + 1 {
        return Decimal::ZERO;
    }

    let mut true_ranges = Vec::with_capacity(bars.len() - 1);
    for pair in bars.windows(2) {
        let (prev, current) = (&pair[0], &pair[1]);
        let hl = current.high - current.low;
        let hpc = (current.high - prev.close).abs();
        let lpc = (current.low - prev.close).abs();
        true_ranges.push(hl.max(hpc).max(lpc));
    }

    let sum: Decimal = true_ranges.iter().rev().take(period).sum();
    sum / Decimal::from(period as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(open: i64, high: i64, low: i64, close: i64) -> Candle {
        Candle {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 15, 0).unwrap(),
            open: Decimal::from(open),
            high: Decimal::from(high),
            low: Decimal::from(low),
            close: Decimal::from(close),
            volume: Decimal::from(1000),
        }
    }

    #[test]
    fn body_ratio_of_strong_candle() {
        let candle = bar(100, 110, 99, 101);
        assert_eq!(candle.range(), Decimal::from(11));
        assert_eq!(candle.body(), Decimal::from(1));
        assert!(candle.body_ratio() < Decimal::new(70, 2));

        let strong = bar(100, 108, 99, 107);
        // body 7 of range 9
        assert!(strong.body_ratio() >= Decimal::new(70, 2));
    }

    #[test]
    fn zero_range_candle_has_zero_ratio() {
        let flat = bar(100, 100, 100, 100);
        assert_eq!(flat.body_ratio(), Decimal::ZERO);
    }

    #[test]
    fn atr_needs_enough_bars() {
        let bars = vec![bar(100, 102, 98, 101); 3];
        assert_eq!(average_true_range(&bars, 14), Decimal::ZERO);
    }

    #[test]
    fn atr_of_constant_range_bars() {
        // Every bar spans 4 points and closes where the next opens, so each
        // true range is exactly 4.
        let bars = vec![bar(100, 102, 98, 100); 15];
        assert_eq!(average_true_range(&bars, 14), Decimal::from(4));
    }
}
