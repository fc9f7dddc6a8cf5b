//! Trade signals and their supporting enums.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for long, -1 for short; used when signing P&L.
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => -Decimal::ONE,
        }
    }
}

/// How the trade is classified by the strategy layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeMode {
    Scalp,
    Trend,
    Swing,
}

/// Asset class, used for per-class lot caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Stock,
    Crypto,
    Option,
}

/// Option contract type for derivative instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionType {
    Call,
    Put,
}

/// Supply/demand zone that produced an entry signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub low: Decimal,
    pub high: Decimal,
}

impl Zone {
    pub fn contains(&self, price: Decimal) -> bool {
        self.low <= price && price <= self.high
    }
}

/// A proposed trade, produced by the strategy layer and gated by the
/// validator before it can become a position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub symbol: String,
    pub action: Side,
    pub asset_class: AssetClass,
    pub entry_price: Decimal,
    /// Zone bounds may be absent for signals not derived from a zone.
    pub zone: Option<Zone>,
    /// Unclassified signals fail validation; set via [`Signal::with_mode`].
    pub mode: Option<TradeMode>,
    /// 1-minute ATR at signal time.
    pub atr_1m: Decimal,
    /// Strike and contract type, present for option instruments only.
    pub strike: Option<i64>,
    pub option_type: Option<OptionType>,
}

impl Signal {
    pub fn new(
        symbol: impl Into<String>,
        action: Side,
        entry_price: Decimal,
        atr_1m: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            action,
            asset_class: AssetClass::Stock,
            entry_price,
            zone: None,
            mode: None,
            atr_1m,
            strike: None,
            option_type: None,
        }
    }

    pub fn with_asset_class(mut self, asset_class: AssetClass) -> Self {
        self.asset_class = asset_class;
        self
    }

    pub fn with_zone(mut self, low: Decimal, high: Decimal) -> Self {
        self.zone = Some(Zone { low, high });
        self
    }

    pub fn with_mode(mut self, mode: TradeMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_option(mut self, strike: i64, option_type: OptionType) -> Self {
        self.asset_class = AssetClass::Option;
        self.strike = Some(strike);
        self.option_type = Some(option_type);
        self
    }
}
