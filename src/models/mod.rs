//! Core data model for the reconstruction engine
//!
//! Every type here is derived fresh per analysis run from the immutable
//! input event stream; nothing is persisted by this crate. Positions are
//! tracked per [`ExposureKey`] (symbol + currency + direction); long and
//! short exposure in the same symbol/currency are independent buckets and
//! are never netted against each other.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Kind of a normalized portfolio event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Buy,
    Sell,
    Short,
    Cover,
    Income,
}

impl EventKind {
    /// True for BUY/SELL/SHORT/COVER (everything except income)
    pub fn is_trade(&self) -> bool {
        !matches!(self, EventKind::Income)
    }

    /// True for events that open or extend a position (BUY, SHORT)
    pub fn is_entry(&self) -> bool {
        matches!(self, EventKind::Buy | EventKind::Short)
    }

    /// True for events that reduce or close a position (SELL, COVER)
    pub fn is_exit(&self) -> bool {
        matches!(self, EventKind::Sell | EventKind::Cover)
    }
}

/// Instrument classification, assigned once at ingestion
///
/// `Unknown` (unresolved security identity) and `FxArtifact` (currency
/// conversion bookkeeping rows) are filtered out of lot matching, the
/// position timeline and the cash replay alike. Filtering must stay
/// symmetric across all three or phantom volume shows up as false
/// capital injections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstrumentClass {
    Equity,
    Futures,
    Option,
    Unknown,
    FxArtifact,
}

impl InstrumentClass {
    /// Whether events of this class participate in position and cash replay
    pub fn is_tracked(&self) -> bool {
        !matches!(self, InstrumentClass::Unknown | InstrumentClass::FxArtifact)
    }
}

/// Side of an exposure bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
}

/// A single normalized trade or income event. Immutable input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    pub symbol: String,
    /// ISO currency code, uppercase (normalized at ingestion)
    pub currency: String,
    pub kind: EventKind,
    pub quantity: f64,
    pub price: f64,
    pub fee: f64,
    pub date: NaiveDate,
    pub instrument_class: InstrumentClass,
    /// Originating provider/account, informational only
    pub source: String,
}

impl NormalizedEvent {
    /// The exposure bucket this event acts on; `None` for income events.
    ///
    /// BUY and SELL act on the LONG bucket, SHORT and COVER on the SHORT
    /// bucket.
    pub fn exposure_key(&self) -> Option<ExposureKey> {
        let direction = match self.kind {
            EventKind::Buy | EventKind::Sell => Direction::Long,
            EventKind::Short | EventKind::Cover => Direction::Short,
            EventKind::Income => return None,
        };
        Some(ExposureKey {
            symbol: self.symbol.clone(),
            currency: self.currency.clone(),
            direction,
        })
    }

    /// Gross notional of the event (price × quantity), fee excluded
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }
}

/// Unique identifier of one tracked position bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposureKey {
    pub symbol: String,
    pub currency: String,
    pub direction: Direction,
}

impl ExposureKey {
    pub fn new(symbol: &str, currency: &str, direction: Direction) -> Self {
        Self {
            symbol: symbol.to_string(),
            currency: currency.to_uppercase(),
            direction,
        }
    }

    /// Signed multiplier for valuation: +1 long, −1 short
    pub fn sign(&self) -> f64 {
        match self.direction {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl std::fmt::Display for ExposureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let side = match self.direction {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        };
        write!(f, "{} {} ({})", side, self.symbol, self.currency)
    }
}

/// An entry event (or synthesized equivalent) not yet fully consumed by exits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenLot {
    pub exposure_key: ExposureKey,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub remaining_quantity: f64,
    /// True when the lot was fabricated to patch incomplete history,
    /// false when backed by an observed entry event
    pub synthetic: bool,
}

/// A fully matched (entry, exit) pair with realized P&L. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedTrade {
    pub exposure_key: ExposureKey,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub quantity: f64,
    /// In the trade's own currency
    pub realized_pnl: f64,
}

/// An exit with no sufficient matching entry in the observed window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncompleteTrade {
    pub exposure_key: ExposureKey,
    pub date: NaiveDate,
    /// Unmatched exit quantity
    pub quantity: f64,
}

/// An income event (dividend, interest, distribution)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeRecord {
    /// Paying security; may be empty for account-level interest
    pub symbol: String,
    /// ISO currency code, uppercase
    pub currency: String,
    pub amount: f64,
    pub date: NaiveDate,
    pub source: String,
}

/// A detected external capital inflow (outflows are not detectable)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalFlow {
    pub date: NaiveDate,
    /// Always > 0
    pub amount: f64,
}

/// Net asset value at a period boundary, in the reporting currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// One entry of the current-holdings snapshot supplied by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    pub exposure_key: ExposureKey,
    pub quantity: f64,
}

/// A fabricated starting entry, reported for coverage accounting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyntheticPosition {
    pub exposure_key: ExposureKey,
    pub date: NaiveDate,
    pub quantity: f64,
    pub reason: SyntheticReason,
}

/// Why a synthetic starting entry was fabricated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyntheticReason {
    /// Currently held exposure with no observed entry anywhere in history,
    /// backfilled to portfolio inception
    UnexplainedHolding,
    /// An exit exceeded all observed entries; entry synthesized just
    /// before the exit so no exposure is fabricated earlier than needed
    UnmatchedExit,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_exposure_key_from_event() {
        let event = NormalizedEvent {
            symbol: "AAPL".to_string(),
            currency: "USD".to_string(),
            kind: EventKind::Sell,
            quantity: 10.0,
            price: 150.0,
            fee: 1.0,
            date: date(2024, 3, 1),
            instrument_class: InstrumentClass::Equity,
            source: "test".to_string(),
        };

        let key = event.exposure_key().unwrap();
        assert_eq!(key.direction, Direction::Long);
        assert_eq!(key.symbol, "AAPL");

        let cover = NormalizedEvent {
            kind: EventKind::Cover,
            ..event.clone()
        };
        assert_eq!(cover.exposure_key().unwrap().direction, Direction::Short);

        let income = NormalizedEvent {
            kind: EventKind::Income,
            ..event
        };
        assert!(income.exposure_key().is_none());
    }

    #[test]
    fn test_direction_sign() {
        assert_eq!(ExposureKey::new("X", "USD", Direction::Long).sign(), 1.0);
        assert_eq!(ExposureKey::new("X", "USD", Direction::Short).sign(), -1.0);
    }

    #[test]
    fn test_currency_uppercased() {
        let key = ExposureKey::new("SAP", "eur", Direction::Long);
        assert_eq!(key.currency, "EUR");
    }

    #[test]
    fn test_tracked_classes() {
        assert!(InstrumentClass::Equity.is_tracked());
        assert!(InstrumentClass::Futures.is_tracked());
        assert!(!InstrumentClass::Unknown.is_tracked());
        assert!(!InstrumentClass::FxArtifact.is_tracked());
    }
}
