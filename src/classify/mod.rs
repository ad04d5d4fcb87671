//! Instrument classification and event ingestion
//!
//! Providers tag instruments loosely (free-form type strings, symbol
//! conventions that differ per source). Classification happens exactly once
//! here, at ingestion, producing the typed `instrument_class` field every
//! downstream component consumes; no component re-sniffs strings later.
//!
//! Classification order:
//! 1. Explicit class hint from the provider, if present
//! 2. Symbol shape heuristics (futures roots, FX pair notation)
//! 3. Default: equity

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{EventKind, InstrumentClass, NormalizedEvent};

/// A provider record before classification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub symbol: String,
    pub currency: String,
    pub kind: EventKind,
    pub quantity: f64,
    pub price: f64,
    pub fee: f64,
    pub date: NaiveDate,
    /// Free-form instrument type string from the provider, if any
    pub class_hint: Option<String>,
    pub source: String,
}

/// Classify an instrument from its symbol and optional provider hint
pub fn classify(symbol: &str, class_hint: Option<&str>) -> InstrumentClass {
    if let Some(hint) = class_hint {
        if let Some(class) = classify_hint(hint) {
            return class;
        }
    }

    let symbol = symbol.trim();
    if symbol.is_empty() {
        return InstrumentClass::Unknown;
    }

    // Futures symbol conventions: "/ESZ4" (IB-style) or "GC=F" (Yahoo-style)
    if symbol.starts_with('/') || symbol.ends_with("=F") {
        return InstrumentClass::Futures;
    }

    // Currency conversion artifacts: "EUR.USD", "EUR/USD", "EURUSD=X"
    if is_currency_pair(symbol) {
        return InstrumentClass::FxArtifact;
    }

    InstrumentClass::Equity
}

/// Map a provider type string onto a class, if recognizable
fn classify_hint(hint: &str) -> Option<InstrumentClass> {
    match hint.trim().to_uppercase().as_str() {
        "FUT" | "FUTURE" | "FUTURES" => Some(InstrumentClass::Futures),
        "OPT" | "OPTION" | "OPTIONS" | "FOP" => Some(InstrumentClass::Option),
        "STK" | "STOCK" | "EQUITY" | "ETF" | "FUND" => Some(InstrumentClass::Equity),
        "CASH" | "FX" | "FOREX" => Some(InstrumentClass::FxArtifact),
        _ => None,
    }
}

/// "EUR.USD", "EUR/USD" or "EURUSD=X": two ISO-4217-shaped legs
fn is_currency_pair(symbol: &str) -> bool {
    let body = symbol.strip_suffix("=X").unwrap_or(symbol);

    if let Some((base, term)) = body.split_once('.').or_else(|| body.split_once('/')) {
        return is_iso_code(base) && is_iso_code(term);
    }

    // Six-letter compact form only accepted with the =X marker, otherwise
    // ordinary tickers like "GOOGL" + one letter would misclassify
    if symbol.ends_with("=X") && body.len() == 6 {
        let (base, term) = body.split_at(3);
        return is_iso_code(base) && is_iso_code(term);
    }

    false
}

fn is_iso_code(s: &str) -> bool {
    s.len() == 3 && s.chars().all(|c| c.is_ascii_alphabetic())
}

/// Normalize raw provider events into the typed, time-ordered stream the
/// engine consumes: classify each instrument once, uppercase the currency,
/// and sort chronologically (stable within a day; same-day ordering rules
/// are applied later by the components that need them).
pub fn normalize_events(raw: Vec<RawEvent>) -> Vec<NormalizedEvent> {
    let mut events: Vec<NormalizedEvent> = raw
        .into_iter()
        .map(|r| {
            let instrument_class = classify(&r.symbol, r.class_hint.as_deref());
            NormalizedEvent {
                symbol: r.symbol.trim().to_string(),
                currency: r.currency.trim().to_uppercase(),
                kind: r.kind,
                quantity: r.quantity,
                price: r.price,
                fee: r.fee,
                date: r.date,
                instrument_class,
                source: r.source,
            }
        })
        .collect();

    events.sort_by_key(|e| e.date);
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_wins_over_symbol() {
        // Hint says futures even though the symbol looks like an equity
        assert_eq!(classify("ES", Some("FUT")), InstrumentClass::Futures);
        assert_eq!(classify("/ESZ4", Some("STK")), InstrumentClass::Equity);
    }

    #[test]
    fn test_futures_symbols() {
        assert_eq!(classify("/ESZ4", None), InstrumentClass::Futures);
        assert_eq!(classify("GC=F", None), InstrumentClass::Futures);
    }

    #[test]
    fn test_fx_artifacts() {
        assert_eq!(classify("EUR.USD", None), InstrumentClass::FxArtifact);
        assert_eq!(classify("EUR/USD", None), InstrumentClass::FxArtifact);
        assert_eq!(classify("EURUSD=X", None), InstrumentClass::FxArtifact);
    }

    #[test]
    fn test_plain_tickers_are_equity() {
        assert_eq!(classify("AAPL", None), InstrumentClass::Equity);
        assert_eq!(classify("GOOGL", None), InstrumentClass::Equity);
        // Six letters without the =X marker stays an ordinary ticker
        assert_eq!(classify("EURUSD", None), InstrumentClass::Equity);
    }

    #[test]
    fn test_blank_symbol_is_unknown() {
        assert_eq!(classify("", None), InstrumentClass::Unknown);
        assert_eq!(classify("   ", None), InstrumentClass::Unknown);
    }

    #[test]
    fn test_normalize_sorts_and_uppercases() {
        let date = |d| chrono::NaiveDate::from_ymd_opt(2024, 1, d).unwrap();
        let raw = |day, currency: &str| RawEvent {
            symbol: "SAP".to_string(),
            currency: currency.to_string(),
            kind: EventKind::Buy,
            quantity: 1.0,
            price: 100.0,
            fee: 0.0,
            date: date(day),
            class_hint: None,
            source: "test".to_string(),
        };

        let events = normalize_events(vec![raw(20, "eur"), raw(5, "eur")]);
        assert_eq!(events[0].date, date(5));
        assert_eq!(events[1].date, date(20));
        assert_eq!(events[0].currency, "EUR");
    }
}
