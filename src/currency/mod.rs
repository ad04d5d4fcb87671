//! Currency conversion
//!
//! Converts position values and income into the reporting currency using
//! rate series supplied by the caller:
//! - Historical rate lookup with forward-fill for missing dates
//!   (weekend/holiday gaps)
//! - Optional point-in-time spot rates for current-day valuation
//!
//! Rates are conversion factors *to the reporting currency* (1 unit of the
//! foreign currency = `rate` units of reporting currency). The book is an
//! explicitly passed, caller-owned cache with no module-level state, so
//! concurrent analyses never interfere.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Caller-owned currency → rate-to-reporting series
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FxBook {
    reporting_currency: String,
    series: BTreeMap<String, BTreeMap<NaiveDate, f64>>,
    spot: BTreeMap<String, f64>,
}

impl FxBook {
    pub fn new(reporting_currency: &str) -> Self {
        Self {
            reporting_currency: reporting_currency.to_uppercase(),
            series: BTreeMap::new(),
            spot: BTreeMap::new(),
        }
    }

    pub fn reporting_currency(&self) -> &str {
        &self.reporting_currency
    }

    /// Replace the historical series for a currency
    pub fn insert_series(
        &mut self,
        currency: &str,
        points: impl IntoIterator<Item = (NaiveDate, f64)>,
    ) {
        self.series
            .insert(currency.to_uppercase(), points.into_iter().collect());
    }

    /// Set the point-in-time rate used for current-day valuation
    pub fn insert_spot(&mut self, currency: &str, rate: f64) {
        self.spot.insert(currency.to_uppercase(), rate);
    }

    /// Exchange rate to the reporting currency on a specific date.
    /// Uses forward-fill: if no rate on the date, the most recent rate
    /// before it.
    pub fn rate_at(&self, currency: &str, date: NaiveDate) -> Result<f64> {
        let currency = currency.to_uppercase();
        if currency == self.reporting_currency {
            return Ok(1.0);
        }

        self.series
            .get(&currency)
            .and_then(|points| points.range(..=date).next_back())
            .map(|(_, rate)| *rate)
            .ok_or_else(|| {
                anyhow!(
                    "No exchange rate found for {}/{} on {} or before",
                    currency,
                    self.reporting_currency,
                    date
                )
            })
    }

    /// Current rate: spot if supplied, otherwise the latest historical point
    pub fn rate_latest(&self, currency: &str) -> Result<f64> {
        let currency = currency.to_uppercase();
        if currency == self.reporting_currency {
            return Ok(1.0);
        }

        if let Some(rate) = self.spot.get(&currency) {
            return Ok(*rate);
        }

        self.series
            .get(&currency)
            .and_then(|points| points.iter().next_back())
            .map(|(_, rate)| *rate)
            .ok_or_else(|| {
                anyhow!(
                    "No exchange rate available for {}/{}",
                    currency,
                    self.reporting_currency
                )
            })
    }

    /// Convert an amount into the reporting currency on a specific date
    pub fn convert(&self, amount: f64, currency: &str, date: NaiveDate) -> Result<f64> {
        if currency.eq_ignore_ascii_case(&self.reporting_currency) {
            return Ok(amount);
        }
        let rate = self.rate_at(currency, date)?;
        Ok(amount * rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    #[test]
    fn test_same_currency_is_identity() {
        let book = FxBook::new("EUR");
        assert_eq!(book.rate_at("EUR", date(1, 1)).unwrap(), 1.0);
        assert_eq!(book.convert(42.0, "eur", date(1, 1)).unwrap(), 42.0);
    }

    #[test]
    fn test_forward_fill() {
        let mut book = FxBook::new("EUR");
        book.insert_series("USD", vec![(date(1, 31), 0.92), (date(2, 29), 0.93)]);

        // Mid-February uses the January rate
        assert!((book.rate_at("USD", date(2, 15)).unwrap() - 0.92).abs() < 1e-12);
        assert!((book.convert(100.0, "USD", date(3, 5)).unwrap() - 93.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_rate_is_an_error() {
        let book = FxBook::new("EUR");
        assert!(book.rate_at("JPY", date(1, 1)).is_err());
        assert!(book.rate_latest("JPY").is_err());
    }

    #[test]
    fn test_spot_preferred_for_latest() {
        let mut book = FxBook::new("EUR");
        book.insert_series("USD", vec![(date(1, 31), 0.92)]);
        book.insert_spot("USD", 0.95);

        assert!((book.rate_latest("USD").unwrap() - 0.95).abs() < 1e-12);
        // Historical lookup is unaffected by spot
        assert!((book.rate_at("USD", date(2, 1)).unwrap() - 0.92).abs() < 1e-12);
    }
}
