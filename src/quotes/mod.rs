//! Period-end price series supplied by the caller
//!
//! Price retrieval itself is an external collaborator: whatever fetches
//! quotes does so once per unique symbol across the full analysis range and
//! hands the result over as a [`PriceBook`]. The engine never refetches per
//! period and holds no ambient price cache: the book is an explicitly
//! passed, caller-owned object, so concurrent analyses cannot interfere.
//!
//! Lookups forward-fill: the most recent price at or before the requested
//! date (weekends, holidays, stale series). A symbol or date with no price
//! at all returns `None`; callers degrade that symbol's contribution with a
//! warning instead of aborting the run.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Caller-owned symbol → period-end price series
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBook {
    series: BTreeMap<String, BTreeMap<NaiveDate, f64>>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the series for a symbol
    pub fn insert_series(
        &mut self,
        symbol: &str,
        points: impl IntoIterator<Item = (NaiveDate, f64)>,
    ) {
        self.series
            .insert(symbol.to_string(), points.into_iter().collect());
    }

    /// Add a single price point
    pub fn insert_price(&mut self, symbol: &str, date: NaiveDate, price: f64) {
        self.series
            .entry(symbol.to_string())
            .or_default()
            .insert(date, price);
    }

    /// Price at or before `date` (forward-fill)
    pub fn price_at(&self, symbol: &str, date: NaiveDate) -> Option<f64> {
        self.series
            .get(symbol)?
            .range(..=date)
            .next_back()
            .map(|(_, price)| *price)
    }

    /// Most recent price in the series, for current valuation
    pub fn latest(&self, symbol: &str) -> Option<f64> {
        self.series
            .get(symbol)?
            .iter()
            .next_back()
            .map(|(_, price)| *price)
    }

    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.series.contains_key(symbol)
    }
}
