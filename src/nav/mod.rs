//! Net asset value construction
//!
//! For each period boundary (month ends from inception to the analysis end
//! date), NAV = Σ signed position values + derived cash balance:
//!
//! ```text
//! LONG value  = +quantity × price × fx
//! SHORT value = −quantity × price × fx   (negative exposure, a liability)
//! ```
//!
//! Prices come from the caller-owned price book (fetched once per symbol
//! across the whole range, never per period) and FX rates from the FX book.
//! A missing price degrades that symbol's contribution with a warning; a
//! missing FX rate falls back to 1.0 with a warning. Neither aborts the run.

use std::collections::BTreeSet;

use chrono::{Datelike, Days, NaiveDate};

use crate::cash::CashReplayResult;
use crate::currency::FxBook;
use crate::models::NavPoint;
use crate::quotes::PriceBook;
use crate::timeline::PositionTimeline;

const EPSILON: f64 = 1e-9;

/// NAV series plus the degradations encountered while pricing it
#[derive(Debug, Clone, Default)]
pub struct NavResult {
    pub points: Vec<NavPoint>,
    pub warnings: Vec<String>,
}

/// Last day of the month containing `date`
fn month_end(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    // First of next month always exists
    NaiveDate::from_ymd_opt(year, month, 1)
        .unwrap_or(date)
        .pred_opt()
        .unwrap_or(date)
}

/// Period boundaries for the NAV series: the day before inception (the
/// zero-value baseline), every month end from inception up to `end`, and
/// `end` itself.
pub fn period_boundaries(inception: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut boundaries = Vec::new();
    boundaries.push(
        inception
            .checked_sub_days(Days::new(1))
            .unwrap_or(inception),
    );

    let mut cursor = month_end(inception);
    while cursor < end {
        boundaries.push(cursor);
        cursor = month_end(cursor.checked_add_days(Days::new(1)).unwrap_or(end));
    }
    boundaries.push(end);
    boundaries.dedup();
    boundaries
}

/// Value every boundary date: priced positions (signed by direction,
/// converted to the reporting currency) plus the derived cash balance at
/// the nearest prior snapshot.
pub fn build_nav(
    timeline: &PositionTimeline,
    cash: &CashReplayResult,
    prices: &PriceBook,
    fx: &FxBook,
    boundaries: &[NaiveDate],
) -> NavResult {
    let mut result = NavResult::default();
    let mut warned_prices: BTreeSet<String> = BTreeSet::new();
    let mut warned_fx: BTreeSet<String> = BTreeSet::new();

    for &date in boundaries {
        let mut value = cash.cash_at(date);

        for key in timeline.keys() {
            let quantity = timeline.quantity_at(key, date);
            if quantity.abs() < EPSILON {
                continue;
            }

            let Some(price) = prices.price_at(&key.symbol, date) else {
                if warned_prices.insert(key.symbol.clone()) {
                    let warning = format!(
                        "No price for {} at {}; its contribution is excluded until data is available",
                        key.symbol, date
                    );
                    log::warn!("{}", warning);
                    result.warnings.push(warning);
                }
                continue;
            };

            let rate = match fx.rate_at(&key.currency, date) {
                Ok(rate) => rate,
                Err(err) => {
                    if warned_fx.insert(key.currency.clone()) {
                        let warning = format!("{}; falling back to rate 1.0", err);
                        log::warn!("{}", warning);
                        result.warnings.push(warning);
                    }
                    1.0
                }
            };

            value += key.sign() * quantity * price * rate;
        }

        log::debug!("NAV {}: {:.2}", date, value);
        result.points.push(NavPoint { date, value });
    }

    result
}
