//! Position timeline reconstruction
//!
//! Replays the trade stream chronologically to produce, per exposure bucket,
//! a step function of quantity over time. Observed history is often
//! incomplete; two kinds of synthetic starting entries patch it:
//!
//! 1. A currently-held exposure with no observed entry anywhere in the
//!    history gets an entry at portfolio inception, sized so that replaying
//!    the observed exits lands exactly on the current holding.
//! 2. An exit that exceeded all observed entries (an incomplete trade from
//!    lot matching) gets an entry dated immediately before its own exit,
//!    not at inception, which would fabricate exposure that never existed.
//!
//! Every synthetic entry is recorded with its exposure key so the caller can
//! report data coverage.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Days, NaiveDate};

use crate::models::{
    ExposureKey, Holding, IncompleteTrade, NormalizedEvent, OpenLot, SyntheticPosition,
    SyntheticReason,
};
use crate::quotes::PriceBook;

/// Quantity-over-time per exposure bucket, with synthesis bookkeeping
#[derive(Debug, Clone, Default)]
pub struct PositionTimeline {
    /// Cumulative quantity steps per bucket; lookup is last step at-or-before
    series: BTreeMap<ExposureKey, BTreeMap<NaiveDate, f64>>,
    /// Fabricated starting entries, for coverage reporting
    pub synthetic_positions: Vec<SyntheticPosition>,
    /// Open lots backing unexplained current holdings (flagged synthetic),
    /// used for unrealized P&L alongside the matcher's real open lots
    pub synthetic_lots: Vec<OpenLot>,
    pub warnings: Vec<String>,
}

impl PositionTimeline {
    /// Quantity of a bucket at a date boundary (0 before the first entry)
    pub fn quantity_at(&self, key: &ExposureKey, date: NaiveDate) -> f64 {
        self.series
            .get(key)
            .and_then(|steps| steps.range(..=date).next_back())
            .map(|(_, qty)| *qty)
            .unwrap_or(0.0)
    }

    /// All buckets that ever held exposure
    pub fn keys(&self) -> impl Iterator<Item = &ExposureKey> {
        self.series.keys()
    }

    /// Buckets whose entries are all backed by observed events
    pub fn is_backed_by_history(&self, key: &ExposureKey) -> bool {
        !self
            .synthetic_positions
            .iter()
            .any(|s| &s.exposure_key == key)
    }
}

/// Build the quantity timeline from the observed stream plus the incomplete
/// trades reported by lot matching and the caller's current-holdings
/// snapshot. `inception` is the earliest transaction date across the whole
/// portfolio (or the caller's default when there are no transactions).
pub fn build_timeline(
    events: &[NormalizedEvent],
    incomplete_trades: &[IncompleteTrade],
    holdings: &[Holding],
    prices: &PriceBook,
    inception: NaiveDate,
) -> PositionTimeline {
    let mut timeline = PositionTimeline::default();

    // Signed quantity deltas per bucket and date
    let mut deltas: BTreeMap<ExposureKey, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
    // Observed entry/exit volume per bucket, for the synthesis rules
    let mut entered: BTreeMap<ExposureKey, f64> = BTreeMap::new();
    let mut exited: BTreeMap<ExposureKey, f64> = BTreeMap::new();

    for event in events {
        if !event.instrument_class.is_tracked() {
            continue;
        }
        let Some(key) = event.exposure_key() else {
            continue;
        };

        let signed = if event.kind.is_entry() {
            *entered.entry(key.clone()).or_insert(0.0) += event.quantity;
            event.quantity
        } else {
            *exited.entry(key.clone()).or_insert(0.0) += event.quantity;
            -event.quantity
        };
        *deltas
            .entry(key)
            .or_default()
            .entry(event.date)
            .or_insert(0.0) += signed;
    }

    // Rule 1: current holdings with no observed entry get an inception-dated
    // synthetic entry covering the holding plus every observed exit, so the
    // replay ends exactly on the current quantity.
    let mut inception_patched: BTreeSet<ExposureKey> = BTreeSet::new();

    for holding in holdings {
        let key = &holding.exposure_key;
        if holding.quantity <= 0.0 {
            continue;
        }
        if entered.get(key).copied().unwrap_or(0.0) > 0.0 {
            continue;
        }

        let net_exits = exited.get(key).copied().unwrap_or(0.0);
        let quantity = holding.quantity + net_exits;

        let entry_price = match prices.price_at(&key.symbol, inception) {
            Some(price) => price,
            None => {
                timeline.warnings.push(format!(
                    "No price for {} at inception {}; synthetic entry priced at 0",
                    key.symbol, inception
                ));
                0.0
            }
        };

        *deltas
            .entry(key.clone())
            .or_default()
            .entry(inception)
            .or_insert(0.0) += quantity;

        timeline.synthetic_positions.push(SyntheticPosition {
            exposure_key: key.clone(),
            date: inception,
            quantity,
            reason: SyntheticReason::UnexplainedHolding,
        });
        timeline.synthetic_lots.push(OpenLot {
            exposure_key: key.clone(),
            entry_date: inception,
            entry_price,
            remaining_quantity: holding.quantity,
            synthetic: true,
        });
        inception_patched.insert(key.clone());

        log::info!(
            "Synthesized inception position for {}: {:.4} units at {}",
            key,
            quantity,
            inception
        );
    }

    // Rule 2: remaining unmatched exits get an entry dated one day before
    // the exit. Buckets already patched at inception are skipped; their
    // exits are funded by the inception entry.
    for trade in incomplete_trades {
        let key = &trade.exposure_key;
        if inception_patched.contains(key) {
            continue;
        }

        let entry_date = trade
            .date
            .checked_sub_days(Days::new(1))
            .unwrap_or(trade.date);

        *deltas
            .entry(key.clone())
            .or_default()
            .entry(entry_date)
            .or_insert(0.0) += trade.quantity;

        timeline.synthetic_positions.push(SyntheticPosition {
            exposure_key: key.clone(),
            date: entry_date,
            quantity: trade.quantity,
            reason: SyntheticReason::UnmatchedExit,
        });

        log::info!(
            "Synthesized pre-exit entry for {}: {:.4} units at {}",
            key,
            trade.quantity,
            entry_date
        );
    }

    // Prefix-sum the deltas into cumulative step series
    for (key, day_deltas) in deltas {
        let mut steps: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        let mut running = 0.0;
        for (date, delta) in day_deltas {
            running += delta;
            // Quantities are never negative; tiny float residue is clamped
            if running < 0.0 {
                if running < -1e-6 {
                    log::warn!(
                        "Timeline for {} dips to {:.6} at {}; clamping to 0",
                        key,
                        running,
                        date
                    );
                }
                running = 0.0;
            }
            steps.insert(date, running);
        }
        timeline.series.insert(key, steps);
    }

    timeline
}
