//! FIFO lot matching
//!
//! Matches exit events (SELL, COVER) against prior entry events (BUY, SHORT)
//! per exposure bucket, in time order:
//! - BUY/SHORT: create a new lot (first-in position)
//! - SELL/COVER: consume the oldest remaining lot(s) first, splitting a lot
//!   when the exit is smaller than the lot and spanning lots when larger
//!
//! Each full or partial consumption emits a closed trade with proportional
//! realized P&L. An exit that exceeds all open quantity for its bucket is
//! not an error: the excess becomes an incomplete trade, signalling that the
//! observed history is missing the matching entry. Empty input yields empty
//! output; there is no failure state.

use std::collections::BTreeMap;

use crate::models::{
    ClosedTrade, Direction, ExposureKey, IncompleteTrade, NormalizedEvent, OpenLot,
};

/// Result of one lot-matching pass over the event stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LotMatchResult {
    pub closed_trades: Vec<ClosedTrade>,
    pub open_lots: Vec<OpenLot>,
    pub incomplete_trades: Vec<IncompleteTrade>,
}

impl LotMatchResult {
    /// Total realized P&L per currency, summed over all closed trades
    pub fn realized_pnl_by_currency(&self) -> BTreeMap<String, f64> {
        let mut totals: BTreeMap<String, f64> = BTreeMap::new();
        for trade in &self.closed_trades {
            *totals
                .entry(trade.exposure_key.currency.clone())
                .or_insert(0.0) += trade.realized_pnl;
        }
        totals
    }
}

/// Match exits against entries in FIFO order across the whole event stream.
///
/// Events must already be sorted chronologically (see
/// [`crate::classify::normalize_events`]). Income events and untracked
/// instrument classes (unknown, FX artifacts) are skipped, the same filter
/// the timeline and cash replay apply.
pub fn match_lots(events: &[NormalizedEvent]) -> LotMatchResult {
    // BTreeMap keeps per-key iteration order deterministic for the output
    let mut lots_by_key: BTreeMap<ExposureKey, Vec<OpenLot>> = BTreeMap::new();
    let mut closed_trades: Vec<ClosedTrade> = Vec::new();
    let mut incomplete_trades: Vec<IncompleteTrade> = Vec::new();

    for event in events {
        if !event.instrument_class.is_tracked() {
            continue;
        }
        let Some(key) = event.exposure_key() else {
            continue; // income
        };

        if event.kind.is_entry() {
            lots_by_key.entry(key.clone()).or_default().push(OpenLot {
                exposure_key: key,
                entry_date: event.date,
                entry_price: event.price,
                remaining_quantity: event.quantity,
                synthetic: false,
            });
        } else if event.kind.is_exit() {
            let lots = lots_by_key.entry(key.clone()).or_default();
            let mut to_consume = event.quantity;

            for lot in lots.iter_mut() {
                if to_consume <= 0.0 {
                    break;
                }
                if lot.remaining_quantity <= 0.0 {
                    continue;
                }

                let consumed = lot.remaining_quantity.min(to_consume);
                closed_trades.push(ClosedTrade {
                    exposure_key: key.clone(),
                    entry_date: lot.entry_date,
                    exit_date: event.date,
                    quantity: consumed,
                    realized_pnl: realized_pnl(
                        key.direction,
                        lot.entry_price,
                        event.price,
                        consumed,
                    ),
                });

                lot.remaining_quantity -= consumed;
                to_consume -= consumed;
            }

            if to_consume > 0.0 {
                log::warn!(
                    "FIFO: no matching entry for {:.4} of exit {} on {}",
                    to_consume,
                    key,
                    event.date
                );
                incomplete_trades.push(IncompleteTrade {
                    exposure_key: key,
                    date: event.date,
                    quantity: to_consume,
                });
            }
        }
    }

    let open_lots: Vec<OpenLot> = lots_by_key
        .into_values()
        .flatten()
        .filter(|lot| lot.remaining_quantity > 0.0)
        .collect();

    LotMatchResult {
        closed_trades,
        open_lots,
        incomplete_trades,
    }
}

/// Realized P&L for a consumed quantity: (exit − entry) × qty for long
/// exposure, sign inverted for short (profit when the price falls)
fn realized_pnl(direction: Direction, entry_price: f64, exit_price: f64, quantity: f64) -> f64 {
    let long_pnl = (exit_price - entry_price) * quantity;
    match direction {
        Direction::Long => long_pnl,
        Direction::Short => -long_pnl,
    }
}
