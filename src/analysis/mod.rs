//! Full analysis pipeline
//!
//! Wires the components in dependency order (lot matching, position
//! timeline, cash replay, NAV construction, Modified Dietz) and assembles
//! the result record callers consume (return series, NAV series, flows,
//! realized/unrealized P&L, income breakdown, coverage, warnings).
//!
//! Error policy: only "no transaction history and no current holdings" is a
//! terminal error. Every other anomaly (missing prices, skipped periods,
//! unclosed futures, all-synthetic history) degrades into the warnings
//! list while the pipeline runs to completion. The purpose of the engine is
//! the best available reconstruction, not a demand for perfect data.
//!
//! The whole run is a pure function of its inputs: identical transactions,
//! holdings and price/FX snapshots always produce an identical report.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cash;
use crate::currency::FxBook;
use crate::fifo;
use crate::models::{
    ClosedTrade, ExternalFlow, Holding, IncomeRecord, NavPoint, NormalizedEvent, OpenLot,
    SyntheticPosition,
};
use crate::nav;
use crate::performance::{self, PeriodReturn};
use crate::quotes::PriceBook;
use crate::timeline;

/// Coverage below this share of history-backed positions gets flagged
const LOW_COVERAGE_THRESHOLD: f64 = 0.5;

/// Terminal analysis failure
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("nothing to analyze: no transaction history and no current holdings")]
    NoData,
}

/// Everything the engine needs for one run. Prices and FX rates are
/// supplied up front, batched once per unique symbol/currency across the
/// full date range. The engine performs no I/O of its own.
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    /// Normalized trade events (see [`crate::classify::normalize_events`])
    pub trades: Vec<NormalizedEvent>,
    pub incomes: Vec<IncomeRecord>,
    /// Current-holdings snapshot from the brokerage side
    pub holdings: Vec<Holding>,
    pub prices: PriceBook,
    pub fx: FxBook,
    /// Analysis window end (valuation date)
    pub end_date: NaiveDate,
}

/// The reconstructed performance record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub reporting_currency: String,
    pub inception: NaiveDate,
    pub end_date: NaiveDate,
    /// Monthly Modified Dietz return series
    pub monthly_returns: Vec<PeriodReturn>,
    pub cumulative_return: f64,
    pub annualized_return: f64,
    pub nav_series: Vec<NavPoint>,
    pub external_flows: Vec<ExternalFlow>,
    pub closed_trades: Vec<ClosedTrade>,
    /// Total realized P&L in the reporting currency
    pub realized_pnl: f64,
    /// Open lots (observed and synthetic) against latest prices,
    /// in the reporting currency
    pub unrealized_pnl: f64,
    pub open_lots: Vec<OpenLot>,
    /// Income per symbol (per source for account-level income),
    /// in the reporting currency
    pub income_breakdown: BTreeMap<String, f64>,
    pub total_income: f64,
    pub synthetic_positions: Vec<SyntheticPosition>,
    /// Share of position buckets backed by real history, 0.0–1.0
    pub coverage: f64,
    pub warnings: Vec<String>,
}

/// Run the full reconstruction.
pub fn analyze(input: &AnalysisInput) -> Result<AnalysisReport, AnalysisError> {
    let mut warnings: Vec<String> = Vec::new();

    let mut trades = input.trades.clone();
    trades.sort_by_key(|e| e.date);

    let holdings = sanitize_holdings(&input.holdings, &mut warnings);

    let has_trades = trades.iter().any(|e| e.instrument_class.is_tracked());
    if !has_trades && holdings.is_empty() {
        return Err(AnalysisError::NoData);
    }

    let inception = match trades
        .iter()
        .filter(|e| e.instrument_class.is_tracked())
        .map(|e| e.date)
        .min()
    {
        Some(first) => first,
        None => {
            let fallback = input
                .end_date
                .checked_sub_months(Months::new(12))
                .unwrap_or(input.end_date);
            let warning = format!(
                "No transaction history; analyzing current holdings only with inception defaulted to {}",
                fallback
            );
            log::warn!("{}", warning);
            warnings.push(warning);
            fallback
        }
    };
    let end_date = input.end_date.max(inception);

    // 1. Lot matching
    let lots = fifo::match_lots(&trades);

    // 2. Position timeline with synthetic backfill
    let timeline = timeline::build_timeline(
        &trades,
        &lots.incomplete_trades,
        &holdings,
        &input.prices,
        inception,
    );
    warnings.extend(timeline.warnings.iter().cloned());

    // 3. Cash ledger and external flows
    let cash = cash::replay(&trades, &input.incomes);
    warnings.extend(cash.warnings.iter().cloned());

    // 4. NAV series at month-end boundaries
    let boundaries = nav::period_boundaries(inception, end_date);
    let nav = nav::build_nav(&timeline, &cash, &input.prices, &input.fx, &boundaries);
    warnings.extend(nav.warnings.iter().cloned());

    // 5. Modified Dietz returns
    let returns = performance::modified_dietz(&nav.points, &cash.external_flows);
    warnings.extend(returns.warnings.iter().cloned());

    // 6. P&L and income in the reporting currency
    let realized_pnl = realized_in_reporting(&lots.closed_trades, &input.fx, &mut warnings);

    let mut open_lots = lots.open_lots.clone();
    open_lots.extend(timeline.synthetic_lots.iter().cloned());
    let unrealized_pnl =
        unrealized_in_reporting(&open_lots, &input.prices, &input.fx, &mut warnings);

    let (income_breakdown, total_income) =
        income_in_reporting(&trades, &input.incomes, &input.fx, &mut warnings);

    // 7. Coverage
    let total_buckets = timeline.keys().count();
    let backed_buckets = timeline
        .keys()
        .filter(|key| timeline.is_backed_by_history(key))
        .count();
    let coverage = if total_buckets == 0 {
        1.0
    } else {
        backed_buckets as f64 / total_buckets as f64
    };
    if coverage < LOW_COVERAGE_THRESHOLD {
        let warning = format!(
            "Only {:.0}% of positions are backed by observed history; results lean on synthetic entries",
            coverage * 100.0
        );
        log::warn!("{}", warning);
        warnings.push(warning);
    }

    Ok(AnalysisReport {
        reporting_currency: input.fx.reporting_currency().to_string(),
        inception,
        end_date,
        monthly_returns: returns.periods,
        cumulative_return: returns.cumulative_return,
        annualized_return: returns.annualized_return,
        nav_series: nav.points,
        external_flows: cash.external_flows,
        closed_trades: lots.closed_trades,
        realized_pnl,
        unrealized_pnl,
        open_lots,
        income_breakdown,
        total_income,
        synthetic_positions: timeline.synthetic_positions,
        coverage,
        warnings,
    })
}

/// Drop holdings the engine cannot represent. A negative holding whose
/// symbol is itself a currency code is margin debt against the cash-proxy
/// instrument; merging it into cash was rejected upstream over
/// cross-currency risk, so it is dropped with a warning instead.
fn sanitize_holdings(holdings: &[Holding], warnings: &mut Vec<String>) -> Vec<Holding> {
    let mut kept = Vec::with_capacity(holdings.len());
    for holding in holdings {
        if holding.quantity >= 0.0 {
            kept.push(holding.clone());
            continue;
        }

        let key = &holding.exposure_key;
        let warning = if is_currency_symbol(&key.symbol) {
            format!(
                "Dropping margin debt of {:.2} against cash proxy {}; not merged into the cash ledger",
                holding.quantity, key.symbol
            )
        } else {
            format!(
                "Dropping negative holding of {:.4} in {}; quantities must be non-negative",
                holding.quantity, key
            )
        };
        log::warn!("{}", warning);
        warnings.push(warning);
    }
    kept
}

fn is_currency_symbol(symbol: &str) -> bool {
    symbol.len() == 3 && symbol.chars().all(|c| c.is_ascii_uppercase())
}

/// Sum realized P&L converted at each trade's exit date
fn realized_in_reporting(
    closed_trades: &[ClosedTrade],
    fx: &FxBook,
    warnings: &mut Vec<String>,
) -> f64 {
    let mut warned: BTreeSet<String> = BTreeSet::new();
    let mut total = 0.0;
    for trade in closed_trades {
        let currency = &trade.exposure_key.currency;
        total += match fx.convert(trade.realized_pnl, currency, trade.exit_date) {
            Ok(amount) => amount,
            Err(err) => {
                if warned.insert(currency.clone()) {
                    let warning = format!("{}; realized P&L kept at face value", err);
                    log::warn!("{}", warning);
                    warnings.push(warning);
                }
                trade.realized_pnl
            }
        };
    }
    total
}

/// Open lots (observed and synthetic) against the latest available price
fn unrealized_in_reporting(
    open_lots: &[OpenLot],
    prices: &PriceBook,
    fx: &FxBook,
    warnings: &mut Vec<String>,
) -> f64 {
    let mut warned_prices: BTreeSet<String> = BTreeSet::new();
    let mut warned_fx: BTreeSet<String> = BTreeSet::new();
    let mut total = 0.0;

    for lot in open_lots {
        let key = &lot.exposure_key;
        let Some(price) = prices.latest(&key.symbol) else {
            if warned_prices.insert(key.symbol.clone()) {
                let warning = format!(
                    "No current price for {}; unrealized P&L for it is omitted",
                    key.symbol
                );
                log::warn!("{}", warning);
                warnings.push(warning);
            }
            continue;
        };

        let native = key.sign() * (price - lot.entry_price) * lot.remaining_quantity;
        total += match fx.rate_latest(&key.currency) {
            Ok(rate) => native * rate,
            Err(err) => {
                if warned_fx.insert(key.currency.clone()) {
                    let warning = format!("{}; falling back to rate 1.0", err);
                    log::warn!("{}", warning);
                    warnings.push(warning);
                }
                native
            }
        };
    }
    total
}

/// Income per symbol in the reporting currency, converted at event date.
/// Account-level income without a symbol is keyed by its source.
fn income_in_reporting(
    trades: &[NormalizedEvent],
    incomes: &[IncomeRecord],
    fx: &FxBook,
    warnings: &mut Vec<String>,
) -> (BTreeMap<String, f64>, f64) {
    let mut warned: BTreeSet<String> = BTreeSet::new();
    let mut breakdown: BTreeMap<String, f64> = BTreeMap::new();
    let mut total = 0.0;

    let mut add = |symbol: &str, source: &str, amount: f64, currency: &str, date: NaiveDate| {
        let converted = match fx.convert(amount, currency, date) {
            Ok(converted) => converted,
            Err(err) => {
                if warned.insert(currency.to_string()) {
                    let warning = format!("{}; income kept at face value", err);
                    log::warn!("{}", warning);
                    warnings.push(warning);
                }
                amount
            }
        };
        let key = if symbol.is_empty() { source } else { symbol };
        *breakdown.entry(key.to_string()).or_insert(0.0) += converted;
        total += converted;
    };

    for event in trades {
        if event.kind == crate::models::EventKind::Income && event.instrument_class.is_tracked() {
            add(
                &event.symbol,
                &event.source,
                event.notional(),
                &event.currency,
                event.date,
            );
        }
    }
    for income in incomes {
        add(
            &income.symbol,
            &income.source,
            income.amount,
            &income.currency,
            income.date,
        );
    }

    (breakdown, total)
}
