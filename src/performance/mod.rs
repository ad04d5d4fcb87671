//! Periodic return calculation (Modified Dietz)
//!
//! Converts the NAV series and the detected external inflows into a
//! time-weighted periodic return series.
//!
//! ## Modified Dietz formula
//!
//! For period `i` with `D` days, flows `CF` at 0-indexed day-of-period `d`:
//!
//! ```text
//! W          = (D − d) / D
//! V_adjusted = V_start + Σ(CF × W)
//! r_i        = (V_end − V_start − Σ CF) / V_adjusted
//! ```
//!
//! `V_start == 0` (first period, or after full liquidation) degenerates to
//! gain on invested capital: the weighted flows alone form the denominator.
//! A non-positive adjusted base makes the ratio meaningless, so the period
//! is skipped (return 0) with a warning; rare, since detected flows are
//! always ≥ 0 by construction.
//!
//! ## Chaining
//!
//! The monthly returns are chained geometrically and annualized:
//!
//! ```text
//! cumulative = ∏(1 + r_i) − 1
//! annualized = (1 + cumulative)^(365/days) − 1
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{ExternalFlow, NavPoint};

const EPSILON: f64 = 1e-9;

/// Return of one period between consecutive NAV boundaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodReturn {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_value: f64,
    pub end_value: f64,
    /// Total external inflow detected within the period
    pub external_flow: f64,
    /// Return as decimal (0.1 = 10%)
    pub return_rate: f64,
}

/// Periodic return series with chained totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnSeries {
    pub periods: Vec<PeriodReturn>,
    /// ∏(1 + r_i) − 1 over all periods
    pub cumulative_return: f64,
    /// Annualized cumulative return
    pub annualized_return: f64,
    pub warnings: Vec<String>,
}

/// Compute the Modified Dietz return series over consecutive NAV points.
///
/// Flows dated after a period's start boundary and up to its end boundary
/// belong to that period; the day after the start boundary is day 0.
pub fn modified_dietz(nav: &[NavPoint], flows: &[ExternalFlow]) -> ReturnSeries {
    let mut series = ReturnSeries::default();
    if nav.len() < 2 {
        return series;
    }

    let mut cumulative = 1.0;

    for window in nav.windows(2) {
        let start = &window[0];
        let end = &window[1];
        let days = (end.date - start.date).num_days();
        if days <= 0 {
            continue;
        }

        let mut flow_sum = 0.0;
        let mut weighted_sum = 0.0;
        for flow in flows {
            if flow.date <= start.date || flow.date > end.date {
                continue;
            }
            let day = (flow.date - start.date).num_days() - 1; // 0-indexed
            let weight = (days - day) as f64 / days as f64;
            flow_sum += flow.amount;
            weighted_sum += flow.amount * weight;
        }

        let adjusted = start.value + weighted_sum;
        let return_rate = if adjusted > EPSILON {
            (end.value - start.value - flow_sum) / adjusted
        } else {
            // Nothing invested and nothing flowed in: a genuinely empty
            // period, silently flat. Anything else is a skip worth flagging.
            if end.value.abs() > EPSILON || flow_sum.abs() > EPSILON {
                let warning = format!(
                    "Period {} – {} skipped: non-positive adjusted base ({:.2})",
                    start.date, end.date, adjusted
                );
                log::warn!("{}", warning);
                series.warnings.push(warning);
            }
            0.0
        };

        cumulative *= 1.0 + return_rate;

        log::debug!(
            "Dietz period {} – {}: start={:.2}, end={:.2}, cf={:.2}, return={:.4}%",
            start.date,
            end.date,
            start.value,
            end.value,
            flow_sum,
            return_rate * 100.0
        );

        series.periods.push(PeriodReturn {
            start_date: start.date,
            end_date: end.date,
            start_value: start.value,
            end_value: end.value,
            external_flow: flow_sum,
            return_rate,
        });
    }

    series.cumulative_return = cumulative - 1.0;

    let total_days = (nav[nav.len() - 1].date - nav[0].date).num_days();
    series.annualized_return = if total_days > 0 && series.cumulative_return > -1.0 {
        (1.0 + series.cumulative_return).powf(365.0 / total_days as f64) - 1.0
    } else {
        0.0
    };

    series
}
