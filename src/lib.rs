//! portfolio-replay reconstructs the realized performance of an investment
//! portfolio from raw transaction and income history.
//!
//! Unlike a backtest of a static allocation, this engine replays what
//! actually happened: it matches trade entries to exits (FIFO), rebuilds the
//! position history, derives a cash ledger that was never explicitly
//! recorded, infers external capital injections from that ledger, and turns
//! the resulting NAV series into a monthly Modified Dietz return series.
//!
//! The engine is a deterministic, single-pass batch computation. All I/O is
//! the caller's job: prices and FX rates arrive pre-fetched in caller-owned
//! [`quotes::PriceBook`] and [`currency::FxBook`] objects, batched once per
//! symbol/currency across the whole date range. Re-running with identical
//! inputs yields an identical report.
//!
//! ```no_run
//! use portfolio_replay::analysis::{analyze, AnalysisInput};
//! use portfolio_replay::currency::FxBook;
//! use portfolio_replay::quotes::PriceBook;
//!
//! let input = AnalysisInput {
//!     trades: vec![],
//!     incomes: vec![],
//!     holdings: vec![],
//!     prices: PriceBook::new(),
//!     fx: FxBook::new("USD"),
//!     end_date: chrono::NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
//! };
//! let report = analyze(&input)?;
//! println!("cumulative return: {:.2}%", report.cumulative_return * 100.0);
//! # Ok::<(), portfolio_replay::analysis::AnalysisError>(())
//! ```

pub mod analysis;
pub mod cash;
pub mod classify;
pub mod currency;
pub mod fifo;
pub mod models;
pub mod nav;
pub mod performance;
pub mod quotes;
pub mod timeline;

pub use analysis::{analyze, AnalysisError, AnalysisInput, AnalysisReport};
pub use models::{
    ClosedTrade, Direction, EventKind, ExposureKey, ExternalFlow, Holding, IncomeRecord,
    IncompleteTrade, InstrumentClass, NavPoint, NormalizedEvent, OpenLot, SyntheticPosition,
};
