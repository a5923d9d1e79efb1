//! Consistency audit across the tiers of one tenant.
//!
//! [`ConsistencyChecker`] walks the cache, primary and backup tiers,
//! recomputes content hashes and streams a JSON report of every blob it
//! visits through a [`ReportWriter`].

mod checker;
pub mod report;

pub use checker::{CheckSummary, ConsistencyChecker};
pub use report::{CheckResultLine, ReportWriter, Section};
