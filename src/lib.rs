//! Inter-reader comparison of cardiac MR contour annotations.
//!
//! Two readers' annotations of the same study are paired into a
//! [`comparison::CaseComparison`], seen through one clinical [`case::View`].
//! The [`comparison::Analyzer`] builds a per-slice table of geometric
//! agreement metrics, [`case::ClinicalResult`]s derive volumes, masses and
//! phases per reader, and [`stats`] aggregates a cohort of comparisons.

pub mod case;
pub mod comparison;
pub mod error;
pub mod geometry;
pub mod io;
pub mod metrics;
pub mod stats;

#[cfg(test)]
mod utils;

pub use case::{apply_view, view_by_name, Case, View, ViewedCase};
pub use comparison::{Analyzer, CaseComparison, SliceComparison};
pub use error::CompareError;
pub use io::config::AnalysisConfig;
pub use stats::{compute_cohort_statistics, CohortJob, CohortReport};
