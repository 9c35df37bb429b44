//! Per-job processing reports.

mod builder;
mod types;

pub use builder::{compute_verdict, ReportBuilder, ReportError, StageGating};
pub use types::{
    CatastrophicFailure, ElementError, ProcessingReport, ReportTotals, StageCounts, StageResult,
};
