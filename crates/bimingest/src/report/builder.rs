use std::collections::BTreeSet;

use chrono::Utc;
use thiserror::Error;

use super::types::{
    CatastrophicFailure, ElementError, ProcessingReport, ReportTotals, StageResult,
};
use crate::model::{Outcome, Severity, StageName};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReportError {
    #[error("Report for job '{0}' is already finalized")]
    Finalized(String),

    #[error("Stage '{stage}' recorded after '{last}'")]
    OutOfOrder { stage: StageName, last: StageName },
}

/// Which stages fail the whole job when they report `failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageGating {
    required: BTreeSet<StageName>,
}

impl StageGating {
    pub fn new<I: IntoIterator<Item = StageName>>(required: I) -> Self {
        Self {
            required: required.into_iter().collect(),
        }
    }

    pub fn is_required(&self, stage: StageName) -> bool {
        self.required.contains(&stage)
    }

    pub fn required(&self) -> impl Iterator<Item = StageName> + '_ {
        self.required.iter().copied()
    }
}

impl Default for StageGating {
    fn default() -> Self {
        Self::new(crate::config::schema::default_required_stages())
    }
}

/// Verdict for a set of stage results.
///
/// `failed` on a catastrophic failure or a failed required stage,
/// `partial` on any error-level diagnostic, otherwise `success`.
pub fn compute_verdict(
    catastrophic: bool,
    stages: &[StageResult],
    errors: &[ElementError],
    gating: &StageGating,
) -> Outcome {
    let required_failed = stages
        .iter()
        .any(|s| s.status == Outcome::Failed && gating.is_required(s.stage));

    if catastrophic || required_failed {
        Outcome::Failed
    } else if errors.iter().any(|e| e.severity >= Severity::Error) {
        Outcome::Partial
    } else {
        Outcome::Success
    }
}

/// Accumulates a [`ProcessingReport`] for one job attempt.
#[derive(Debug)]
pub struct ReportBuilder {
    report: ProcessingReport,
    gating: StageGating,
}

impl ReportBuilder {
    pub fn start(
        job_id: impl Into<String>,
        target_id: impl Into<String>,
        attempt: u32,
        gating: StageGating,
    ) -> Self {
        Self {
            report: ProcessingReport {
                job_id: job_id.into(),
                target_id: target_id.into(),
                attempt,
                started_at: Utc::now(),
                completed_at: None,
                duration_ms: None,
                overall_status: None,
                stages: Vec::new(),
                errors: Vec::new(),
                totals: ReportTotals::default(),
                catastrophic_failure: false,
                failure: None,
            },
            gating,
        }
    }

    pub fn gating(&self) -> &StageGating {
        &self.gating
    }

    pub fn report(&self) -> &ProcessingReport {
        &self.report
    }

    pub fn into_report(self) -> ProcessingReport {
        self.report
    }

    pub fn is_finalized(&self) -> bool {
        self.report.is_finalized()
    }

    fn ensure_open(&self) -> Result<(), ReportError> {
        if self.is_finalized() {
            return Err(ReportError::Finalized(self.report.job_id.clone()));
        }
        Ok(())
    }

    pub fn record_stage(&mut self, result: StageResult) -> Result<(), ReportError> {
        self.ensure_open()?;

        if let Some(last) = self.report.stages.last() {
            if result.stage <= last.stage {
                return Err(ReportError::OutOfOrder {
                    stage: result.stage,
                    last: last.stage,
                });
            }
        }

        let totals = &mut self.report.totals;
        totals.processed += result.counts.processed;
        totals.skipped += result.counts.skipped;
        totals.failed += result.counts.failed;
        for error in &result.errors {
            count_severity(totals, error.severity);
        }

        self.report.errors.extend(result.errors.iter().cloned());
        self.report.stages.push(result);
        Ok(())
    }

    /// Marks the job as catastrophically failed. Also appends a critical
    /// diagnostic so the flat error list explains the verdict.
    pub fn record_catastrophic(
        &mut self,
        stage: Option<StageName>,
        summary: impl Into<String>,
        trace: impl Into<String>,
    ) -> Result<(), ReportError> {
        self.ensure_open()?;

        let summary = summary.into();
        let error = ElementError::new(Severity::Critical, stage, summary.clone());
        count_severity(&mut self.report.totals, error.severity);
        self.report.errors.push(error);

        self.report.catastrophic_failure = true;
        self.report.failure = Some(CatastrophicFailure {
            stage,
            summary,
            trace: trace.into(),
        });
        Ok(())
    }

    /// Computes the verdict and freezes the report. Repeated calls return
    /// the first verdict without touching the report.
    pub fn finalize(&mut self) -> Outcome {
        if let Some(status) = self.report.overall_status {
            return status;
        }

        let status = compute_verdict(
            self.report.catastrophic_failure,
            &self.report.stages,
            &self.report.errors,
            &self.gating,
        );

        let completed_at = Utc::now();
        let duration = completed_at - self.report.started_at;
        self.report.completed_at = Some(completed_at);
        self.report.duration_ms = Some(duration.num_milliseconds().max(0) as u64);
        self.report.overall_status = Some(status);
        status
    }
}

fn count_severity(totals: &mut ReportTotals, severity: Severity) {
    match severity {
        Severity::Warning => totals.warnings += 1,
        Severity::Error => totals.errors += 1,
        Severity::Critical => totals.critical += 1,
    }
}
