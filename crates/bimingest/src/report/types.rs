use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Outcome, Severity, StageName};

/// A diagnostic attached to a stage, usually naming a single element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementError {
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_type: Option<String>,
    /// `None` when the error arose before any stage ran.
    pub stage: Option<StageName>,
}

impl ElementError {
    pub fn new(severity: Severity, stage: Option<StageName>, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            global_id: None,
            element_type: None,
            stage,
        }
    }

    pub fn with_element(mut self, global_id: Option<String>, element_type: Option<String>) -> Self {
        self.global_id = global_id;
        self.element_type = element_type;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageName,
    pub status: Outcome,
    pub duration_ms: u64,
    pub counts: StageCounts,
    pub message: String,
    pub errors: Vec<ElementError>,
}

impl StageResult {
    /// Builds a result, deriving its status from counts and errors.
    ///
    /// A stage that failed every entity it touched is `failed`; any failed
    /// entity or error-level diagnostic makes it `partial`.
    pub fn from_counts(
        stage: StageName,
        counts: StageCounts,
        errors: Vec<ElementError>,
        duration_ms: u64,
    ) -> Self {
        let status = if counts.failed > 0 && counts.processed == 0 {
            Outcome::Failed
        } else if counts.failed > 0 || errors.iter().any(|e| e.severity >= Severity::Error) {
            Outcome::Partial
        } else {
            Outcome::Success
        };

        let message = format!(
            "{} processed, {} skipped, {} failed",
            counts.processed, counts.skipped, counts.failed
        );

        Self {
            stage,
            status,
            duration_ms,
            counts,
            message,
            errors,
        }
    }

    /// Result for a stage aborted by a structural failure.
    pub fn aborted(
        stage: StageName,
        counts: StageCounts,
        errors: Vec<ElementError>,
        duration_ms: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            status: Outcome::Failed,
            duration_ms,
            counts,
            message: message.into(),
            errors,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTotals {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub warnings: usize,
    pub errors: usize,
    pub critical: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatastrophicFailure {
    /// `None` when the model could not be opened.
    pub stage: Option<StageName>,
    pub summary: String,
    pub trace: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingReport {
    pub job_id: String,
    pub target_id: String,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    /// Set by finalization.
    pub overall_status: Option<Outcome>,
    pub stages: Vec<StageResult>,
    pub errors: Vec<ElementError>,
    pub totals: ReportTotals,
    pub catastrophic_failure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<CatastrophicFailure>,
}

impl ProcessingReport {
    pub fn stage(&self, stage: StageName) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn is_finalized(&self) -> bool {
        self.overall_status.is_some()
    }

    pub fn has_critical(&self) -> bool {
        self.errors.iter().any(|e| e.severity == Severity::Critical)
    }

    /// Whether every pipeline stage produced a result.
    pub fn ran_all_stages(&self) -> bool {
        StageName::ALL.iter().all(|s| self.stage(*s).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(processed: usize, failed: usize) -> StageCounts {
        StageCounts {
            processed,
            skipped: 0,
            failed,
        }
    }

    #[test]
    fn test_stage_status_rules() {
        let ok = StageResult::from_counts(StageName::Types, counts(5, 0), vec![], 1);
        assert_eq!(ok.status, Outcome::Success);

        let partial = StageResult::from_counts(StageName::Types, counts(4, 1), vec![], 1);
        assert_eq!(partial.status, Outcome::Partial);

        let failed = StageResult::from_counts(StageName::Types, counts(0, 3), vec![], 1);
        assert_eq!(failed.status, Outcome::Failed);
    }

    #[test]
    fn test_warnings_do_not_degrade_stage() {
        let warning = ElementError::new(Severity::Warning, Some(StageName::Materials), "no name");
        let result =
            StageResult::from_counts(StageName::Materials, counts(2, 0), vec![warning], 1);
        assert_eq!(result.status, Outcome::Success);
    }

    #[test]
    fn test_empty_stage_is_success() {
        let result = StageResult::from_counts(StageName::Systems, counts(0, 0), vec![], 0);
        assert_eq!(result.status, Outcome::Success);
    }
}
