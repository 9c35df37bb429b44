use crate::model::{Outcome, StageName};

/// Events emitted by the pipeline while a job runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    StageStarted {
        stage: StageName,
        index: usize,
        total: usize,
    },
    StageCompleted {
        stage: StageName,
        status: Outcome,
    },
    Finished {
        status: Outcome,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}
