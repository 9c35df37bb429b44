use std::fmt;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::StorageError;
use crate::parser::ParseError;
use crate::pipeline::{CancelReason, PipelineError};

use super::job::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// May succeed on a later attempt.
    Transient,
    /// Will fail again with the same input.
    Structural,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Unavailable,
    Io,
    Contention,
    MalformedInput,
    Catastrophic,
    RequiredStageFailed,
    Cancelled,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Unavailable => "unavailable",
            FailureKind::Io => "io",
            FailureKind::Contention => "contention",
            FailureKind::MalformedInput => "malformed_input",
            FailureKind::Catastrophic => "catastrophic",
            FailureKind::RequiredStageFailed => "required_stage_failed",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            FailureKind::Timeout
            | FailureKind::Unavailable
            | FailureKind::Io
            | FailureKind::Contention => FailureClass::Transient,
            FailureKind::MalformedInput
            | FailureKind::Catastrophic
            | FailureKind::RequiredStageFailed
            | FailureKind::Cancelled
            | FailureKind::Internal => FailureClass::Structural,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified job-level failure.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.class() == FailureClass::Transient
    }

    /// Failure to read or open the model file.
    pub fn from_open(err: &ParseError) -> Self {
        let kind = match err {
            ParseError::Unavailable(_) => FailureKind::Unavailable,
            ParseError::Io { .. } if err.is_transient() => FailureKind::Io,
            ParseError::Malformed(_) => FailureKind::MalformedInput,
            ParseError::Io { .. } | ParseError::Unreadable { .. } => FailureKind::Catastrophic,
        };
        Self::new(kind, err.to_string())
    }

    /// Cancellation observed outside any stage.
    pub fn from_cancel(reason: CancelReason) -> Self {
        Self::new(Self::cancel_kind(reason), reason.to_string())
    }

    fn cancel_kind(reason: CancelReason) -> FailureKind {
        match reason {
            CancelReason::TimedOut => FailureKind::Timeout,
            CancelReason::Cancelled => FailureKind::Cancelled,
        }
    }

    pub fn from_pipeline(err: &PipelineError) -> Self {
        let kind = match err {
            PipelineError::Cancelled { reason, .. } => Self::cancel_kind(*reason),
            PipelineError::Unreadable { source, .. } if source.is_transient() => {
                FailureKind::Unavailable
            }
            PipelineError::Persistence {
                source: StorageError::Database(db),
                ..
            } if db.is_busy() => FailureKind::Contention,
            PipelineError::Persistence { .. } => FailureKind::Internal,
            PipelineError::Unreadable { .. } | PipelineError::MissingLookup { .. } => {
                FailureKind::Catastrophic
            }
            PipelineError::Report(_) => FailureKind::Internal,
        };
        Self::new(kind, err.to_string())
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Retry budget and exponential backoff with a ceiling and jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_delay: Duration::from_millis(config.retry.base_delay_ms),
            max_delay: Duration::from_millis(config.retry.max_delay_ms),
            jitter: Duration::from_millis(config.retry.jitter_ms),
        }
    }

    /// Retry only transient failures, and only while attempts remain.
    pub fn should_retry(&self, failure: &JobFailure, job: &Job) -> bool {
        failure.is_retryable() && job.attempt_count < job.max_attempts
    }

    /// Delay before the attempt following attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        self.base_backoff(attempt) + jitter
    }

    fn base_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StageName;

    fn policy(jitter_ms: u64) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            jitter: Duration::from_millis(jitter_ms),
        }
    }

    #[test]
    fn test_backoff_doubles_up_to_ceiling() {
        let p = policy(0);
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(4), Duration::from_millis(800));
        assert_eq!(p.backoff(5), Duration::from_millis(1000));
        assert_eq!(p.backoff(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_is_bounded() {
        let p = policy(50);
        for _ in 0..100 {
            let delay = p.backoff(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_classification() {
        let timeout = JobFailure::from_pipeline(&PipelineError::Cancelled {
            stage: StageName::ElementsAndGeometry,
            reason: CancelReason::TimedOut,
        });
        assert_eq!(timeout.kind, FailureKind::Timeout);
        assert!(timeout.is_retryable());

        let missing = JobFailure::from_pipeline(&PipelineError::MissingLookup {
            stage: StageName::Properties,
            lookup: "elements",
        });
        assert_eq!(missing.kind, FailureKind::Catastrophic);
        assert!(!missing.is_retryable());

        let malformed = JobFailure::from_open(&ParseError::Malformed("header".into()));
        assert_eq!(malformed.kind, FailureKind::MalformedInput);
        assert!(!malformed.is_retryable());

        let offline = JobFailure::from_open(&ParseError::Unavailable("offline".into()));
        assert!(offline.is_retryable());
    }
}
