//! Event payloads emitted during a build.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AttemptId, CorrelationId, JobId};

/// What happened.
///
/// Stage and status values are carried as strings so consumers never
/// need this crate's internal enums to decode a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildEventKind {
    StageStarted {
        stage: String,
        attempt: u32,
    },
    StageEnded {
        stage: String,
        attempt: u32,
        outcome: String,
    },
    AttemptStarted {
        attempt_id: AttemptId,
        attempt: u32,
    },
    AttemptEnded {
        attempt_id: AttemptId,
        attempt: u32,
        validated: bool,
    },
    Terminal {
        status: String,
    },
    Diagnostic {
        scope: String,
        message: String,
    },
}

/// One observability event, correlated to its job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEvent {
    pub job_id: JobId,
    pub correlation_id: CorrelationId,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: BuildEventKind,
}

impl BuildEvent {
    #[must_use]
    pub fn new(job_id: JobId, correlation_id: CorrelationId, kind: BuildEventKind) -> Self {
        Self {
            job_id,
            correlation_id,
            at: Utc::now(),
            kind,
        }
    }

    /// Short label for metrics and logs.
    #[must_use]
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            BuildEventKind::StageStarted { .. } => "stage_started",
            BuildEventKind::StageEnded { .. } => "stage_ended",
            BuildEventKind::AttemptStarted { .. } => "attempt_started",
            BuildEventKind::AttemptEnded { .. } => "attempt_ended",
            BuildEventKind::Terminal { .. } => "terminal",
            BuildEventKind::Diagnostic { .. } => "diagnostic",
        }
    }
}

impl fmt::Display for BuildEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            BuildEventKind::StageStarted { stage, attempt } => {
                write!(f, "[{}] stage {stage} started (attempt {attempt})", self.job_id)
            }
            BuildEventKind::StageEnded {
                stage,
                attempt,
                outcome,
            } => write!(
                f,
                "[{}] stage {stage} ended (attempt {attempt}): {outcome}",
                self.job_id
            ),
            BuildEventKind::AttemptStarted { attempt, .. } => {
                write!(f, "[{}] attempt {attempt} started", self.job_id)
            }
            BuildEventKind::AttemptEnded {
                attempt, validated, ..
            } => write!(
                f,
                "[{}] attempt {attempt} ended (validated={validated})",
                self.job_id
            ),
            BuildEventKind::Terminal { status } => {
                write!(f, "[{}] terminal: {status}", self.job_id)
            }
            BuildEventKind::Diagnostic { scope, message } => {
                write!(f, "[{}] {scope}: {message}", self.job_id)
            }
        }
    }
}
