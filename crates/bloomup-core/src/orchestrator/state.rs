//! Workflow states for a redesign attempt.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::presets::StylePreset;

use super::{RedesignError, RedesignResult};

/// Identifies one attempt from `start` to its terminal state.
pub type AttemptId = Uuid;

/// The plain discriminant of [`WorkflowState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl WorkflowStatus {
    /// Check whether `from -> to` is an edge in the workflow graph:
    ///
    /// ```text
    /// idle      -> running    (start)
    /// failed    -> running    (retry from the top)
    /// running   -> running    (new start orphans the in-flight attempt)
    /// running   -> succeeded
    /// running   -> failed
    /// idle      -> failed     (start refused by the quota gate)
    /// failed    -> failed     (retry refused by the quota gate)
    /// running   -> idle       (reset)
    /// succeeded -> idle       (reset)
    /// failed    -> idle       (reset)
    /// ```
    pub fn is_valid_transition(from: Self, to: Self) -> bool {
        matches!(
            (from, to),
            (Self::Idle, Self::Running)
                | (Self::Failed, Self::Running)
                | (Self::Running, Self::Running)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
                | (Self::Idle, Self::Failed)
                | (Self::Failed, Self::Failed)
                | (Self::Running, Self::Idle)
                | (Self::Succeeded, Self::Idle)
                | (Self::Failed, Self::Idle)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for WorkflowStatus {
    type Err = WorkflowStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(WorkflowStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`WorkflowStatus`] string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid workflow status: {0:?}")]
pub struct WorkflowStatusParseError(pub String);

/// The observable state of the orchestrator.
///
/// A [`RedesignResult`] is only reachable through `Succeeded`, so callers
/// cannot read a partially built result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkflowState {
    Idle,
    Running {
        attempt: AttemptId,
        style: StylePreset,
    },
    Succeeded {
        attempt: AttemptId,
        result: Arc<RedesignResult>,
    },
    Failed {
        attempt: AttemptId,
        error: RedesignError,
    },
}

impl WorkflowState {
    pub fn status(&self) -> WorkflowStatus {
        match self {
            Self::Idle => WorkflowStatus::Idle,
            Self::Running { .. } => WorkflowStatus::Running,
            Self::Succeeded { .. } => WorkflowStatus::Succeeded,
            Self::Failed { .. } => WorkflowStatus::Failed,
        }
    }

    /// The attempt this state belongs to, if any.
    pub fn attempt(&self) -> Option<AttemptId> {
        match self {
            Self::Idle => None,
            Self::Running { attempt, .. }
            | Self::Succeeded { attempt, .. }
            | Self::Failed { attempt, .. } => Some(*attempt),
        }
    }

    pub fn result(&self) -> Option<&Arc<RedesignResult>> {
        match self {
            Self::Succeeded { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&RedesignError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}
