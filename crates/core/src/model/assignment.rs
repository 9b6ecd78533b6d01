use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::aggregate::FormationAggregate;
use crate::model::ids::{AssignmentId, FormationId, UserId};

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AssignmentError {
    #[error("unknown assignment status: {0}")]
    UnknownStatus(String),
}

//
// ─── STATUS ───────────────────────────────────────────────────────────────────
//

/// Lifecycle of a user/formation assignment.
///
/// `Overdue` is never persisted as ground truth: it is an overlay computed at
/// read time on top of `NotStarted` / `InProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentStatus {
    NotStarted,
    InProgress,
    Completed,
    Overdue,
}

/// What to do when a recompute drops a completed assignment below 100%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegressionPolicy {
    /// `Completed` is terminal.
    #[default]
    KeepCompleted,
    /// A completed assignment whose aggregate falls below 100% goes back to `InProgress`.
    Reopen,
}

impl AssignmentStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentStatus::NotStarted => "NOT_STARTED",
            AssignmentStatus::InProgress => "IN_PROGRESS",
            AssignmentStatus::Completed => "COMPLETED",
            AssignmentStatus::Overdue => "OVERDUE",
        }
    }

    /// Next persisted status after a fresh aggregate for the pair.
    ///
    /// `lesson_accessed` is true when the caller observed a lesson-access
    /// event, which starts the assignment even at 0%.
    #[must_use]
    pub fn advance(
        self,
        aggregate: &FormationAggregate,
        lesson_accessed: bool,
        policy: RegressionPolicy,
    ) -> AssignmentStatus {
        let started = lesson_accessed || aggregate.is_started();
        match self {
            AssignmentStatus::Completed => match policy {
                RegressionPolicy::Reopen if !aggregate.is_complete() => {
                    AssignmentStatus::InProgress
                }
                _ => AssignmentStatus::Completed,
            },
            _ if aggregate.is_complete() => AssignmentStatus::Completed,
            AssignmentStatus::InProgress => AssignmentStatus::InProgress,
            AssignmentStatus::NotStarted | AssignmentStatus::Overdue => {
                if started {
                    AssignmentStatus::InProgress
                } else {
                    AssignmentStatus::NotStarted
                }
            }
        }
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignmentStatus {
    type Err = AssignmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_STARTED" => Ok(AssignmentStatus::NotStarted),
            "IN_PROGRESS" => Ok(AssignmentStatus::InProgress),
            "COMPLETED" => Ok(AssignmentStatus::Completed),
            "OVERDUE" => Ok(AssignmentStatus::Overdue),
            other => Err(AssignmentError::UnknownStatus(other.to_owned())),
        }
    }
}

//
// ─── ASSIGNMENT ───────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub user_id: UserId,
    pub formation_id: FormationId,
    pub assigned_at: DateTime<Utc>,
    pub due_at: Option<DateTime<Utc>>,
    pub status: AssignmentStatus,
}

impl Assignment {
    #[must_use]
    pub fn is_past_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at.is_some_and(|due| due < now)
    }

    /// Status as reported to readers: the persisted lifecycle with the
    /// overdue overlay applied. A completed assignment is never overdue.
    #[must_use]
    pub fn status_at(&self, now: DateTime<Utc>) -> AssignmentStatus {
        // legacy rows may carry OVERDUE; it is recomputed, not trusted
        let lifecycle = match self.status {
            AssignmentStatus::Overdue => AssignmentStatus::NotStarted,
            other => other,
        };
        match lifecycle {
            AssignmentStatus::Completed => AssignmentStatus::Completed,
            _ if self.is_past_due(now) => AssignmentStatus::Overdue,
            other => other,
        }
    }
}
