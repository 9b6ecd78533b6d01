use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{FormationId, LessonId, UserId};

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("percentage must be a finite number, got {0}")]
    NonFinite(f64),
}

//
// ─── PERCENTAGE HELPERS ───────────────────────────────────────────────────────
//

/// Clamp a stored percentage into `[0, 100]`. `NaN` is treated as 0.
#[must_use]
pub fn clamp_percentage(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

#[must_use]
pub fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

//
// ─── UPDATE ───────────────────────────────────────────────────────────────────
//

/// A validated lesson-level progress report coming from a learner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    user_id: UserId,
    lesson_id: LessonId,
    percentage: f64,
    completed: bool,
}

impl ProgressUpdate {
    /// Out-of-range finite values are kept as reported; aggregation clamps them.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::NonFinite` for `NaN` or infinite percentages.
    pub fn new(
        user_id: UserId,
        lesson_id: LessonId,
        percentage: f64,
        completed: bool,
    ) -> Result<Self, ProgressError> {
        if !percentage.is_finite() {
            return Err(ProgressError::NonFinite(percentage));
        }
        Ok(Self {
            user_id,
            lesson_id,
            percentage: round_to_hundredths(percentage),
            completed,
        })
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn lesson_id(&self) -> LessonId {
        self.lesson_id
    }

    #[must_use]
    pub fn percentage(&self) -> f64 {
        self.percentage
    }

    #[must_use]
    pub fn completed(&self) -> bool {
        self.completed
    }
}

//
// ─── LESSON PROGRESS ──────────────────────────────────────────────────────────
//

/// Per-user, per-lesson progress row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonProgress {
    pub user_id: UserId,
    pub lesson_id: LessonId,
    pub formation_id: FormationId,
    pub percentage: f64,
    pub completed: bool,
    pub first_accessed_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl LessonProgress {
    /// Apply a report on top of the existing row (if any). Last write wins.
    ///
    /// `first_accessed_at` is kept from the existing row, `completed_at` is
    /// stamped on the first completed report and cleared when a report
    /// marks the lesson as not completed.
    #[must_use]
    pub fn merged(
        existing: Option<&LessonProgress>,
        formation_id: FormationId,
        update: &ProgressUpdate,
        at: DateTime<Utc>,
    ) -> Self {
        let first_accessed_at = existing.map_or(at, |p| p.first_accessed_at);
        let completed_at = if update.completed() {
            existing.and_then(|p| p.completed_at).or(Some(at))
        } else {
            None
        };

        Self {
            user_id: update.user_id(),
            lesson_id: update.lesson_id(),
            formation_id,
            percentage: update.percentage(),
            completed: update.completed(),
            first_accessed_at,
            last_accessed_at: at,
            completed_at,
        }
    }

    /// Contribution of this row to the formation aggregate.
    #[must_use]
    pub fn effective_percentage(&self) -> f64 {
        if self.completed {
            100.0
        } else {
            clamp_percentage(self.percentage)
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.effective_percentage() >= 100.0
    }
}
