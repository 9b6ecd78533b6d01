use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{FormationId, LessonId, UserId};
use crate::model::progress::{LessonProgress, round_to_hundredths};

/// One catalog lesson as seen by a learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonDetail {
    pub lesson_id: LessonId,
    pub percentage: f64,
    pub completed: bool,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

/// Formation-level progress for one learner, derived from lesson rows.
///
/// Never stored; always recomputed from the current `LessonProgress` state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormationAggregate {
    pub user_id: UserId,
    pub formation_id: FormationId,
    pub percentage: f64,
    pub total_lessons: usize,
    pub completed_lessons: usize,
    pub lessons: Vec<LessonDetail>,
}

impl FormationAggregate {
    /// Compute the aggregate over the formation's ordered lesson set.
    ///
    /// - An empty lesson set yields 0.
    /// - Unvisited lessons contribute 0 and stay in the denominator.
    /// - Completed rows contribute 100; other rows their clamped percentage.
    /// - Rows for other formations or for lessons outside the set are ignored.
    #[must_use]
    pub fn compute(
        user_id: UserId,
        formation_id: FormationId,
        lesson_ids: &[LessonId],
        progress: &[LessonProgress],
    ) -> Self {
        let mut by_lesson: HashMap<LessonId, &LessonProgress> = HashMap::new();
        for row in progress
            .iter()
            .filter(|p| p.user_id == user_id && p.formation_id == formation_id)
        {
            by_lesson
                .entry(row.lesson_id)
                .and_modify(|current| {
                    if row.last_accessed_at > current.last_accessed_at {
                        *current = row;
                    }
                })
                .or_insert(row);
        }

        let mut lessons = Vec::with_capacity(lesson_ids.len());
        let mut sum = 0.0;
        let mut completed_lessons = 0;

        for lesson_id in lesson_ids {
            let detail = match by_lesson.get(lesson_id) {
                Some(row) => LessonDetail {
                    lesson_id: *lesson_id,
                    percentage: row.effective_percentage(),
                    completed: row.is_complete(),
                    last_accessed_at: Some(row.last_accessed_at),
                },
                None => LessonDetail {
                    lesson_id: *lesson_id,
                    percentage: 0.0,
                    completed: false,
                    last_accessed_at: None,
                },
            };
            sum += detail.percentage;
            if detail.completed {
                completed_lessons += 1;
            }
            lessons.push(detail);
        }

        // Lesson counts are tiny compared to f64's exact integer range.
        #[allow(clippy::cast_precision_loss)]
        let percentage = if lessons.is_empty() {
            0.0
        } else {
            round_to_hundredths(sum / lessons.len() as f64)
        };

        Self {
            user_id,
            formation_id,
            percentage,
            total_lessons: lessons.len(),
            completed_lessons,
            lessons,
        }
    }

    /// Aggregate for a formation nobody has touched yet.
    #[must_use]
    pub fn empty(user_id: UserId, formation_id: FormationId) -> Self {
        Self::compute(user_id, formation_id, &[], &[])
    }

    /// Every lesson is completed.
    ///
    /// Judged per lesson, not from the rounded `percentage`: a formation whose
    /// mean rounds up to 100.0 while one lesson sits at 99.99 is not complete.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.total_lessons > 0 && self.completed_lessons == self.total_lessons
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.percentage > 0.0 || self.lessons.iter().any(|l| l.last_accessed_at.is_some())
    }
}
