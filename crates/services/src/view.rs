use serde::{Deserialize, Serialize};

use lms_core::model::{AssignmentStatus, FormationAggregate, FormationId, LessonDetail, UserId};

/// Formation progress as served to the API layer and cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormationProgressView {
    pub user_id: UserId,
    pub formation_id: FormationId,
    pub aggregate: f64,
    pub total_lessons: usize,
    pub completed_lessons: usize,
    pub lessons: Vec<LessonDetail>,
}

impl From<FormationAggregate> for FormationProgressView {
    fn from(aggregate: FormationAggregate) -> Self {
        Self {
            user_id: aggregate.user_id,
            formation_id: aggregate.formation_id,
            aggregate: aggregate.percentage,
            total_lessons: aggregate.total_lessons,
            completed_lessons: aggregate.completed_lessons,
            lessons: aggregate.lessons,
        }
    }
}

/// Result of recording one lesson update.
///
/// `degraded` is set when the update was persisted but the aggregate or the
/// assignment status could not be refreshed. A failed recompute reports an
/// aggregate of 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedProgress {
    pub aggregate: FormationProgressView,
    pub status: Option<AssignmentStatus>,
    pub degraded: bool,
}
