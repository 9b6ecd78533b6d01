use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use lms_core::model::{
    Assignment, AssignmentStatus, FormationAggregate, FormationId, RegressionPolicy, UserId,
};
use storage::repository::{AssignmentRepository, NewAssignmentRecord, StorageError};

use crate::Clock;

/// Derives and persists assignment lifecycle status.
///
/// The persisted row only ever holds `NotStarted`, `InProgress` or
/// `Completed`; `Overdue` is applied when the status is read.
#[derive(Clone)]
pub struct AssignmentStatusResolver {
    clock: Clock,
    policy: RegressionPolicy,
    assignments: Arc<dyn AssignmentRepository>,
}

impl AssignmentStatusResolver {
    #[must_use]
    pub fn new(
        clock: Clock,
        policy: RegressionPolicy,
        assignments: Arc<dyn AssignmentRepository>,
    ) -> Self {
        Self {
            clock,
            policy,
            assignments,
        }
    }

    #[must_use]
    pub fn policy(&self) -> RegressionPolicy {
        self.policy
    }

    /// Assign a formation to a user, or move the due date of an existing
    /// assignment. Status is left untouched on re-assignment.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the assignment cannot be stored.
    pub async fn assign(
        &self,
        user_id: UserId,
        formation_id: FormationId,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<Assignment, StorageError> {
        self.assignments
            .upsert_assignment(&NewAssignmentRecord {
                user_id,
                formation_id,
                assigned_at: self.clock.now(),
                due_at,
            })
            .await
    }

    /// Advance the persisted status from a freshly computed aggregate.
    ///
    /// Returns the status as a reader would see it right now, or `None` if
    /// the pair has no assignment.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the assignment cannot be read or updated.
    pub async fn refresh(
        &self,
        aggregate: &FormationAggregate,
        lesson_accessed: bool,
    ) -> Result<Option<AssignmentStatus>, StorageError> {
        let Some(mut assignment) = self
            .assignments
            .find_assignment(aggregate.user_id, aggregate.formation_id)
            .await?
        else {
            return Ok(None);
        };

        let next = assignment
            .status
            .advance(aggregate, lesson_accessed, self.policy);
        if next != assignment.status {
            self.assignments
                .update_assignment_status(assignment.id, next)
                .await?;
            info!(
                assignment_id = %assignment.id,
                user_id = %assignment.user_id,
                formation_id = %assignment.formation_id,
                from = %assignment.status,
                to = %next,
                "assignment status changed"
            );
            assignment.status = next;
        }

        Ok(Some(assignment.status_at(self.clock.now())))
    }

    /// Status of the pair as of now, overdue overlay included.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the assignment cannot be read.
    pub async fn assignment_status(
        &self,
        user_id: UserId,
        formation_id: FormationId,
    ) -> Result<Option<AssignmentStatus>, StorageError> {
        let assignment = self
            .assignments
            .find_assignment(user_id, formation_id)
            .await?;
        Ok(assignment.map(|a| a.status_at(self.clock.now())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;
    use lms_core::model::{LessonId, LessonProgress, ProgressUpdate};
    use lms_core::time::fixed_now;
    use storage::repository::InMemoryRepository;

    const USER: UserId = UserId::new(1);
    const FORMATION: FormationId = FormationId::new(1);

    fn aggregate(done: u64, total: u64) -> FormationAggregate {
        let lessons: Vec<_> = (1..=total).map(LessonId::new).collect();
        let rows: Vec<_> = (1..=done)
            .map(|id| {
                let update = ProgressUpdate::new(USER, LessonId::new(id), 100.0, true).unwrap();
                LessonProgress::merged(None, FORMATION, &update, fixed_now())
            })
            .collect();
        FormationAggregate::compute(USER, FORMATION, &lessons, &rows)
    }

    fn resolver(repo: &InMemoryRepository, policy: RegressionPolicy) -> AssignmentStatusResolver {
        AssignmentStatusResolver::new(Clock::fixed(fixed_now()), policy, Arc::new(repo.clone()))
    }

    #[tokio::test]
    async fn unassigned_pair_has_no_status() {
        let repo = InMemoryRepository::new();
        let resolver = resolver(&repo, RegressionPolicy::default());
        assert_eq!(resolver.refresh(&aggregate(1, 2), true).await.unwrap(), None);
        assert_eq!(resolver.assignment_status(USER, FORMATION).await.unwrap(), None);
    }

    #[tokio::test]
    async fn overdue_is_read_time_only() {
        let repo = InMemoryRepository::new();
        let resolver = resolver(&repo, RegressionPolicy::default());
        resolver
            .assign(USER, FORMATION, Some(fixed_now() - Duration::days(1)))
            .await
            .unwrap();

        assert_eq!(
            resolver.assignment_status(USER, FORMATION).await.unwrap(),
            Some(AssignmentStatus::Overdue)
        );
        let stored = repo.find_assignment(USER, FORMATION).await.unwrap().unwrap();
        assert_eq!(stored.status, AssignmentStatus::NotStarted);

        assert_eq!(
            resolver.refresh(&aggregate(1, 2), true).await.unwrap(),
            Some(AssignmentStatus::Overdue)
        );
        let stored = repo.find_assignment(USER, FORMATION).await.unwrap().unwrap();
        assert_eq!(stored.status, AssignmentStatus::InProgress);

        assert_eq!(
            resolver.refresh(&aggregate(2, 2), true).await.unwrap(),
            Some(AssignmentStatus::Completed)
        );
    }

    #[tokio::test]
    async fn due_exactly_now_is_not_overdue() {
        let repo = InMemoryRepository::new();
        let resolver = resolver(&repo, RegressionPolicy::default());
        resolver.assign(USER, FORMATION, Some(fixed_now())).await.unwrap();
        assert_eq!(
            resolver.assignment_status(USER, FORMATION).await.unwrap(),
            Some(AssignmentStatus::NotStarted)
        );
    }

    #[tokio::test]
    async fn regression_policy_decides_whether_completed_reopens() {
        for (policy, expected) in [
            (RegressionPolicy::KeepCompleted, AssignmentStatus::Completed),
            (RegressionPolicy::Reopen, AssignmentStatus::InProgress),
        ] {
            let repo = InMemoryRepository::new();
            let resolver = resolver(&repo, policy);
            resolver.assign(USER, FORMATION, None).await.unwrap();
            resolver.refresh(&aggregate(2, 2), true).await.unwrap();

            let status = resolver.refresh(&aggregate(1, 2), true).await.unwrap();
            assert_eq!(status, Some(expected), "{policy:?}");
        }
    }

    #[tokio::test]
    async fn reassigning_keeps_status() {
        let repo = InMemoryRepository::new();
        let resolver = resolver(&repo, RegressionPolicy::default());
        resolver.assign(USER, FORMATION, None).await.unwrap();
        resolver.refresh(&aggregate(1, 2), true).await.unwrap();

        let due = fixed_now() + Duration::days(3);
        let again = resolver.assign(USER, FORMATION, Some(due)).await.unwrap();
        assert_eq!(again.status, AssignmentStatus::InProgress);
        assert_eq!(again.due_at, Some(due));
    }
}
