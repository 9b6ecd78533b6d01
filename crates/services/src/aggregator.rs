use std::sync::Arc;

use lms_core::model::{FormationAggregate, FormationId, UserId};
use storage::repository::{CatalogRepository, ProgressRepository, StorageError};

/// Recomputes formation-level progress from the catalog and lesson rows.
///
/// Always a full recompute over current rows; nothing is patched incrementally.
#[derive(Clone)]
pub struct ProgressAggregator {
    catalog: Arc<dyn CatalogRepository>,
    progress: Arc<dyn ProgressRepository>,
}

impl ProgressAggregator {
    #[must_use]
    pub fn new(catalog: Arc<dyn CatalogRepository>, progress: Arc<dyn ProgressRepository>) -> Self {
        Self { catalog, progress }
    }

    /// Aggregate progress of `user_id` over every lesson of `formation_id`.
    ///
    /// A formation without lessons (or unknown to the catalog) is 0%.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the catalog or the progress rows cannot be read.
    pub async fn compute_formation_progress(
        &self,
        user_id: UserId,
        formation_id: FormationId,
    ) -> Result<FormationAggregate, StorageError> {
        let lesson_ids = self.catalog.find_lessons_by_formation(formation_id).await?;
        if lesson_ids.is_empty() {
            return Ok(FormationAggregate::empty(user_id, formation_id));
        }

        let rows = self
            .progress
            .find_progress(user_id, formation_id, &lesson_ids)
            .await?;
        Ok(FormationAggregate::compute(
            user_id,
            formation_id,
            &lesson_ids,
            &rows,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use lms_core::model::{ContentKind, LessonId, ProgressUpdate};
    use lms_core::time::fixed_now;
    use storage::repository::{ContentItemRecord, InMemoryRepository, ProgressUpsert};

    const USER: UserId = UserId::new(3);
    const FORMATION: FormationId = FormationId::new(1);

    async fn repo_with_lessons(n: u64) -> InMemoryRepository {
        let repo = InMemoryRepository::new();
        repo.upsert_content_item(&ContentItemRecord {
            formation_id: FORMATION,
            item_id: LessonId::new(500),
            kind: ContentKind::Section,
            position: 0,
            title: "Intro".into(),
        })
        .await
        .unwrap();
        for id in 1..=n {
            repo.upsert_content_item(&ContentItemRecord {
                formation_id: FORMATION,
                item_id: LessonId::new(id),
                kind: ContentKind::Lesson,
                position: u32::try_from(id).unwrap(),
                title: format!("Lesson {id}"),
            })
            .await
            .unwrap();
        }
        repo
    }

    async fn record(repo: &InMemoryRepository, lesson: u64, percentage: f64, completed: bool) {
        repo.upsert_progress(&ProgressUpsert {
            formation_id: FORMATION,
            update: ProgressUpdate::new(USER, LessonId::new(lesson), percentage, completed)
                .unwrap(),
            at: fixed_now(),
        })
        .await
        .unwrap();
    }

    fn aggregator(repo: &InMemoryRepository) -> ProgressAggregator {
        ProgressAggregator::new(Arc::new(repo.clone()), Arc::new(repo.clone()))
    }

    #[tokio::test]
    async fn no_rows_is_zero() {
        let repo = repo_with_lessons(3).await;
        let aggregate = aggregator(&repo)
            .compute_formation_progress(USER, FORMATION)
            .await
            .unwrap();
        assert_eq!(aggregate.percentage, 0.0);
        assert_eq!(aggregate.total_lessons, 3);
    }

    #[tokio::test]
    async fn sections_do_not_count_and_unvisited_lessons_do() {
        let repo = repo_with_lessons(4).await;
        record(&repo, 1, 10.0, true).await;
        record(&repo, 2, 100.0, true).await;

        let aggregate = aggregator(&repo)
            .compute_formation_progress(USER, FORMATION)
            .await
            .unwrap();
        assert_eq!(aggregate.percentage, 50.0);
        assert_eq!(aggregate.completed_lessons, 2);
        assert_eq!(aggregate.total_lessons, 4);
    }

    #[tokio::test]
    async fn unknown_formation_is_zero() {
        let repo = repo_with_lessons(2).await;
        let aggregate = aggregator(&repo)
            .compute_formation_progress(USER, FormationId::new(42))
            .await
            .unwrap();
        assert_eq!(aggregate.percentage, 0.0);
        assert_eq!(aggregate.total_lessons, 0);
    }

    #[tokio::test]
    async fn out_of_range_row_is_clamped() {
        let repo = repo_with_lessons(1).await;
        record(&repo, 1, 150.0, false).await;
        let aggregate = aggregator(&repo)
            .compute_formation_progress(USER, FORMATION)
            .await
            .unwrap();
        assert_eq!(aggregate.percentage, 100.0);
    }
}
