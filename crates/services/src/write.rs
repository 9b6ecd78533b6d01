use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use cache::CacheFacade;
use lms_core::model::{FormationAggregate, LessonId, ProgressUpdate, UserId};
use storage::repository::{CatalogRepository, ProgressRepository, ProgressUpsert};

use crate::Clock;
use crate::aggregator::ProgressAggregator;
use crate::error::ProgressServiceError;
use crate::keys;
use crate::status::AssignmentStatusResolver;
use crate::view::{FormationProgressView, RecordedProgress};

/// Single entry point for lesson progress updates.
///
/// Persistence failures before the row is stored propagate. Once the row is
/// stored the call always succeeds; later failures are logged and reported
/// through `RecordedProgress::degraded`.
#[derive(Clone)]
pub struct ProgressWriteService {
    clock: Clock,
    catalog: Arc<dyn CatalogRepository>,
    progress: Arc<dyn ProgressRepository>,
    aggregator: ProgressAggregator,
    resolver: AssignmentStatusResolver,
    cache: CacheFacade,
    cache_ttl: Duration,
}

impl ProgressWriteService {
    #[must_use]
    pub fn new(
        clock: Clock,
        catalog: Arc<dyn CatalogRepository>,
        progress: Arc<dyn ProgressRepository>,
        resolver: AssignmentStatusResolver,
        cache: CacheFacade,
        cache_ttl: Duration,
    ) -> Self {
        let aggregator = ProgressAggregator::new(Arc::clone(&catalog), Arc::clone(&progress));
        Self {
            clock,
            catalog,
            progress,
            aggregator,
            resolver,
            cache,
            cache_ttl,
        }
    }

    /// Record a lesson update and return the recomputed formation aggregate.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Progress` for a non-finite percentage.
    /// Returns `ProgressServiceError::LessonNotInCatalog` if no formation owns the lesson.
    /// Returns `ProgressServiceError::Storage` if the lookup or the upsert fails.
    pub async fn record_lesson_progress(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
        percentage: f64,
        completed: bool,
    ) -> Result<RecordedProgress, ProgressServiceError> {
        let update = ProgressUpdate::new(user_id, lesson_id, percentage, completed)?;
        let formation_id = self
            .catalog
            .find_formation_of_lesson(lesson_id)
            .await?
            .ok_or(ProgressServiceError::LessonNotInCatalog(lesson_id))?;

        let row = self
            .progress
            .upsert_progress(&ProgressUpsert {
                formation_id,
                update,
                at: self.clock.now(),
            })
            .await?;
        debug!(
            user_id = %user_id,
            lesson_id = %lesson_id,
            formation_id = %formation_id,
            percentage = row.percentage,
            completed = row.completed,
            "lesson progress stored"
        );

        let mut degraded = false;
        let aggregate = match self
            .aggregator
            .compute_formation_progress(user_id, formation_id)
            .await
        {
            Ok(aggregate) => Some(aggregate),
            Err(err) => {
                error!(
                    user_id = %user_id,
                    formation_id = %formation_id,
                    error = %err,
                    "aggregate recompute failed after progress was stored"
                );
                degraded = true;
                None
            }
        };

        // a placeholder aggregate must not drive the state machine
        let status = match &aggregate {
            Some(aggregate) => match self.resolver.refresh(aggregate, true).await {
                Ok(status) => status,
                Err(err) => {
                    error!(
                        user_id = %user_id,
                        formation_id = %formation_id,
                        error = %err,
                        "assignment status refresh failed after progress was stored"
                    );
                    degraded = true;
                    None
                }
            },
            None => None,
        };

        self.cache
            .invalidate_pattern(&keys::scope_prefix(user_id, formation_id))
            .await;

        let view = match aggregate {
            Some(aggregate) => {
                let view = FormationProgressView::from(aggregate);
                self.cache
                    .set(
                        &keys::formation_view_key(user_id, formation_id),
                        &view,
                        self.cache_ttl,
                    )
                    .await;
                view
            }
            None => FormationAggregate::empty(user_id, formation_id).into(),
        };

        Ok(RecordedProgress {
            aggregate: view,
            status,
            degraded,
        })
    }
}
