use std::time::Duration;

use tracing::debug;

use cache::CacheFacade;
use lms_core::model::{AssignmentStatus, FormationId, UserId};
use storage::repository::StorageError;

use crate::aggregator::ProgressAggregator;
use crate::keys;
use crate::status::AssignmentStatusResolver;
use crate::view::FormationProgressView;

/// Upper bound for views cached by a read. A read can race a write and cache
/// a view computed before that write's invalidation; the cap bounds how long
/// such a view survives.
pub const READ_THROUGH_TTL: Duration = Duration::from_secs(30);

/// Read side of the progress engine: cached formation views and live status.
#[derive(Clone)]
pub struct ProgressQueryService {
    aggregator: ProgressAggregator,
    resolver: AssignmentStatusResolver,
    cache: CacheFacade,
    cache_ttl: Duration,
}

impl ProgressQueryService {
    #[must_use]
    pub fn new(
        aggregator: ProgressAggregator,
        resolver: AssignmentStatusResolver,
        cache: CacheFacade,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            aggregator,
            resolver,
            cache,
            cache_ttl,
        }
    }

    /// Formation progress for a learner, served from cache when possible.
    ///
    /// A recomputed view is cached for `cache_ttl` capped at
    /// [`READ_THROUGH_TTL`]; views written by the write path use the full TTL.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the view must be recomputed and storage fails.
    pub async fn formation_progress(
        &self,
        user_id: UserId,
        formation_id: FormationId,
    ) -> Result<FormationProgressView, StorageError> {
        let key = keys::formation_view_key(user_id, formation_id);
        if let Some(view) = self.cache.get::<FormationProgressView>(&key).await {
            debug!(%key, "formation progress served from cache");
            return Ok(view);
        }

        let view = FormationProgressView::from(
            self.aggregator
                .compute_formation_progress(user_id, formation_id)
                .await?,
        );
        self.cache
            .set(&key, &view, self.cache_ttl.min(READ_THROUGH_TTL))
            .await;
        Ok(view)
    }

    /// Status is never cached: the overdue overlay depends on the read time.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the assignment cannot be read.
    pub async fn assignment_status(
        &self,
        user_id: UserId,
        formation_id: FormationId,
    ) -> Result<Option<AssignmentStatus>, StorageError> {
        self.resolver.assignment_status(user_id, formation_id).await
    }
}
