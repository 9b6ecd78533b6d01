use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cache::{CacheFacade, CacheOptions, ConnectionState, InMemoryRemote};
use chrono::Duration as ChronoDuration;
use lms_core::model::{
    Assignment, AssignmentId, AssignmentStatus, ContentKind, FormationId, LessonId, LessonProgress, ProgressError,
    ProgressUpdate, UserId,
};
use lms_core::time::fixed_now;
use services::{
    AppConfig, AppServices, Clock, FormationProgressView, ProgressServiceError, keys,
};
use storage::repository::{
    AssignmentRepository, CatalogRepository, ContentItemRecord, InMemoryRepository,
    NewAssignmentRecord, ProgressRepository, ProgressUpsert, Storage, StorageError,
};

const USER: UserId = UserId::new(7);
const FORMATION: FormationId = FormationId::new(1);

async fn seed(repo: &InMemoryRepository, lessons: u64) {
    repo.upsert_content_item(&ContentItemRecord {
        formation_id: FORMATION,
        item_id: LessonId::new(900),
        kind: ContentKind::Section,
        position: 0,
        title: "Section 1".into(),
    })
    .await
    .unwrap();
    for id in 1..=lessons {
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
}

async fn connected_cache() -> (Arc<InMemoryRemote>, CacheFacade) {
    let remote = Arc::new(InMemoryRemote::new());
    let cache = CacheFacade::connect(remote.clone(), CacheOptions::default()).await;
    (remote, cache)
}

fn services(storage: Storage, cache: CacheFacade) -> AppServices {
    AppServices::new(storage, cache, Clock::fixed(fixed_now()), &AppConfig::default())
}

#[tokio::test]
async fn recording_twice_is_idempotent() {
    let repo = InMemoryRepository::new();
    seed(&repo, 3).await;
    let (_, cache) = connected_cache().await;
    let app = services(Storage::from_repository(repo), cache);

    let first = app
        .writes()
        .record_lesson_progress(USER, LessonId::new(2), 40.0, false)
        .await
        .unwrap();
    let second = app
        .writes()
        .record_lesson_progress(USER, LessonId::new(2), 40.0, false)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(first.aggregate.aggregate, 13.33);
    assert!(!first.degraded);
}

#[tokio::test]
async fn half_the_lessons_completed_is_fifty_percent() {
    let repo = InMemoryRepository::new();
    seed(&repo, 4).await;
    let (_, cache) = connected_cache().await;
    let app = services(Storage::from_repository(repo), cache);

    app.writes()
        .record_lesson_progress(USER, LessonId::new(1), 100.0, true)
        .await
        .unwrap();
    let recorded = app
        .writes()
        .record_lesson_progress(USER, LessonId::new(3), 80.0, true)
        .await
        .unwrap();

    assert_eq!(recorded.aggregate.aggregate, 50.0);
    assert_eq!(recorded.aggregate.total_lessons, 4);
    assert_eq!(recorded.aggregate.completed_lessons, 2);
    assert_eq!(recorded.aggregate.lessons.len(), 4);
    assert!(recorded.aggregate.lessons[1].last_accessed_at.is_none());
}

#[tokio::test]
async fn overdue_assignment_becomes_completed() {
    let repo = InMemoryRepository::new();
    seed(&repo, 2).await;
    let (_, cache) = connected_cache().await;
    let app = services(Storage::from_repository(repo), cache);

    app.resolver()
        .assign(USER, FORMATION, Some(fixed_now() - ChronoDuration::days(2)))
        .await
        .unwrap();
    assert_eq!(
        app.queries().assignment_status(USER, FORMATION).await.unwrap(),
        Some(AssignmentStatus::Overdue)
    );

    let partial = app
        .writes()
        .record_lesson_progress(USER, LessonId::new(1), 100.0, true)
        .await
        .unwrap();
    assert_eq!(partial.status, Some(AssignmentStatus::Overdue));

    let done = app
        .writes()
        .record_lesson_progress(USER, LessonId::new(2), 100.0, true)
        .await
        .unwrap();
    assert_eq!(done.aggregate.aggregate, 100.0);
    assert_eq!(done.status, Some(AssignmentStatus::Completed));
    assert_eq!(
        app.queries().assignment_status(USER, FORMATION).await.unwrap(),
        Some(AssignmentStatus::Completed)
    );
}

#[tokio::test]
async fn first_access_starts_assignment_even_at_zero() {
    let repo = InMemoryRepository::new();
    seed(&repo, 2).await;
    let (_, cache) = connected_cache().await;
    let app = services(Storage::from_repository(repo), cache);
    app.resolver().assign(USER, FORMATION, None).await.unwrap();

    let recorded = app
        .writes()
        .record_lesson_progress(USER, LessonId::new(1), 0.0, false)
        .await
        .unwrap();
    assert_eq!(recorded.aggregate.aggregate, 0.0);
    assert_eq!(recorded.status, Some(AssignmentStatus::InProgress));
}

#[tokio::test]
async fn invalid_input_is_rejected_before_storage() {
    let repo = InMemoryRepository::new();
    seed(&repo, 1).await;
    let app = services(
        Storage::from_repository(repo.clone()),
        CacheFacade::local_only(CacheOptions::default()),
    );

    let nan = app
        .writes()
        .record_lesson_progress(USER, LessonId::new(1), f64::NAN, false)
        .await;
    assert!(matches!(
        nan,
        Err(ProgressServiceError::Progress(ProgressError::NonFinite(_)))
    ));

    let unknown = app
        .writes()
        .record_lesson_progress(USER, LessonId::new(900), 50.0, false)
        .await;
    assert!(matches!(
        unknown,
        Err(ProgressServiceError::LessonNotInCatalog(id)) if id == LessonId::new(900)
    ));

    assert!(repo
        .find_progress(USER, FORMATION, &[LessonId::new(1)])
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn reads_are_cached_until_the_next_write() {
    let repo = InMemoryRepository::new();
    seed(&repo, 2).await;
    let (remote, cache) = connected_cache().await;
    let app = services(Storage::from_repository(repo.clone()), cache);

    let before = app.queries().formation_progress(USER, FORMATION).await.unwrap();
    assert_eq!(before.aggregate, 0.0);
    assert!(remote.contains(&keys::formation_view_key(USER, FORMATION)));

    // bypasses the write path, so the cached view stays
    repo.upsert_progress(&ProgressUpsert {
        formation_id: FORMATION,
        update: ProgressUpdate::new(USER, LessonId::new(1), 100.0, true).unwrap(),
        at: fixed_now(),
    })
    .await
    .unwrap();
    let cached = app.queries().formation_progress(USER, FORMATION).await.unwrap();
    assert_eq!(cached, before);

    app.writes()
        .record_lesson_progress(USER, LessonId::new(2), 50.0, false)
        .await
        .unwrap();
    let fresh = app.queries().formation_progress(USER, FORMATION).await.unwrap();
    assert_eq!(fresh.aggregate, 75.0);
}

#[tokio::test]
async fn remote_outage_never_fails_or_serves_stale_views() {
    let repo = InMemoryRepository::new();
    seed(&repo, 2).await;
    let (remote, cache) = connected_cache().await;
    let app = services(Storage::from_repository(repo), cache.clone());

    app.queries().formation_progress(USER, FORMATION).await.unwrap();
    remote.set_available(false);

    let recorded = app
        .writes()
        .record_lesson_progress(USER, LessonId::new(1), 100.0, true)
        .await
        .unwrap();
    assert!(!recorded.degraded);
    assert_eq!(cache.connection_state(), ConnectionState::Disconnected);

    let view = app.queries().formation_progress(USER, FORMATION).await.unwrap();
    assert_eq!(view.aggregate, 50.0);
}

/// Progress repository that can fail its reads or its writes on demand.
#[derive(Clone)]
struct FlakyProgress {
    inner: InMemoryRepository,
    fail_reads: bool,
    fail_writes: bool,
}

#[async_trait]
impl ProgressRepository for FlakyProgress {
    async fn find_progress(
        &self,
        user_id: UserId,
        formation_id: FormationId,
        lesson_ids: &[LessonId],
    ) -> Result<Vec<LessonProgress>, StorageError> {
        if self.fail_reads {
            return Err(StorageError::Connection("read replica down".into()));
        }
        self.inner.find_progress(user_id, formation_id, lesson_ids).await
    }

    async fn upsert_progress(
        &self,
        upsert: &ProgressUpsert,
    ) -> Result<LessonProgress, StorageError> {
        if self.fail_writes {
            return Err(StorageError::Connection("primary down".into()));
        }
        self.inner.upsert_progress(upsert).await
    }
}

fn flaky_storage(repo: &InMemoryRepository, fail_reads: bool, fail_writes: bool) -> Storage {
    Storage {
        catalog: Arc::new(repo.clone()),
        progress: Arc::new(FlakyProgress {
            inner: repo.clone(),
            fail_reads,
            fail_writes,
        }),
        assignments: Arc::new(repo.clone()),
    }
}

#[tokio::test]
async fn persistence_failure_propagates_and_keeps_cache() {
    let repo = InMemoryRepository::new();
    seed(&repo, 2).await;
    let cache = CacheFacade::local_only(CacheOptions::default());
    let key = keys::formation_view_key(USER, FORMATION);
    cache.set(&key, &"cached", Duration::from_secs(60)).await;

    let app = services(flaky_storage(&repo, false, true), cache.clone());
    let result = app
        .writes()
        .record_lesson_progress(USER, LessonId::new(1), 10.0, false)
        .await;

    assert!(matches!(
        result,
        Err(ProgressServiceError::Storage(StorageError::Connection(_)))
    ));
    assert_eq!(cache.get::<String>(&key).await.as_deref(), Some("cached"));
}

#[tokio::test]
async fn failed_recompute_degrades_to_zero() {
    let repo = InMemoryRepository::new();
    seed(&repo, 2).await;
    let app = services(
        flaky_storage(&repo, true, false),
        CacheFacade::local_only(CacheOptions::default()),
    );
    app.resolver().assign(USER, FORMATION, None).await.unwrap();

    let recorded = app
        .writes()
        .record_lesson_progress(USER, LessonId::new(1), 100.0, true)
        .await
        .unwrap();

    assert!(recorded.degraded);
    assert_eq!(recorded.aggregate.aggregate, 0.0);
    assert_eq!(recorded.status, None);

    // the row itself was stored
    let rows = repo
        .find_progress(USER, FORMATION, &[LessonId::new(1)])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].completed);
    assert!(
        repo.find_formation_of_lesson(LessonId::new(1))
            .await
            .unwrap()
            .is_some()
    );
}

/// Assignment repository whose status updates always fail.
struct FlakyAssignments {
    inner: InMemoryRepository,
}

#[async_trait]
impl AssignmentRepository for FlakyAssignments {
    async fn find_assignment(
        &self,
        user_id: UserId,
        formation_id: FormationId,
    ) -> Result<Option<Assignment>, StorageError> {
        self.inner.find_assignment(user_id, formation_id).await
    }

    async fn update_assignment_status(
        &self,
        _id: AssignmentId,
        _status: AssignmentStatus,
    ) -> Result<(), StorageError> {
        Err(StorageError::Connection("assignments table locked".into()))
    }

    async fn upsert_assignment(
        &self,
        record: &NewAssignmentRecord,
    ) -> Result<Assignment, StorageError> {
        self.inner.upsert_assignment(record).await
    }
}

#[tokio::test]
async fn failed_status_refresh_keeps_real_aggregate() {
    let repo = InMemoryRepository::new();
    seed(&repo, 2).await;
    let storage = Storage {
        catalog: Arc::new(repo.clone()),
        progress: Arc::new(repo.clone()),
        assignments: Arc::new(FlakyAssignments {
            inner: repo.clone(),
        }),
    };
    let cache = CacheFacade::local_only(CacheOptions::default());
    let app = services(storage, cache.clone());
    app.resolver().assign(USER, FORMATION, None).await.unwrap();

    let recorded = app
        .writes()
        .record_lesson_progress(USER, LessonId::new(1), 100.0, true)
        .await
        .unwrap();

    assert!(recorded.degraded);
    assert_eq!(recorded.aggregate.aggregate, 50.0);
    assert_eq!(recorded.aggregate.completed_lessons, 1);
    assert_eq!(recorded.status, None);

    // the real view is still cached
    let cached = cache
        .get::<FormationProgressView>(&keys::formation_view_key(USER, FORMATION))
        .await;
    assert_eq!(cached, Some(recorded.aggregate));

    // the status write never landed
    let assignment = repo.find_assignment(USER, FORMATION).await.unwrap().unwrap();
    assert_eq!(assignment.status, AssignmentStatus::NotStarted);
}

#[tokio::test(start_paused = true)]
async fn read_populated_view_expires_early() {
    let repo = InMemoryRepository::new();
    seed(&repo, 2).await;
    let app = services(
        Storage::from_repository(repo.clone()),
        CacheFacade::local_only(CacheOptions::default()),
    );

    let before = app.queries().formation_progress(USER, FORMATION).await.unwrap();
    assert_eq!(before.aggregate, 0.0);

    // a write that lands after the read computed its view
    repo.upsert_progress(&ProgressUpsert {
        formation_id: FORMATION,
        update: ProgressUpdate::new(USER, LessonId::new(1), 100.0, true).unwrap(),
        at: fixed_now(),
    })
    .await
    .unwrap();
    assert_eq!(
        app.queries().formation_progress(USER, FORMATION).await.unwrap(),
        before
    );

    tokio::time::sleep(services::queries::READ_THROUGH_TTL + Duration::from_secs(1)).await;
    let fresh = app.queries().formation_progress(USER, FORMATION).await.unwrap();
    assert_eq!(fresh.aggregate, 50.0);
}
