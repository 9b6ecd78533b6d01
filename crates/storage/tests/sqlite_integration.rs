use chrono::Duration;
use lms_core::model::{
    AssignmentStatus, ContentKind, FormationId, LessonId, ProgressUpdate, UserId,
};
use lms_core::time::fixed_now;
use storage::repository::{
    AssignmentRepository, CatalogRepository, ContentItemRecord, NewAssignmentRecord,
    ProgressRepository, ProgressUpsert, StorageError,
};
use storage::sqlite::SqliteRepository;

async fn connect(name: &str) -> SqliteRepository {
    let repo = SqliteRepository::connect(&format!("sqlite:file:{name}?mode=memory&cache=shared"))
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

async fn seed_catalog(repo: &SqliteRepository, formation: FormationId) {
    let items = [
        (100, ContentKind::Section, 0),
        (1, ContentKind::Lesson, 1),
        (2, ContentKind::Lesson, 2),
        (101, ContentKind::Section, 3),
        (3, ContentKind::Lesson, 4),
    ];
    for (id, kind, position) in items {
        repo.upsert_content_item(&ContentItemRecord {
            formation_id: formation,
            item_id: LessonId::new(id),
            kind,
            position,
            title: format!("Item {id}"),
        })
        .await
        .unwrap();
    }
}

#[tokio::test]
async fn sqlite_catalog_lists_lessons_in_order() {
    let repo = connect("memdb_catalog").await;
    let formation = FormationId::new(1);
    seed_catalog(&repo, formation).await;

    let lessons = repo.find_lessons_by_formation(formation).await.unwrap();
    assert_eq!(
        lessons,
        vec![LessonId::new(1), LessonId::new(2), LessonId::new(3)]
    );
    assert_eq!(
        repo.find_formation_of_lesson(LessonId::new(2)).await.unwrap(),
        Some(formation)
    );
    assert_eq!(
        repo.find_formation_of_lesson(LessonId::new(100)).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn sqlite_progress_upsert_tracks_timestamps() {
    let repo = connect("memdb_progress").await;
    let formation = FormationId::new(1);
    seed_catalog(&repo, formation).await;

    let user = UserId::new(5);
    let t0 = fixed_now();
    let t1 = t0 + Duration::minutes(30);

    let first = repo
        .upsert_progress(&ProgressUpsert {
            formation_id: formation,
            update: ProgressUpdate::new(user, LessonId::new(1), 40.0, false).unwrap(),
            at: t0,
        })
        .await
        .unwrap();
    assert_eq!(first.first_accessed_at, t0);
    assert_eq!(first.completed_at, None);

    let second = repo
        .upsert_progress(&ProgressUpsert {
            formation_id: formation,
            update: ProgressUpdate::new(user, LessonId::new(1), 100.0, true).unwrap(),
            at: t1,
        })
        .await
        .unwrap();
    assert_eq!(second.first_accessed_at, t0);
    assert_eq!(second.completed_at, Some(t1));

    let rows = repo
        .find_progress(
            user,
            formation,
            &[LessonId::new(1), LessonId::new(2), LessonId::new(3)],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0], second);

    assert!(repo
        .find_progress(UserId::new(6), formation, &[LessonId::new(1)])
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn sqlite_assignments_upsert_and_update_status() {
    let repo = connect("memdb_assignments").await;
    let record = NewAssignmentRecord {
        user_id: UserId::new(5),
        formation_id: FormationId::new(1),
        assigned_at: fixed_now(),
        due_at: Some(fixed_now() + Duration::days(7)),
    };

    let created = repo.upsert_assignment(&record).await.unwrap();
    assert_eq!(created.status, AssignmentStatus::NotStarted);
    assert_eq!(created.due_at, record.due_at);

    repo.update_assignment_status(created.id, AssignmentStatus::Completed)
        .await
        .unwrap();
    let redated = repo
        .upsert_assignment(&NewAssignmentRecord {
            due_at: None,
            ..record
        })
        .await
        .unwrap();
    assert_eq!(redated.id, created.id);
    assert_eq!(redated.status, AssignmentStatus::Completed);
    assert_eq!(redated.due_at, None);

    let missing = repo
        .update_assignment_status(
            lms_core::model::AssignmentId::new(404),
            AssignmentStatus::InProgress,
        )
        .await;
    assert!(matches!(missing, Err(StorageError::NotFound)));
}
