use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lms_core::model::{
    Assignment, AssignmentId, AssignmentStatus, ContentKind, FormationId, LessonId,
    LessonProgress, ProgressUpdate, UserId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// One entry of a formation's ordered content list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentItemRecord {
    pub formation_id: FormationId,
    pub item_id: LessonId,
    pub kind: ContentKind,
    pub position: u32,
    pub title: String,
}

/// Input for the lesson progress upsert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpsert {
    pub formation_id: FormationId,
    pub update: ProgressUpdate,
    pub at: DateTime<Utc>,
}

/// Input for creating (or re-dating) an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewAssignmentRecord {
    pub user_id: UserId,
    pub formation_id: FormationId,
    pub assigned_at: DateTime<Utc>,
    pub due_at: Option<DateTime<Utc>>,
}

/// Formation content catalog.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Ordered lesson ids of a formation, section markers excluded.
    ///
    /// An unknown formation yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the catalog cannot be read.
    async fn find_lessons_by_formation(
        &self,
        formation_id: FormationId,
    ) -> Result<Vec<LessonId>, StorageError>;

    /// Formation owning a lesson, or `None` if the lesson is not cataloged.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the catalog cannot be read.
    async fn find_formation_of_lesson(
        &self,
        lesson_id: LessonId,
    ) -> Result<Option<FormationId>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the item cannot be stored.
    async fn upsert_content_item(&self, item: &ContentItemRecord) -> Result<(), StorageError>;
}

/// Per-lesson progress rows.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Rows for `(user, formation)` restricted to `lesson_ids`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if rows cannot be read or decoded.
    async fn find_progress(
        &self,
        user_id: UserId,
        formation_id: FormationId,
        lesson_ids: &[LessonId],
    ) -> Result<Vec<LessonProgress>, StorageError>;

    /// Create or update a row. Last write wins; there is no version check, so
    /// callers assume at most one writer per `(user, lesson)`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the row cannot be stored.
    async fn upsert_progress(&self, upsert: &ProgressUpsert)
    -> Result<LessonProgress, StorageError>;
}

/// User/formation assignments.
#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the row cannot be read or decoded.
    async fn find_assignment(
        &self,
        user_id: UserId,
        formation_id: FormationId,
    ) -> Result<Option<Assignment>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the assignment does not exist.
    async fn update_assignment_status(
        &self,
        id: AssignmentId,
        status: AssignmentStatus,
    ) -> Result<(), StorageError>;

    /// Insert a `NotStarted` assignment, or update the due date of an existing one.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the row cannot be stored.
    async fn upsert_assignment(
        &self,
        record: &NewAssignmentRecord,
    ) -> Result<Assignment, StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

#[derive(Default)]
struct AssignmentTable {
    next_id: u64,
    rows: HashMap<(UserId, FormationId), Assignment>,
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    catalog: Arc<Mutex<HashMap<FormationId, Vec<ContentItemRecord>>>>,
    progress: Arc<Mutex<HashMap<(UserId, LessonId), LessonProgress>>>,
    assignments: Arc<Mutex<AssignmentTable>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogRepository for InMemoryRepository {
    async fn find_lessons_by_formation(
        &self,
        formation_id: FormationId,
    ) -> Result<Vec<LessonId>, StorageError> {
        let guard = self
            .catalog
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .get(&formation_id)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item.kind.counts_toward_progress())
                    .map(|item| item.item_id)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_formation_of_lesson(
        &self,
        lesson_id: LessonId,
    ) -> Result<Option<FormationId>, StorageError> {
        let guard = self
            .catalog
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.iter().find_map(|(formation_id, items)| {
            items
                .iter()
                .any(|item| item.item_id == lesson_id && item.kind.counts_toward_progress())
                .then_some(*formation_id)
        }))
    }

    async fn upsert_content_item(&self, item: &ContentItemRecord) -> Result<(), StorageError> {
        let mut guard = self
            .catalog
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let items = guard.entry(item.formation_id).or_default();
        items.retain(|existing| existing.item_id != item.item_id);
        items.push(item.clone());
        items.sort_by_key(|existing| (existing.position, existing.item_id));
        Ok(())
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn find_progress(
        &self,
        user_id: UserId,
        formation_id: FormationId,
        lesson_ids: &[LessonId],
    ) -> Result<Vec<LessonProgress>, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(lesson_ids
            .iter()
            .filter_map(|lesson_id| guard.get(&(user_id, *lesson_id)))
            .filter(|row| row.formation_id == formation_id)
            .cloned()
            .collect())
    }

    async fn upsert_progress(
        &self,
        upsert: &ProgressUpsert,
    ) -> Result<LessonProgress, StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let key = (upsert.update.user_id(), upsert.update.lesson_id());
        let row =
            LessonProgress::merged(guard.get(&key), upsert.formation_id, &upsert.update, upsert.at);
        guard.insert(key, row.clone());
        Ok(row)
    }
}

#[async_trait]
impl AssignmentRepository for InMemoryRepository {
    async fn find_assignment(
        &self,
        user_id: UserId,
        formation_id: FormationId,
    ) -> Result<Option<Assignment>, StorageError> {
        let guard = self
            .assignments
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.rows.get(&(user_id, formation_id)).cloned())
    }

    async fn update_assignment_status(
        &self,
        id: AssignmentId,
        status: AssignmentStatus,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .assignments
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let row = guard
            .rows
            .values_mut()
            .find(|a| a.id == id)
            .ok_or(StorageError::NotFound)?;
        row.status = status;
        Ok(())
    }

    async fn upsert_assignment(
        &self,
        record: &NewAssignmentRecord,
    ) -> Result<Assignment, StorageError> {
        let mut guard = self
            .assignments
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let key = (record.user_id, record.formation_id);
        if let Some(existing) = guard.rows.get_mut(&key) {
            existing.due_at = record.due_at;
            return Ok(existing.clone());
        }

        guard.next_id += 1;
        let assignment = Assignment {
            id: AssignmentId::new(guard.next_id),
            user_id: record.user_id,
            formation_id: record.formation_id,
            assigned_at: record.assigned_at,
            due_at: record.due_at,
            status: AssignmentStatus::NotStarted,
        };
        guard.rows.insert(key, assignment.clone());
        Ok(assignment)
    }
}

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub catalog: Arc<dyn CatalogRepository>,
    pub progress: Arc<dyn ProgressRepository>,
    pub assignments: Arc<dyn AssignmentRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_repository(InMemoryRepository::new())
    }

    /// Use one repository value for every collaborator.
    #[must_use]
    pub fn from_repository<R>(repo: R) -> Self
    where
        R: CatalogRepository + ProgressRepository + AssignmentRepository + Clone + 'static,
    {
        let catalog: Arc<dyn CatalogRepository> = Arc::new(repo.clone());
        let progress: Arc<dyn ProgressRepository> = Arc::new(repo.clone());
        let assignments: Arc<dyn AssignmentRepository> = Arc::new(repo);
        Self {
            catalog,
            progress,
            assignments,
        }
    }
}
