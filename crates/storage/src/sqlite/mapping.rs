use lms_core::model::{
    Assignment, AssignmentId, AssignmentStatus, FormationId, LessonId, LessonProgress, UserId,
};
use sqlx::Row;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn id_to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn user_id_from_i64(v: i64) -> Result<UserId, StorageError> {
    Ok(UserId::new(i64_to_u64("user_id", v)?))
}

pub(crate) fn lesson_id_from_i64(v: i64) -> Result<LessonId, StorageError> {
    Ok(LessonId::new(i64_to_u64("lesson_id", v)?))
}

pub(crate) fn formation_id_from_i64(v: i64) -> Result<FormationId, StorageError> {
    Ok(FormationId::new(i64_to_u64("formation_id", v)?))
}

pub(crate) fn map_progress_row(row: &sqlx::sqlite::SqliteRow) -> Result<LessonProgress, StorageError> {
    Ok(LessonProgress {
        user_id: user_id_from_i64(row.try_get("user_id").map_err(ser)?)?,
        lesson_id: lesson_id_from_i64(row.try_get("lesson_id").map_err(ser)?)?,
        formation_id: formation_id_from_i64(row.try_get("formation_id").map_err(ser)?)?,
        percentage: row.try_get("percentage").map_err(ser)?,
        completed: row.try_get("completed").map_err(ser)?,
        first_accessed_at: row.try_get("first_accessed_at").map_err(ser)?,
        last_accessed_at: row.try_get("last_accessed_at").map_err(ser)?,
        completed_at: row.try_get("completed_at").map_err(ser)?,
    })
}

pub(crate) fn map_assignment_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<Assignment, StorageError> {
    let status: String = row.try_get("status").map_err(ser)?;
    Ok(Assignment {
        id: AssignmentId::new(i64_to_u64("id", row.try_get("id").map_err(ser)?)?),
        user_id: user_id_from_i64(row.try_get("user_id").map_err(ser)?)?,
        formation_id: formation_id_from_i64(row.try_get("formation_id").map_err(ser)?)?,
        assigned_at: row.try_get("assigned_at").map_err(ser)?,
        due_at: row.try_get("due_at").map_err(ser)?,
        status: status.parse::<AssignmentStatus>().map_err(ser)?,
    })
}
