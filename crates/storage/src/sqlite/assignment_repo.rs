use lms_core::model::{Assignment, AssignmentId, AssignmentStatus, FormationId, UserId};

use super::SqliteRepository;
use super::mapping::{conn, id_to_i64, map_assignment_row};
use crate::repository::{AssignmentRepository, NewAssignmentRecord, StorageError};

#[async_trait::async_trait]
impl AssignmentRepository for SqliteRepository {
    async fn find_assignment(
        &self,
        user_id: UserId,
        formation_id: FormationId,
    ) -> Result<Option<Assignment>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, formation_id, assigned_at, due_at, status
            FROM assignments
            WHERE user_id = ?1 AND formation_id = ?2
            ",
        )
        .bind(id_to_i64("user_id", user_id.value())?)
        .bind(id_to_i64("formation_id", formation_id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_assignment_row).transpose()
    }

    async fn update_assignment_status(
        &self,
        id: AssignmentId,
        status: AssignmentStatus,
    ) -> Result<(), StorageError> {
        let res = sqlx::query("UPDATE assignments SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(id_to_i64("assignment_id", id.value())?)
            .execute(&self.pool)
            .await
            .map_err(conn)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn upsert_assignment(
        &self,
        record: &NewAssignmentRecord,
    ) -> Result<Assignment, StorageError> {
        let user = id_to_i64("user_id", record.user_id.value())?;
        let formation = id_to_i64("formation_id", record.formation_id.value())?;

        sqlx::query(
            r"
            INSERT INTO assignments (user_id, formation_id, assigned_at, due_at, status)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id, formation_id) DO UPDATE SET
                due_at = excluded.due_at
            ",
        )
        .bind(user)
        .bind(formation)
        .bind(record.assigned_at)
        .bind(record.due_at)
        .bind(AssignmentStatus::NotStarted.as_str())
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        self.find_assignment(record.user_id, record.formation_id)
            .await?
            .ok_or(StorageError::NotFound)
    }
}
