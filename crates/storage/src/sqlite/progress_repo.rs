use lms_core::model::{FormationId, LessonId, LessonProgress, UserId};

use super::SqliteRepository;
use super::mapping::{conn, id_to_i64, map_progress_row};
use crate::repository::{ProgressRepository, ProgressUpsert, StorageError};

const PROGRESS_COLUMNS: &str = "user_id, lesson_id, formation_id, percentage, completed, \
     first_accessed_at, last_accessed_at, completed_at";

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn find_progress(
        &self,
        user_id: UserId,
        formation_id: FormationId,
        lesson_ids: &[LessonId],
    ) -> Result<Vec<LessonProgress>, StorageError> {
        if lesson_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = format!(
            "SELECT {PROGRESS_COLUMNS} FROM lesson_progress \
             WHERE user_id = ?1 AND formation_id = ?2 AND lesson_id IN ("
        );
        for i in 0..lesson_ids.len() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push('?');
            sql.push_str(&(i + 3).to_string());
        }
        sql.push(')');

        let mut q = sqlx::query(&sql)
            .bind(id_to_i64("user_id", user_id.value())?)
            .bind(id_to_i64("formation_id", formation_id.value())?);
        for id in lesson_ids {
            q = q.bind(id_to_i64("lesson_id", id.value())?);
        }

        let rows = q.fetch_all(&self.pool).await.map_err(conn)?;
        rows.iter().map(map_progress_row).collect()
    }

    async fn upsert_progress(
        &self,
        upsert: &ProgressUpsert,
    ) -> Result<LessonProgress, StorageError> {
        let user = id_to_i64("user_id", upsert.update.user_id().value())?;
        let lesson = id_to_i64("lesson_id", upsert.update.lesson_id().value())?;

        let mut tx = self.pool.begin().await.map_err(conn)?;

        let existing = sqlx::query(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM lesson_progress WHERE user_id = ?1 AND lesson_id = ?2"
        ))
        .bind(user)
        .bind(lesson)
        .fetch_optional(&mut *tx)
        .await
        .map_err(conn)?
        .as_ref()
        .map(map_progress_row)
        .transpose()?;

        let row = LessonProgress::merged(
            existing.as_ref(),
            upsert.formation_id,
            &upsert.update,
            upsert.at,
        );

        sqlx::query(
            r"
            INSERT INTO lesson_progress (
                user_id, lesson_id, formation_id, percentage, completed,
                first_accessed_at, last_accessed_at, completed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(user_id, lesson_id) DO UPDATE SET
                formation_id = excluded.formation_id,
                percentage = excluded.percentage,
                completed = excluded.completed,
                last_accessed_at = excluded.last_accessed_at,
                completed_at = excluded.completed_at
            ",
        )
        .bind(user)
        .bind(lesson)
        .bind(id_to_i64("formation_id", row.formation_id.value())?)
        .bind(row.percentage)
        .bind(row.completed)
        .bind(row.first_accessed_at)
        .bind(row.last_accessed_at)
        .bind(row.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        tx.commit().await.map_err(conn)?;
        Ok(row)
    }
}
