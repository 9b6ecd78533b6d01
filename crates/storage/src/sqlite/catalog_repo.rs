use lms_core::model::{ContentKind, FormationId, LessonId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{conn, formation_id_from_i64, id_to_i64, lesson_id_from_i64, ser};
use crate::repository::{CatalogRepository, ContentItemRecord, StorageError};

#[async_trait::async_trait]
impl CatalogRepository for SqliteRepository {
    async fn find_lessons_by_formation(
        &self,
        formation_id: FormationId,
    ) -> Result<Vec<LessonId>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT item_id
            FROM content_items
            WHERE formation_id = ?1 AND kind = ?2
            ORDER BY position ASC, item_id ASC
            ",
        )
        .bind(id_to_i64("formation_id", formation_id.value())?)
        .bind(ContentKind::Lesson.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter()
            .map(|row| lesson_id_from_i64(row.try_get("item_id").map_err(ser)?))
            .collect()
    }

    async fn find_formation_of_lesson(
        &self,
        lesson_id: LessonId,
    ) -> Result<Option<FormationId>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT formation_id
            FROM content_items
            WHERE item_id = ?1 AND kind = ?2
            ",
        )
        .bind(id_to_i64("lesson_id", lesson_id.value())?)
        .bind(ContentKind::Lesson.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.map(|r| formation_id_from_i64(r.try_get("formation_id").map_err(ser)?))
            .transpose()
    }

    async fn upsert_content_item(&self, item: &ContentItemRecord) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO content_items (item_id, formation_id, kind, position, title)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(item_id) DO UPDATE SET
                formation_id = excluded.formation_id,
                kind = excluded.kind,
                position = excluded.position,
                title = excluded.title
            ",
        )
        .bind(id_to_i64("item_id", item.item_id.value())?)
        .bind(id_to_i64("formation_id", item.formation_id.value())?)
        .bind(item.kind.as_str())
        .bind(i64::from(item.position))
        .bind(item.title.as_str())
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }
}
