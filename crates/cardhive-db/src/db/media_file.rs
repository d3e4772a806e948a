use cardhive_core::models::{
    FindMediaFilesQuery, MediaFile, MediaFileStatus, Pagination, SortOrder,
};
use cardhive_core::AppError;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

/// Media file repository
///
/// Owns the `media_files` table. Status transitions go through the
/// dedicated methods so the lifecycle stays one-directional; there is no
/// generic update.
#[derive(Clone)]
pub struct MediaFileRepository {
    pool: PgPool,
}

impl MediaFileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new record in `INITIALIZED` state with zero progress.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        bucket: &str,
        key: &str,
        file_name: &str,
        content_type: &str,
        size: i64,
        metadata: Option<&JsonValue>,
        user_id: Option<Uuid>,
    ) -> Result<MediaFile, AppError> {
        let row = sqlx::query_as::<Postgres, MediaFile>(
            r#"
            INSERT INTO media_files (bucket, key, file_name, content_type, size, status, progress, metadata, user_id)
            VALUES ($1, $2, $3, $4, $5, $6, 0, $7, $8)
            RETURNING *
            "#,
        )
        .bind(bucket)
        .bind(key)
        .bind(file_name)
        .bind(content_type)
        .bind(size)
        .bind(MediaFileStatus::Initialized)
        .bind(metadata)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<MediaFile>, AppError> {
        let row = sqlx::query_as::<Postgres, MediaFile>("SELECT * FROM media_files WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    /// Persist an intermediate progress value. Returns the updated record,
    /// or `None` when the record no longer exists.
    pub async fn update_progress(
        &self,
        id: Uuid,
        progress: i32,
        status: MediaFileStatus,
    ) -> Result<Option<MediaFile>, AppError> {
        let row = sqlx::query_as::<Postgres, MediaFile>(
            r#"
            UPDATE media_files
            SET progress = $2, status = $3, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(progress)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Terminal success transition: `COMPLETED`, progress 100, with the
    /// storage-reported ETag, URL and observed size.
    pub async fn mark_completed(
        &self,
        id: Uuid,
        e_tag: Option<&str>,
        url: &str,
        size: i64,
    ) -> Result<Option<MediaFile>, AppError> {
        let row = sqlx::query_as::<Postgres, MediaFile>(
            r#"
            UPDATE media_files
            SET status = $2, progress = 100, e_tag = $3, url = $4, size = $5, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(MediaFileStatus::Completed)
        .bind(e_tag)
        .bind(url)
        .bind(size)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Terminal failure transition. `progress` is the last value observed
    /// before the failure; size and e_tag keep their last-known values.
    pub async fn mark_failed(
        &self,
        id: Uuid,
        progress: i32,
    ) -> Result<Option<MediaFile>, AppError> {
        let row = sqlx::query_as::<Postgres, MediaFile>(
            r#"
            UPDATE media_files
            SET status = $2, progress = $3, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(MediaFileStatus::Failed)
        .bind(progress)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// List media files with optional filters and pagination.
    ///
    /// All filters are ANDed. `file_name` and `content_type` are
    /// case-insensitive substring matches; every other filter is an exact
    /// or range comparison.
    pub async fn find_many(
        &self,
        query: &FindMediaFilesQuery,
    ) -> Result<(Vec<MediaFile>, Pagination), AppError> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let offset = (page as i64 - 1) * limit as i64;

        let mut where_parts: Vec<String> = Vec::new();
        let mut param_index = 0usize;
        let mut next = |part: &str| -> String {
            param_index += 1;
            part.replace("{}", &format!("${}", param_index))
        };

        let file_name_pattern = query.file_name.as_ref().map(|v| format!("%{}%", v));
        let content_type_pattern = query.content_type.as_ref().map(|v| format!("%{}%", v));

        if query.status.is_some() {
            where_parts.push(next("status = {}"));
        }
        if file_name_pattern.is_some() {
            where_parts.push(next("file_name ILIKE {}"));
        }
        if content_type_pattern.is_some() {
            where_parts.push(next("content_type ILIKE {}"));
        }
        if query.user_id.is_some() {
            where_parts.push(next("user_id = {}"));
        }
        if query.created_after.is_some() {
            where_parts.push(next("created_at >= {}"));
        }
        if query.created_before.is_some() {
            where_parts.push(next("created_at <= {}"));
        }
        if query.size_min.is_some() {
            where_parts.push(next("size >= {}"));
        }
        if query.size_max.is_some() {
            where_parts.push(next("size <= {}"));
        }

        let where_clause = if where_parts.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_parts.join(" AND "))
        };
        let order = match query.order.unwrap_or_default() {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };

        let list_sql = format!(
            "SELECT * FROM media_files {} ORDER BY created_at {} LIMIT ${} OFFSET ${}",
            where_clause,
            order,
            param_index + 1,
            param_index + 2
        );
        let count_sql = format!("SELECT COUNT(*) FROM media_files {}", where_clause);

        macro_rules! bind_filters {
            ($q:expr) => {{
                let mut q = $q;
                if let Some(status) = query.status {
                    q = q.bind(status);
                }
                if let Some(ref pattern) = file_name_pattern {
                    q = q.bind(pattern);
                }
                if let Some(ref pattern) = content_type_pattern {
                    q = q.bind(pattern);
                }
                if let Some(user_id) = query.user_id {
                    q = q.bind(user_id);
                }
                if let Some(created_after) = query.created_after {
                    q = q.bind(created_after);
                }
                if let Some(created_before) = query.created_before {
                    q = q.bind(created_before);
                }
                if let Some(size_min) = query.size_min {
                    q = q.bind(size_min);
                }
                if let Some(size_max) = query.size_max {
                    q = q.bind(size_max);
                }
                q
            }};
        }

        let rows = bind_filters!(sqlx::query_as::<Postgres, MediaFile>(&list_sql))
            .bind(limit as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let total: i64 = bind_filters!(sqlx::query_scalar::<Postgres, i64>(&count_sql))
            .fetch_one(&self.pool)
            .await?;

        let total_pages = (total + limit as i64 - 1) / limit as i64;

        Ok((
            rows,
            Pagination {
                page,
                limit,
                total,
                total_pages,
            },
        ))
    }

    /// All records currently in `FAILED` state, oldest first.
    pub async fn find_failed(&self) -> Result<Vec<MediaFile>, AppError> {
        let rows = sqlx::query_as::<Postgres, MediaFile>(
            "SELECT * FROM media_files WHERE status = $1 ORDER BY updated_at ASC",
        )
        .bind(MediaFileStatus::Failed)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Delete every `FAILED` record, returning the number removed.
    pub async fn delete_failed(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM media_files WHERE status = $1")
            .bind(MediaFileStatus::Failed)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
