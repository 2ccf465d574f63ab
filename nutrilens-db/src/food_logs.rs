//! Food log storage: the parent records that inference tasks enrich.

use std::fmt;

use chrono::Utc;
use nutrilens_core::{CanonicalResult, TaskKind};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::tasks::{InferenceTask, TaskRepository};

/// Food log status types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FoodLogStatus {
    /// Waiting for inference.
    Pending,
    /// Inference produced a result the user can review.
    Draft,
    /// The latest inference attempt failed.
    Failed,
    /// The user accepted the entry; inference no longer applies.
    Confirmed,
    Deleted,
}

impl FoodLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FoodLogStatus::Pending => "PENDING",
            FoodLogStatus::Draft => "DRAFT",
            FoodLogStatus::Failed => "FAILED",
            FoodLogStatus::Confirmed => "CONFIRMED",
            FoodLogStatus::Deleted => "DELETED",
        }
    }

    /// Whether an inference result may still be written to the log.
    pub fn accepts_inference(&self) -> bool {
        matches!(self, FoodLogStatus::Pending | FoodLogStatus::Failed)
    }
}

impl fmt::Display for FoodLogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FoodLogStatus {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(FoodLogStatus::Pending),
            "DRAFT" => Ok(FoodLogStatus::Draft),
            "FAILED" => Ok(FoodLogStatus::Failed),
            "CONFIRMED" => Ok(FoodLogStatus::Confirmed),
            "DELETED" => Ok(FoodLogStatus::Deleted),
            _ => Err(DbError::Serialization(format!(
                "Invalid food log status: {}",
                s
            ))),
        }
    }
}

/// Food log record
#[derive(Debug, Clone)]
pub struct FoodLog {
    pub id: String,
    pub status: FoodLogStatus,
    pub task_kind: TaskKind,
    /// Blob store key of the submitted image
    pub image_key: Option<String>,
    /// Declared provider code
    pub provider: Option<String>,
    /// Canonical result once inference succeeded
    pub effective: Option<CanonicalResult>,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    /// Suggested wait before a manual retry
    pub retry_after_sec: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input for creating a food log.
#[derive(Debug, Clone)]
pub struct NewFoodLog {
    pub task_kind: TaskKind,
    pub image_key: Option<String>,
    pub provider: Option<String>,
}

/// Repository for food_logs table operations.
pub struct FoodLogRepository;

impl FoodLogRepository {
    /// Create a PENDING food log together with its QUEUED inference task.
    pub async fn create_with_task(
        pool: &SqlitePool,
        new_log: &NewFoodLog,
        poll_after_sec: i64,
    ) -> DbResult<(FoodLog, InferenceTask)> {
        let id = format!("log_{}", Uuid::new_v4());
        let now = Utc::now().timestamp();

        let mut tx = pool.begin().await?;

        sqlx::query(
            "INSERT INTO food_logs (id, status, task_kind, image_key, provider, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(FoodLogStatus::Pending.as_str())
        .bind(new_log.task_kind.as_str())
        .bind(&new_log.image_key)
        .bind(&new_log.provider)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let task =
            TaskRepository::insert_queued(&mut tx, &id, new_log.task_kind, poll_after_sec, now)
                .await?;
        let log = Self::fetch(&mut tx, &id)
            .await?
            .ok_or_else(|| DbError::FoodLogNotFound(id.clone()))?;

        tx.commit().await?;

        info!(
            "Created food log {} (kind: {}, task: {})",
            id, new_log.task_kind, task.id
        );
        Ok((log, task))
    }

    /// Get food log by ID
    pub async fn get_by_id(pool: &SqlitePool, id: &str) -> DbResult<Option<FoodLog>> {
        let mut conn = pool.acquire().await?;
        Self::fetch(&mut conn, id).await
    }

    /// Mark a food log deleted. Pending inference is cancelled by the worker.
    pub async fn mark_deleted(pool: &SqlitePool, id: &str) -> DbResult<FoodLog> {
        Self::transition(pool, id, FoodLogStatus::Deleted, |status| {
            status != FoodLogStatus::Deleted
        })
        .await
    }

    /// Confirm a drafted food log.
    pub async fn mark_confirmed(pool: &SqlitePool, id: &str) -> DbResult<FoodLog> {
        Self::transition(pool, id, FoodLogStatus::Confirmed, |status| {
            status == FoodLogStatus::Draft
        })
        .await
    }

    async fn transition(
        pool: &SqlitePool,
        id: &str,
        to: FoodLogStatus,
        allowed: impl Fn(FoodLogStatus) -> bool,
    ) -> DbResult<FoodLog> {
        let log = Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| DbError::FoodLogNotFound(id.to_string()))?;

        if !allowed(log.status) {
            return Err(DbError::InvalidTransition {
                from: log.status.to_string(),
                to: to.to_string(),
            });
        }

        let now = Utc::now().timestamp();
        sqlx::query("UPDATE food_logs SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(now)
            .bind(id)
            .bind(log.status.as_str())
            .execute(pool)
            .await?;

        info!("Food log {} moved {} -> {}", id, log.status, to);

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| DbError::FoodLogNotFound(id.to_string()))
    }

    pub(crate) async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<FoodLog>> {
        let row = sqlx::query_as::<_, FoodLogRow>(
            "SELECT id, status, task_kind, image_key, provider, effective_json, last_error_code,
                    last_error_message, retry_after_sec, created_at, updated_at
             FROM food_logs
             WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(FoodLog::try_from).transpose()
    }

    /// Store a successful result. Returns false if the log no longer accepts inference.
    pub(crate) async fn store_result(
        conn: &mut SqliteConnection,
        id: &str,
        result: &CanonicalResult,
        now: i64,
    ) -> DbResult<bool> {
        let effective_json =
            serde_json::to_string(result).map_err(|e| DbError::Serialization(e.to_string()))?;

        let updated = sqlx::query(
            "UPDATE food_logs
             SET status = 'DRAFT', effective_json = ?, last_error_code = NULL,
                 last_error_message = NULL, retry_after_sec = NULL, updated_at = ?
             WHERE id = ? AND status IN ('PENDING', 'FAILED')",
        )
        .bind(&effective_json)
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;

        Ok(updated.rows_affected() == 1)
    }

    /// Mirror a task failure onto the log.
    pub(crate) async fn store_failure(
        conn: &mut SqliteConnection,
        id: &str,
        code: &str,
        message: &str,
        retry_after_sec: Option<i64>,
        now: i64,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE food_logs
             SET status = 'FAILED', last_error_code = ?, last_error_message = ?,
                 retry_after_sec = ?, updated_at = ?
             WHERE id = ? AND status IN ('PENDING', 'FAILED')",
        )
        .bind(code)
        .bind(message)
        .bind(retry_after_sec)
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Put a failed log back to PENDING for a manual retry.
    pub(crate) async fn reset_pending(
        conn: &mut SqliteConnection,
        id: &str,
        now: i64,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE food_logs
             SET status = 'PENDING', last_error_code = NULL, last_error_message = NULL,
                 retry_after_sec = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FoodLogRow {
    id: String,
    status: String,
    task_kind: String,
    image_key: Option<String>,
    provider: Option<String>,
    effective_json: Option<String>,
    last_error_code: Option<String>,
    last_error_message: Option<String>,
    retry_after_sec: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<FoodLogRow> for FoodLog {
    type Error = DbError;

    fn try_from(row: FoodLogRow) -> Result<Self, Self::Error> {
        let task_kind: TaskKind = row.task_kind.parse().map_err(DbError::Serialization)?;
        let effective = row
            .effective_json
            .as_deref()
            .map(serde_json::from_str::<CanonicalResult>)
            .transpose()
            .map_err(|e| DbError::Serialization(e.to_string()))?;

        Ok(FoodLog {
            id: row.id,
            status: row.status.parse()?,
            task_kind,
            image_key: row.image_key,
            provider: row.provider,
            effective,
            last_error_code: row.last_error_code,
            last_error_message: row.last_error_message,
            retry_after_sec: row.retry_after_sec,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskStatus;
    use crate::test_helpers::create_test_pool;

    fn meal(image_key: Option<&str>) -> NewFoodLog {
        NewFoodLog {
            task_kind: TaskKind::Meal,
            image_key: image_key.map(str::to_string),
            provider: Some("gemini".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_with_task() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();

        let (log, task) = FoodLogRepository::create_with_task(pool, &meal(Some("abc")), 3)
            .await
            .unwrap();

        assert!(log.id.starts_with("log_"));
        assert_eq!(log.status, FoodLogStatus::Pending);
        assert_eq!(log.image_key.as_deref(), Some("abc"));
        assert!(log.effective.is_none());

        assert_eq!(task.food_log_id, log.id);
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.attempts, 0);
        assert_eq!(task.poll_after_sec, 3);
        assert!(task.next_retry_at.is_none());
    }

    #[tokio::test]
    async fn test_confirm_requires_draft() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();

        let (log, _) = FoodLogRepository::create_with_task(pool, &meal(None), 3)
            .await
            .unwrap();

        let result = FoodLogRepository::mark_confirmed(pool, &log.id).await;
        assert!(matches!(result, Err(DbError::InvalidTransition { .. })));

        let deleted = FoodLogRepository::mark_deleted(pool, &log.id).await.unwrap();
        assert_eq!(deleted.status, FoodLogStatus::Deleted);

        let again = FoodLogRepository::mark_deleted(pool, &log.id).await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_store_result_round_trips_canonical_json() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();

        let (log, _) = FoodLogRepository::create_with_task(pool, &meal(Some("k")), 3)
            .await
            .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let stored = FoodLogRepository::store_result(&mut conn, &log.id, &CanonicalResult::no_food(), 1)
            .await
            .unwrap();
        assert!(stored);
        drop(conn);

        let log = FoodLogRepository::get_by_id(pool, &log.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.status, FoodLogStatus::Draft);
        assert_eq!(log.effective, Some(CanonicalResult::no_food()));

        let confirmed = FoodLogRepository::mark_confirmed(pool, &log.id).await.unwrap();
        assert_eq!(confirmed.status, FoodLogStatus::Confirmed);
    }
}
