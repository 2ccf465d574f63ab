//! Inference task queue.
//!
//! SQLite has no row locks, so ownership of a task is expressed as a lease:
//! `claim_batch` stamps a `claim_token` onto runnable rows in a single
//! statement, and every later write is guarded by `id AND claim_token`.
//! A write that matches no row means the lease was reclaimed and the
//! caller must drop the task.

use std::fmt;

use chrono::Utc;
use nutrilens_core::{CanonicalResult, ErrorCode, TaskKind};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::food_logs::{FoodLogRepository, FoodLogStatus};

const TASK_COLUMNS: &str = "id, food_log_id, kind, status, attempts, last_error_code, \
     last_error_message, next_retry_at, poll_after_sec, claim_token, claimed_at, created_at, updated_at";

/// Inference task status types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    /// Failed with a scheduled retry, or reclaimed after a crash.
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(TaskStatus::Queued),
            "RUNNING" => Ok(TaskStatus::Running),
            "SUCCEEDED" => Ok(TaskStatus::Succeeded),
            "FAILED" => Ok(TaskStatus::Failed),
            "CANCELLED" => Ok(TaskStatus::Cancelled),
            _ => Err(DbError::Serialization(format!("Invalid task status: {}", s))),
        }
    }
}

/// Inference task record
#[derive(Debug, Clone)]
pub struct InferenceTask {
    pub id: String,
    pub food_log_id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    /// Provider invocations made so far
    pub attempts: u32,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    /// Earliest time a FAILED task becomes runnable again
    pub next_retry_at: Option<i64>,
    /// Poll hint for clients watching this task
    pub poll_after_sec: i64,
    pub claim_token: Option<String>,
    pub claimed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A task held under lease by one worker cycle.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub task: InferenceTask,
    pub lease_token: String,
}

/// Error details written to the task and mirrored to its food log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskError {
    pub code: String,
    pub message: String,
    pub retry_after_sec: Option<i64>,
}

impl TaskError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retry_after_sec: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after_sec: Option<i64>) -> Self {
        self.retry_after_sec = retry_after_sec;
        self
    }
}

/// What a cancellation does to the parent food log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoodLogEffect {
    /// The log already left the inference flow; leave it alone.
    Untouched,
    /// Mark the log FAILED with the task's error.
    Failed,
}

/// Outcome of a claimed task, applied atomically by [`TaskRepository::finish`].
#[derive(Debug, Clone)]
pub enum TaskFinish {
    Succeeded {
        result: CanonicalResult,
    },
    Cancelled {
        error: TaskError,
        food_log: FoodLogEffect,
    },
    RetryScheduled {
        error: TaskError,
        next_retry_at: i64,
        poll_after_sec: i64,
    },
}

/// Repository for inference_tasks table operations.
pub struct TaskRepository;

impl TaskRepository {
    pub(crate) async fn insert_queued(
        conn: &mut SqliteConnection,
        food_log_id: &str,
        kind: TaskKind,
        poll_after_sec: i64,
        now: i64,
    ) -> DbResult<InferenceTask> {
        let id = format!("task_{}", Uuid::new_v4());

        sqlx::query(
            "INSERT INTO inference_tasks (id, food_log_id, kind, status, attempts, poll_after_sec, created_at, updated_at)
             VALUES (?, ?, ?, 'QUEUED', 0, ?, ?, ?)",
        )
        .bind(&id)
        .bind(food_log_id)
        .bind(kind.as_str())
        .bind(poll_after_sec)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Self::fetch(conn, &id)
            .await?
            .ok_or_else(|| DbError::TaskNotFound(id.clone()))
    }

    /// Get task by ID
    pub async fn get_by_id(pool: &SqlitePool, id: &str) -> DbResult<Option<InferenceTask>> {
        let mut conn = pool.acquire().await?;
        Self::fetch(&mut conn, id).await
    }

    /// Most recent task for a food log.
    pub async fn get_for_food_log(
        pool: &SqlitePool,
        food_log_id: &str,
    ) -> DbResult<Option<InferenceTask>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM inference_tasks
             WHERE food_log_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1"
        ))
        .bind(food_log_id)
        .fetch_optional(pool)
        .await?;

        row.map(InferenceTask::try_from).transpose()
    }

    /// Lease up to `limit` runnable tasks.
    ///
    /// Runnable means QUEUED, or FAILED with `next_retry_at <= now`, and not
    /// already leased. Oldest first.
    pub async fn claim_batch(
        pool: &SqlitePool,
        limit: u32,
        now: i64,
    ) -> DbResult<Vec<ClaimedTask>> {
        let lease_token = format!("lease_{}", Uuid::new_v4());

        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE inference_tasks
             SET claim_token = ?, claimed_at = ?, updated_at = ?
             WHERE id IN (
                 SELECT id FROM inference_tasks
                 WHERE claim_token IS NULL
                   AND (status = 'QUEUED'
                        OR (status = 'FAILED' AND next_retry_at IS NOT NULL AND next_retry_at <= ?))
                 ORDER BY created_at ASC, rowid ASC
                 LIMIT ?
             )
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(&lease_token)
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;

        let mut tasks = rows
            .into_iter()
            .map(InferenceTask::try_from)
            .collect::<DbResult<Vec<_>>>()?;
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        if !tasks.is_empty() {
            debug!("Claimed {} task(s) under {}", tasks.len(), lease_token);
        }

        Ok(tasks
            .into_iter()
            .map(|task| ClaimedTask {
                task,
                lease_token: lease_token.clone(),
            })
            .collect())
    }

    /// Move a claimed task to RUNNING and count the provider invocation.
    pub async fn mark_running(pool: &SqlitePool, claimed: &ClaimedTask) -> DbResult<InferenceTask> {
        let now = Utc::now().timestamp();

        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE inference_tasks
             SET status = 'RUNNING', attempts = attempts + 1, next_retry_at = NULL,
                 claimed_at = ?, updated_at = ?
             WHERE id = ? AND claim_token = ? AND status IN ('QUEUED', 'FAILED')
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(now)
        .bind(now)
        .bind(&claimed.task.id)
        .bind(&claimed.lease_token)
        .fetch_optional(pool)
        .await?;

        let task = row
            .map(InferenceTask::try_from)
            .transpose()?
            .ok_or_else(|| DbError::LeaseLost(claimed.task.id.clone()))?;

        debug!("Task {} running (attempt {})", task.id, task.attempts);
        Ok(task)
    }

    /// Apply the outcome of a claimed task and release its lease.
    ///
    /// The task row and its food log change in one transaction. A success
    /// whose food log no longer accepts inference cancels the task instead.
    pub async fn finish(
        pool: &SqlitePool,
        claimed: &ClaimedTask,
        outcome: TaskFinish,
    ) -> DbResult<InferenceTask> {
        let task_id = claimed.task.id.as_str();
        let food_log_id = claimed.task.food_log_id.as_str();
        let now = Utc::now().timestamp();

        let mut tx = pool.begin().await?;

        let (status, error, next_retry_at, poll_after_sec) = match &outcome {
            TaskFinish::Succeeded { result } => {
                if FoodLogRepository::store_result(&mut tx, food_log_id, result, now).await? {
                    (TaskStatus::Succeeded, None, None, 0)
                } else {
                    let error = TaskError::new(
                        ErrorCode::FoodLogInactive.as_string(),
                        "Food log left the inference flow before the result was stored",
                    );
                    (TaskStatus::Cancelled, Some(error), None, 0)
                }
            }
            TaskFinish::Cancelled { error, food_log } => {
                if *food_log == FoodLogEffect::Failed {
                    FoodLogRepository::store_failure(
                        &mut tx,
                        food_log_id,
                        &error.code,
                        &error.message,
                        error.retry_after_sec,
                        now,
                    )
                    .await?;
                }
                (TaskStatus::Cancelled, Some(error.clone()), None, 0)
            }
            TaskFinish::RetryScheduled {
                error,
                next_retry_at,
                poll_after_sec,
            } => {
                FoodLogRepository::store_failure(
                    &mut tx,
                    food_log_id,
                    &error.code,
                    &error.message,
                    error.retry_after_sec,
                    now,
                )
                .await?;
                (
                    TaskStatus::Failed,
                    Some(error.clone()),
                    Some(*next_retry_at),
                    *poll_after_sec,
                )
            }
        };

        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE inference_tasks
             SET status = ?, last_error_code = ?, last_error_message = ?, next_retry_at = ?,
                 poll_after_sec = ?, claim_token = NULL, claimed_at = NULL, updated_at = ?
             WHERE id = ? AND claim_token = ?
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(status.as_str())
        .bind(error.as_ref().map(|e| e.code.as_str()))
        .bind(error.as_ref().map(|e| e.message.as_str()))
        .bind(next_retry_at)
        .bind(poll_after_sec)
        .bind(now)
        .bind(task_id)
        .bind(&claimed.lease_token)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            // Dropping the transaction rolls back the food log write.
            warn!("Lease on task {} lost before finishing", task_id);
            return Err(DbError::LeaseLost(task_id.to_string()));
        };
        let task = InferenceTask::try_from(row)?;

        tx.commit().await?;

        match &error {
            Some(e) => info!("Task {} -> {} ({})", task.id, task.status, e.code),
            None => info!("Task {} -> {}", task.id, task.status),
        }
        Ok(task)
    }

    /// Recover tasks abandoned by a crashed or hung worker.
    ///
    /// RUNNING tasks leased before `stale_before` become FAILED and
    /// immediately runnable, with `error` mirrored to the food log. Stale
    /// leases on rows that never started running are released. Returns the
    /// number of RUNNING tasks reset.
    pub async fn reclaim_stuck(
        pool: &SqlitePool,
        stale_before: i64,
        error: &TaskError,
    ) -> DbResult<u64> {
        let now = Utc::now().timestamp();
        let mut tx = pool.begin().await?;

        sqlx::query(
            "UPDATE food_logs
             SET status = 'FAILED', last_error_code = ?, last_error_message = ?,
                 retry_after_sec = NULL, updated_at = ?
             WHERE status IN ('PENDING', 'FAILED')
               AND id IN (
                   SELECT food_log_id FROM inference_tasks
                   WHERE status = 'RUNNING' AND claimed_at IS NOT NULL AND claimed_at < ?
               )",
        )
        .bind(&error.code)
        .bind(&error.message)
        .bind(now)
        .bind(stale_before)
        .execute(&mut *tx)
        .await?;

        let reset = sqlx::query(
            "UPDATE inference_tasks
             SET status = 'FAILED', last_error_code = ?, last_error_message = ?,
                 next_retry_at = ?, claim_token = NULL, claimed_at = NULL, updated_at = ?
             WHERE status = 'RUNNING' AND claimed_at IS NOT NULL AND claimed_at < ?",
        )
        .bind(&error.code)
        .bind(&error.message)
        .bind(now)
        .bind(now)
        .bind(stale_before)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let released = sqlx::query(
            "UPDATE inference_tasks
             SET claim_token = NULL, claimed_at = NULL, updated_at = ?
             WHERE status != 'RUNNING' AND claim_token IS NOT NULL
               AND (claimed_at IS NULL OR claimed_at < ?)",
        )
        .bind(now)
        .bind(stale_before)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        if reset > 0 || released > 0 {
            warn!(
                "Reclaimed {} stuck running task(s), released {} stale lease(s)",
                reset, released
            );
        }
        Ok(reset)
    }

    /// Requeue a failed or cancelled task from scratch.
    ///
    /// Attempts and errors are cleared and the food log goes back to
    /// PENDING. Leased, running, queued and succeeded tasks are rejected.
    pub async fn request_retry(
        pool: &SqlitePool,
        task_id: &str,
        poll_after_sec: i64,
    ) -> DbResult<InferenceTask> {
        let now = Utc::now().timestamp();
        let mut tx = pool.begin().await?;

        let task = Self::fetch(&mut tx, task_id)
            .await?
            .ok_or_else(|| DbError::TaskNotFound(task_id.to_string()))?;

        let retryable = matches!(task.status, TaskStatus::Failed | TaskStatus::Cancelled)
            && task.claim_token.is_none();
        if !retryable {
            return Err(DbError::InvalidTransition {
                from: task.status.to_string(),
                to: TaskStatus::Queued.to_string(),
            });
        }

        let food_log = FoodLogRepository::fetch(&mut tx, &task.food_log_id)
            .await?
            .ok_or_else(|| DbError::FoodLogNotFound(task.food_log_id.clone()))?;
        if !food_log.status.accepts_inference() {
            return Err(DbError::InvalidTransition {
                from: food_log.status.to_string(),
                to: FoodLogStatus::Pending.to_string(),
            });
        }

        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE inference_tasks
             SET status = 'QUEUED', attempts = 0, last_error_code = NULL, last_error_message = NULL,
                 next_retry_at = NULL, poll_after_sec = ?, updated_at = ?
             WHERE id = ? AND claim_token IS NULL AND status IN ('FAILED', 'CANCELLED')
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(poll_after_sec)
        .bind(now)
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(DbError::LeaseLost(task_id.to_string()));
        };
        let task = InferenceTask::try_from(row)?;

        FoodLogRepository::reset_pending(&mut tx, &task.food_log_id, now).await?;

        tx.commit().await?;

        info!("Task {} requeued by explicit retry", task.id);
        Ok(task)
    }

    async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<InferenceTask>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM inference_tasks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(InferenceTask::try_from).transpose()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: String,
    food_log_id: String,
    kind: String,
    status: String,
    attempts: i64,
    last_error_code: Option<String>,
    last_error_message: Option<String>,
    next_retry_at: Option<i64>,
    poll_after_sec: i64,
    claim_token: Option<String>,
    claimed_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<TaskRow> for InferenceTask {
    type Error = DbError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let kind: TaskKind = row.kind.parse().map_err(DbError::Serialization)?;
        let attempts = u32::try_from(row.attempts)
            .map_err(|_| DbError::Serialization(format!("Invalid attempts: {}", row.attempts)))?;

        Ok(InferenceTask {
            id: row.id,
            food_log_id: row.food_log_id,
            kind,
            status: row.status.parse()?,
            attempts,
            last_error_code: row.last_error_code,
            last_error_message: row.last_error_message,
            next_retry_at: row.next_retry_at,
            poll_after_sec: row.poll_after_sec,
            claim_token: row.claim_token,
            claimed_at: row.claimed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::food_logs::NewFoodLog;
    use crate::test_helpers::create_test_pool;

    async fn seed(pool: &SqlitePool) -> (String, InferenceTask) {
        let new_log = NewFoodLog {
            task_kind: TaskKind::Meal,
            image_key: Some("img".to_string()),
            provider: None,
        };
        let (log, task) = FoodLogRepository::create_with_task(pool, &new_log, 3)
            .await
            .unwrap();
        (log.id, task)
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();
        let (_, task) = seed(pool).await;

        let first = TaskRepository::claim_batch(pool, 10, now()).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].task.id, task.id);

        let second = TaskRepository::claim_batch(pool, 10, now()).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_claim_respects_limit_and_order() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();
        let (_, a) = seed(pool).await;
        let (_, b) = seed(pool).await;
        let (_, c) = seed(pool).await;

        let claimed = TaskRepository::claim_batch(pool, 2, now()).await.unwrap();
        assert_eq!(claimed.len(), 2);
        let rest = TaskRepository::claim_batch(pool, 2, now()).await.unwrap();
        assert_eq!(rest.len(), 1);

        let mut ids: Vec<_> = claimed.iter().chain(rest.iter()).map(|c| c.task.id.clone()).collect();
        ids.sort();
        let mut expected = vec![a.id, b.id, c.id];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_success_sets_draft_and_releases_lease() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();
        let (log_id, _) = seed(pool).await;

        let claimed = TaskRepository::claim_batch(pool, 1, now()).await.unwrap().remove(0);
        let running = TaskRepository::mark_running(pool, &claimed).await.unwrap();
        assert_eq!(running.status, TaskStatus::Running);
        assert_eq!(running.attempts, 1);

        let done = TaskRepository::finish(
            pool,
            &claimed,
            TaskFinish::Succeeded {
                result: CanonicalResult::no_food(),
            },
        )
        .await
        .unwrap();
        assert_eq!(done.status, TaskStatus::Succeeded);
        assert_eq!(done.poll_after_sec, 0);
        assert!(done.claim_token.is_none());

        let log = FoodLogRepository::get_by_id(pool, &log_id).await.unwrap().unwrap();
        assert_eq!(log.status, FoodLogStatus::Draft);
        assert!(log.effective.is_some());
    }

    #[tokio::test]
    async fn test_success_on_deleted_log_cancels_task() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();
        let (log_id, _) = seed(pool).await;

        let claimed = TaskRepository::claim_batch(pool, 1, now()).await.unwrap().remove(0);
        TaskRepository::mark_running(pool, &claimed).await.unwrap();
        FoodLogRepository::mark_deleted(pool, &log_id).await.unwrap();

        let done = TaskRepository::finish(
            pool,
            &claimed,
            TaskFinish::Succeeded {
                result: CanonicalResult::no_food(),
            },
        )
        .await
        .unwrap();
        assert_eq!(done.status, TaskStatus::Cancelled);
        assert_eq!(done.last_error_code.as_deref(), Some("FOOD_LOG_INACTIVE"));

        let log = FoodLogRepository::get_by_id(pool, &log_id).await.unwrap().unwrap();
        assert_eq!(log.status, FoodLogStatus::Deleted);
        assert!(log.effective.is_none());
    }

    #[tokio::test]
    async fn test_retry_schedule_gates_claim() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();
        let (log_id, _) = seed(pool).await;
        let t0 = now();

        let claimed = TaskRepository::claim_batch(pool, 1, t0).await.unwrap().remove(0);
        TaskRepository::mark_running(pool, &claimed).await.unwrap();
        let failed = TaskRepository::finish(
            pool,
            &claimed,
            TaskFinish::RetryScheduled {
                error: TaskError::new("PROVIDER_TIMEOUT", "timed out"),
                next_retry_at: t0 + 100,
                poll_after_sec: 100,
            },
        )
        .await
        .unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.next_retry_at, Some(t0 + 100));

        let log = FoodLogRepository::get_by_id(pool, &log_id).await.unwrap().unwrap();
        assert_eq!(log.status, FoodLogStatus::Failed);
        assert_eq!(log.last_error_code.as_deref(), Some("PROVIDER_TIMEOUT"));

        assert!(TaskRepository::claim_batch(pool, 1, t0 + 99).await.unwrap().is_empty());
        let again = TaskRepository::claim_batch(pool, 1, t0 + 100).await.unwrap();
        assert_eq!(again.len(), 1);

        let running = TaskRepository::mark_running(pool, &again[0]).await.unwrap();
        assert_eq!(running.attempts, 2);
        assert!(running.next_retry_at.is_none());
    }

    #[tokio::test]
    async fn test_stale_lease_cannot_write() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();
        let (log_id, _) = seed(pool).await;

        let claimed = TaskRepository::claim_batch(pool, 1, now()).await.unwrap().remove(0);
        TaskRepository::mark_running(pool, &claimed).await.unwrap();

        let error = TaskError::new("WORKER_TIMEOUT", "reclaimed");
        let reset = TaskRepository::reclaim_stuck(pool, now() + 1, &error).await.unwrap();
        assert_eq!(reset, 1);

        let task = TaskRepository::get_by_id(pool, &claimed.task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.claim_token.is_none());
        assert!(task.next_retry_at.is_some());

        let result = TaskRepository::finish(
            pool,
            &claimed,
            TaskFinish::Succeeded {
                result: CanonicalResult::no_food(),
            },
        )
        .await;
        assert!(matches!(result, Err(DbError::LeaseLost(_))));

        let log = FoodLogRepository::get_by_id(pool, &log_id).await.unwrap().unwrap();
        assert_eq!(log.status, FoodLogStatus::Failed);
        assert!(log.effective.is_none());
    }

    #[tokio::test]
    async fn test_reclaim_releases_unstarted_leases() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();
        seed(pool).await;

        let t0 = now();
        TaskRepository::claim_batch(pool, 1, t0).await.unwrap();
        let error = TaskError::new("WORKER_TIMEOUT", "reclaimed");
        let reset = TaskRepository::reclaim_stuck(pool, t0 + 1, &error).await.unwrap();
        assert_eq!(reset, 0);

        let claimable = TaskRepository::claim_batch(pool, 1, t0 + 1).await.unwrap();
        assert_eq!(claimable.len(), 1);
        assert_eq!(claimable[0].task.status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn test_request_retry_resets_cancelled_task() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();
        let (log_id, task) = seed(pool).await;

        let queued = TaskRepository::request_retry(pool, &task.id, 3).await;
        assert!(matches!(queued, Err(DbError::InvalidTransition { .. })));

        let claimed = TaskRepository::claim_batch(pool, 1, now()).await.unwrap().remove(0);
        TaskRepository::mark_running(pool, &claimed).await.unwrap();
        TaskRepository::finish(
            pool,
            &claimed,
            TaskFinish::Cancelled {
                error: TaskError::new("PROVIDER_AUTH_FAILED", "bad key"),
                food_log: FoodLogEffect::Failed,
            },
        )
        .await
        .unwrap();

        let retried = TaskRepository::request_retry(pool, &task.id, 3).await.unwrap();
        assert_eq!(retried.status, TaskStatus::Queued);
        assert_eq!(retried.attempts, 0);
        assert!(retried.last_error_code.is_none());

        let log = FoodLogRepository::get_by_id(pool, &log_id).await.unwrap().unwrap();
        assert_eq!(log.status, FoodLogStatus::Pending);
        assert!(log.last_error_code.is_none());

        let latest = TaskRepository::get_for_food_log(pool, &log_id).await.unwrap().unwrap();
        assert_eq!(latest.id, task.id);
    }

    #[tokio::test]
    async fn test_request_retry_rejects_inactive_log() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();
        let (log_id, task) = seed(pool).await;

        let claimed = TaskRepository::claim_batch(pool, 1, now()).await.unwrap().remove(0);
        FoodLogRepository::mark_deleted(pool, &log_id).await.unwrap();
        TaskRepository::finish(
            pool,
            &claimed,
            TaskFinish::Cancelled {
                error: TaskError::new(ErrorCode::FoodLogInactive.as_string(), "deleted"),
                food_log: FoodLogEffect::Untouched,
            },
        )
        .await
        .unwrap();

        let result = TaskRepository::request_retry(pool, &task.id, 3).await;
        assert!(matches!(result, Err(DbError::InvalidTransition { .. })));
    }
}
