//! Task worker: claim runnable tasks, run inference, record the outcome.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use nutrilens_core::{CanonicalResult, Settings, TaskKind, WorkerSettings};
use nutrilens_db::{
    ClaimedTask, DbError, DbResult, FoodLogEffect, FoodLogRepository, InferenceTask, TaskError,
    TaskFinish, TaskRepository, TaskStatus,
};
use sqlx::SqlitePool;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::analyzer::NutritionAnalyzer;
use crate::error::InferenceError;
use crate::error_mapper::{ErrorCode, MappedError, map_error};
use crate::limiter::{InFlightLimiter, LocalInFlightLimiter};
use crate::postprocess::{PostProcessor, SanityPostProcessor};
use crate::retry_policy::RetryPolicy;
use crate::router::{ProviderRouter, RoutedProvider};
use crate::storage::{BlobStore, load_inline_image};

/// Tally of one worker cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub claimed: usize,
    pub succeeded: usize,
    pub retry_scheduled: usize,
    pub cancelled: usize,
    /// Tasks whose lease was taken over before they finished.
    pub lost: usize,
    /// Tasks left untouched by a database error.
    pub errored: usize,
}

pub struct Worker {
    pool: SqlitePool,
    router: Arc<ProviderRouter>,
    blob_store: Arc<dyn BlobStore>,
    limiter: Arc<dyn InFlightLimiter>,
    postprocessor: Arc<dyn PostProcessor>,
    analyzer: NutritionAnalyzer,
    settings: WorkerSettings,
    meal_policy: RetryPolicy,
    label_policy: RetryPolicy,
}

impl Worker {
    pub fn new(
        pool: SqlitePool,
        router: Arc<ProviderRouter>,
        blob_store: Arc<dyn BlobStore>,
        settings: &Settings,
    ) -> Self {
        let worker = settings.worker.clone();
        Self {
            pool,
            router,
            blob_store,
            limiter: Arc::new(LocalInFlightLimiter::new(worker.max_in_flight_per_provider)),
            postprocessor: Arc::new(SanityPostProcessor),
            analyzer: NutritionAnalyzer::new(worker.max_repair_calls),
            meal_policy: RetryPolicy::new(&settings.retry, worker.max_attempts),
            label_policy: RetryPolicy::new(&settings.retry, worker.label_max_attempts),
            settings: worker,
        }
    }

    pub fn with_limiter(mut self, limiter: Arc<dyn InFlightLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_postprocessor(mut self, postprocessor: Arc<dyn PostProcessor>) -> Self {
        self.postprocessor = postprocessor;
        self
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    pub fn policy_for(&self, kind: TaskKind) -> &RetryPolicy {
        match kind {
            TaskKind::Meal => &self.meal_policy,
            TaskKind::Label => &self.label_policy,
        }
    }

    pub async fn run_cycle(&self) -> DbResult<CycleReport> {
        self.run_cycle_at(Utc::now().timestamp()).await
    }

    /// Claim one batch as of `now` and process it sequentially.
    pub async fn run_cycle_at(&self, now: i64) -> DbResult<CycleReport> {
        let batch = TaskRepository::claim_batch(&self.pool, self.settings.batch_size, now).await?;
        let mut report = CycleReport {
            claimed: batch.len(),
            ..CycleReport::default()
        };

        for claimed in batch {
            match self.process(&claimed, now).await {
                Ok(task) => match task.status {
                    TaskStatus::Succeeded => report.succeeded += 1,
                    TaskStatus::Failed => report.retry_scheduled += 1,
                    TaskStatus::Cancelled => report.cancelled += 1,
                    TaskStatus::Queued | TaskStatus::Running => {}
                },
                Err(DbError::LeaseLost(id)) => {
                    warn!("Task {} was taken over by another runner", id);
                    report.lost += 1;
                }
                Err(err) => {
                    warn!("Task {} failed to process: {}", claimed.task.id, err);
                    report.errored += 1;
                }
            }
        }

        Ok(report)
    }

    async fn process(&self, claimed: &ClaimedTask, now: i64) -> DbResult<InferenceTask> {
        let task = &claimed.task;
        let kind = task.kind;

        let food_log = FoodLogRepository::get_by_id(&self.pool, &task.food_log_id).await?;
        let Some(food_log) = food_log.filter(|log| log.status.accepts_inference()) else {
            debug!("Task {} has no active food log, cancelling", task.id);
            let error = TaskError::new(
                ErrorCode::FoodLogInactive.as_string(),
                "Food log was deleted or completed before inference ran",
            );
            return self.cancel(claimed, error, FoodLogEffect::Untouched).await;
        };

        let Some(image_key) = food_log
            .image_key
            .clone()
            .filter(|key| !key.trim().is_empty())
        else {
            let error = TaskError::new(
                ErrorCode::ImageMissing.as_string(),
                "Food log has no image to analyze",
            );
            return self.cancel(claimed, error, FoodLogEffect::Failed).await;
        };

        let policy = self.policy_for(kind);
        if policy.should_give_up(task.attempts) {
            let error = TaskError::new(
                ErrorCode::MaxAttemptsExceeded.as_string(),
                format!("Task already ran {} time(s)", task.attempts),
            );
            return self.cancel(claimed, error, FoodLogEffect::Failed).await;
        }

        let running = TaskRepository::mark_running(&self.pool, claimed).await?;

        let (provider_code, attempt) = match self.router.resolve(food_log.provider.as_deref()) {
            Ok(routed) => {
                let attempt = self.infer(&routed, &image_key, kind).await;
                (routed.code, attempt)
            }
            Err(err) => (String::new(), Err(err.into())),
        };

        let outcome = match attempt {
            Ok(result) => TaskFinish::Succeeded { result },
            Err(err) => {
                debug!("Task {} attempt {} failed: {}", running.id, running.attempts, err);
                self.on_failure(&map_error(&err), running.attempts, kind, now)
            }
        };

        let outcome = self.post_process(outcome, &provider_code, kind);
        TaskRepository::finish(&self.pool, claimed, outcome).await
    }

    async fn infer(
        &self,
        routed: &RoutedProvider,
        image_key: &str,
        kind: TaskKind,
    ) -> Result<CanonicalResult, InferenceError> {
        let image = load_inline_image(self.blob_store.as_ref(), image_key).await?;

        let _permit = self.limiter.acquire(&routed.code).await;
        self.analyzer
            .analyze(routed.client.as_ref(), image, kind)
            .await
    }

    /// Every success, degraded ones included, goes through the post-processor.
    fn post_process(&self, outcome: TaskFinish, provider_code: &str, kind: TaskKind) -> TaskFinish {
        match outcome {
            TaskFinish::Succeeded { result } => TaskFinish::Succeeded {
                result: self.postprocessor.apply(result, provider_code, kind),
            },
            other => other,
        }
    }

    /// Decide what a failed attempt turns into.
    fn on_failure(
        &self,
        mapped: &MappedError,
        attempts: u32,
        kind: TaskKind,
        now: i64,
    ) -> TaskFinish {
        let code = mapped.code.as_string();
        let error_with = |retry_after: Option<u64>| {
            TaskError::new(code.clone(), mapped.message.clone())
                .with_retry_after(retry_after.map(seconds_i64))
        };

        if mapped.code == ErrorCode::ProviderRateLimited {
            let wait = mapped
                .retry_after_sec
                .unwrap_or(self.settings.rate_limit_retry_after_seconds);
            return TaskFinish::Cancelled {
                error: error_with(Some(wait)),
                food_log: FoodLogEffect::Failed,
            };
        }

        let policy = self.policy_for(kind);

        if mapped.code.is_bad_response() {
            let last_allowed = policy
                .max_attempts()
                .min(self.settings.bad_response_max_attempts);
            if kind.tolerates_degradation() && attempts >= last_allowed {
                warn!(
                    "Degrading {} task to an unreadable result after {} bad response(s)",
                    kind, attempts
                );
                return TaskFinish::Succeeded {
                    result: CanonicalResult::no_label(),
                };
            }
            if attempts >= self.settings.bad_response_max_attempts {
                return TaskFinish::Cancelled {
                    error: error_with(None),
                    food_log: FoodLogEffect::Failed,
                };
            }
        }

        if !mapped.code.is_retryable() {
            return TaskFinish::Cancelled {
                error: error_with(mapped.retry_after_sec),
                food_log: FoodLogEffect::Failed,
            };
        }

        if policy.should_give_up(attempts) {
            let error = TaskError::new(
                ErrorCode::ProviderGiveUp.as_string(),
                format!("Gave up after {} attempt(s): {}", attempts, mapped.message),
            );
            return TaskFinish::Cancelled {
                error,
                food_log: FoodLogEffect::Failed,
            };
        }

        let delay = policy.delay_with_hint(attempts, mapped.retry_after_sec);
        TaskFinish::RetryScheduled {
            error: error_with(Some(delay)),
            next_retry_at: now.saturating_add(seconds_i64(delay)),
            poll_after_sec: seconds_i64(delay.max(u64::from(self.settings.poll_after_seconds))),
        }
    }

    async fn cancel(
        &self,
        claimed: &ClaimedTask,
        error: TaskError,
        food_log: FoodLogEffect,
    ) -> DbResult<InferenceTask> {
        TaskRepository::finish(&self.pool, claimed, TaskFinish::Cancelled { error, food_log }).await
    }

    /// Reset tasks stuck in RUNNING longer than the configured timeout.
    pub async fn reap_stuck_at(&self, now: i64) -> DbResult<u64> {
        let stale_before = now.saturating_sub(seconds_i64(self.settings.stuck_timeout_seconds));
        let error = TaskError::new(
            ErrorCode::WorkerTimeout.as_string(),
            "Worker did not finish the task in time",
        );
        TaskRepository::reclaim_stuck(&self.pool, stale_before, &error).await
    }

    pub async fn reap_stuck(&self) -> DbResult<u64> {
        self.reap_stuck_at(Utc::now().timestamp()).await
    }
}

fn seconds_i64(seconds: u64) -> i64 {
    i64::try_from(seconds).unwrap_or(i64::MAX)
}

/// Spawn the worker loop; the first cycle runs one interval after start.
pub fn start_worker_runner(worker: Arc<Worker>) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_secs(worker.settings.interval_seconds.max(1));
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let batch_size = worker.settings.batch_size;
    let handle = tokio::spawn(async move {
        loop {
            interval.tick().await;
            match worker.run_cycle().await {
                Ok(report) if report.claimed > 0 => info!(
                    "worker cycle: claimed={} succeeded={} retry={} cancelled={} lost={} errored={}",
                    report.claimed,
                    report.succeeded,
                    report.retry_scheduled,
                    report.cancelled,
                    report.lost,
                    report.errored
                ),
                Ok(_) => {}
                Err(err) => warn!("worker cycle failed: {}", err),
            }
        }
    });

    info!(
        "task worker started (interval_seconds={}, batch_size={})",
        period.as_secs(),
        batch_size
    );
    handle
}

/// Spawn the stuck-task reaper loop.
pub fn start_reaper_runner(worker: Arc<Worker>) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_secs(worker.settings.reaper_interval_seconds.max(1));
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let timeout = worker.settings.stuck_timeout_seconds;
    let handle = tokio::spawn(async move {
        loop {
            interval.tick().await;
            if let Err(err) = worker.reap_stuck().await {
                warn!("stuck task reaper failed: {}", err);
            }
        }
    });

    info!(
        "stuck task reaper started (interval_seconds={}, stuck_timeout_seconds={})",
        period.as_secs(),
        timeout
    );
    handle
}
