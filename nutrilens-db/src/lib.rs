//! nutrilens-db: SQLite persistence for food logs and their inference tasks.
//!
//! This crate provides:
//! - Food log records and their user-facing status transitions
//! - The inference task queue with lease-based claiming
//! - Stuck-task recovery and explicit retry

pub mod error;
pub mod food_logs;
pub mod nutri_db;
mod sqlite_runtime;
pub mod tasks;

// Re-export commonly used types
pub use error::{DbError, DbResult};
pub use food_logs::{FoodLog, FoodLogRepository, FoodLogStatus, NewFoodLog};
pub use nutri_db::NutriDbPool;
pub use tasks::{
    ClaimedTask, FoodLogEffect, InferenceTask, TaskError, TaskFinish, TaskRepository, TaskStatus,
};

// Re-export test helpers when running tests or when test-helpers feature is enabled
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
