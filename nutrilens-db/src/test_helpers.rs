//! Test helpers for nutrilens databases.

use crate::{error::DbResult, nutri_db::NutriDbPool, sqlite_runtime::create_in_memory_pool};

/// Create an in-memory database for testing
pub async fn create_test_pool() -> DbResult<NutriDbPool> {
    let pool = create_in_memory_pool(1).await?;
    NutriDbPool::run_migrations(&pool).await?;
    Ok(NutriDbPool::from_pool(pool))
}
