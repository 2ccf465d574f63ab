use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nutrilens_worker::router;
use nutrilens_worker::{FsBlobStore, Worker, start_reaper_runner, start_worker_runner};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    nutrilens_core::load_dotenv();

    // Load configuration
    let config = nutrilens_core::Config::load()?;

    // Initialize tracing; RUST_LOG wins over the configured level
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.settings.logging.level.as_str().into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Configuration loaded ({} provider(s), default: {}, strict routing: {})",
        config.settings.providers.len(),
        config.settings.default_provider.as_deref().unwrap_or("<stub>"),
        config.settings.strict_provider_routing
    );

    // Initialize database
    let db_path = config.database_path()?;
    let db = nutrilens_db::NutriDbPool::open(&db_path).await?;
    info!("Database ready at {}", db_path.display());

    // Provider clients
    let router = router::build_from_config(&config);
    let available = router.available_codes();
    if available.is_empty() {
        warn!("No provider has usable credentials; lenient routing will use the stub");
    } else {
        info!("Providers available: {}", available.join(", "));
    }

    let storage_root = config.storage_root()?;
    tokio::fs::create_dir_all(&storage_root).await?;
    info!("Blob store rooted at {}", storage_root.display());

    let worker = Arc::new(Worker::new(
        db.pool().clone(),
        Arc::new(router),
        Arc::new(FsBlobStore::new(storage_root)),
        &config.settings,
    ));

    let worker_task = start_worker_runner(Arc::clone(&worker));
    let reaper_task = start_reaper_runner(Arc::clone(&worker));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    worker_task.abort();
    reaper_task.abort();
    db.close().await;

    Ok(())
}
