//! Shared helpers for integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use nutrilens_core::{Settings, TaskKind};
use nutrilens_db::{FoodLog, FoodLogRepository, InferenceTask, NewFoodLog, NutriDbPool};
use nutrilens_worker::{
    FsBlobStore, Provider, ProviderError, ProviderRequest, ProviderResponse, ProviderRouter,
    Worker,
};

pub const SCRIPTED_CODE: &str = "scripted";

pub const GOOD_MEAL: &str = r#"{"foodName":"Kimchi fried rice","quantity":{"value":1,"unit":"SERVING"},"nutrients":{"caloriesKcal":610,"proteinG":18,"carbsG":92,"fatG":19,"fiberG":4,"sugarG":6,"sodiumMg":1350},"confidence":0.82,"warnings":["PORTION_ESTIMATED"]}"#;

/// Provider that replays a script, then keeps answering with `fallback`.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    requests: Mutex<Vec<ProviderRequest>>,
}

#[derive(Clone)]
pub enum Reply {
    Text(String),
    Refusal(String),
    Status(u16, String),
}

impl Reply {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }

    fn into_result(self) -> Result<ProviderResponse, ProviderError> {
        match self {
            Reply::Text(text) => Ok(ProviderResponse::from_text(SCRIPTED_CODE, text)),
            Reply::Refusal(reason) => {
                let mut response = ProviderResponse::from_text(SCRIPTED_CODE, "");
                response.refusal = Some(reason);
                Ok(response)
            }
            Reply::Status(status, message) => Err(ProviderError::ApiError {
                status,
                message,
                retry_after: None,
            }),
        }
    }
}

impl ScriptedProvider {
    pub fn new(script: Vec<Reply>, fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(script.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn always(reply: Reply) -> Arc<Self> {
        Self::new(Vec::new(), reply)
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        SCRIPTED_CODE
    }

    fn model(&self) -> &str {
        "scripted-vision"
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        reply.into_result()
    }
}

/// In-memory database, blob directory and a worker wired to one provider.
pub struct Harness {
    pub db: NutriDbPool,
    pub blobs: tempfile::TempDir,
    pub worker: Worker,
}

impl Harness {
    pub async fn new(provider: Arc<ScriptedProvider>) -> Self {
        Self::with_settings(provider, Settings::default()).await
    }

    pub async fn with_settings(provider: Arc<ScriptedProvider>, settings: Settings) -> Self {
        let db = nutrilens_db::test_helpers::create_test_pool()
            .await
            .expect("test pool");
        let blobs = tempfile::tempdir().expect("blob dir");

        let router = ProviderRouter::new(
            settings.default_provider.clone(),
            settings.strict_provider_routing,
        )
        .with_provider(SCRIPTED_CODE, provider);

        let worker = Worker::new(
            db.pool().clone(),
            Arc::new(router),
            Arc::new(FsBlobStore::new(blobs.path())),
            &settings,
        );

        Self { db, blobs, worker }
    }

    /// Write an image blob and create a food log with its queued task.
    pub async fn submit(&self, kind: TaskKind, provider: Option<&str>) -> (FoodLog, InferenceTask) {
        let key = format!("{}.jpg", uuid::Uuid::new_v4());
        std::fs::write(self.blobs.path().join(&key), b"\xff\xd8\xff\xe0fake").expect("write blob");
        self.submit_with_key(kind, provider, Some(key)).await
    }

    pub async fn submit_with_key(
        &self,
        kind: TaskKind,
        provider: Option<&str>,
        image_key: Option<String>,
    ) -> (FoodLog, InferenceTask) {
        let new_log = NewFoodLog {
            task_kind: kind,
            image_key,
            provider: provider.map(str::to_string),
        };
        FoodLogRepository::create_with_task(self.db.pool(), &new_log, 3)
            .await
            .expect("create food log")
    }

    pub async fn food_log(&self, id: &str) -> FoodLog {
        FoodLogRepository::get_by_id(self.db.pool(), id)
            .await
            .expect("query food log")
            .expect("food log exists")
    }

    pub async fn task(&self, id: &str) -> InferenceTask {
        nutrilens_db::TaskRepository::get_by_id(self.db.pool(), id)
            .await
            .expect("query task")
            .expect("task exists")
    }
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
