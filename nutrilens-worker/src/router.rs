//! Provider routing by declared provider code.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use nutrilens_core::{Config, ProviderKind};
use tracing::{debug, info, warn};

use crate::providers::{GeminiClient, OpenAiCompatibleClient, Provider, StubProvider};

/// Code reported for the built-in stub fallback.
pub const STUB_PROVIDER_CODE: &str = "stub";

#[derive(Debug, Clone, thiserror::Error)]
pub enum RouteError {
    #[error("provider '{0}' is not configured")]
    NotConfigured(String),

    #[error("provider '{0}' is configured but unavailable")]
    NotAvailable(String),
}

/// A provider client together with the code it was resolved under.
#[derive(Clone)]
pub struct RoutedProvider {
    pub code: String,
    pub client: Arc<dyn Provider>,
}

impl std::fmt::Debug for RoutedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutedProvider")
            .field("code", &self.code)
            .field("model", &self.client.model())
            .finish()
    }
}

/// Maps provider codes to ready clients.
///
/// Lenient routing falls back from the declared code to the default code and
/// then to the stub. Strict routing fails instead of falling back.
pub struct ProviderRouter {
    clients: HashMap<String, Arc<dyn Provider>>,
    /// Every code present in settings, including ones that failed to build.
    configured: BTreeSet<String>,
    default_code: Option<String>,
    strict: bool,
    stub: Arc<dyn Provider>,
}

impl ProviderRouter {
    pub fn new(default_code: Option<String>, strict: bool) -> Self {
        Self {
            clients: HashMap::new(),
            configured: BTreeSet::new(),
            default_code,
            strict,
            stub: Arc::new(StubProvider::new()),
        }
    }

    /// Register a ready client under `code`.
    pub fn with_provider(mut self, code: impl Into<String>, client: Arc<dyn Provider>) -> Self {
        let code = code.into();
        self.configured.insert(code.clone());
        self.clients.insert(code, client);
        self
    }

    /// Mark `code` as configured without a usable client.
    pub fn with_unavailable(mut self, code: impl Into<String>) -> Self {
        self.configured.insert(code.into());
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Codes with a usable client, sorted.
    pub fn available_codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.clients.keys().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }

    /// Resolve a client for a food log's declared provider code.
    pub fn resolve(&self, declared: Option<&str>) -> Result<RoutedProvider, RouteError> {
        let declared = declared.map(str::trim).filter(|code| !code.is_empty());

        if let Some(code) = declared {
            if let Some(routed) = self.lookup(code) {
                return Ok(routed);
            }
            if self.strict {
                return Err(self.missing(code));
            }
            debug!("Provider '{}' unavailable, falling back", code);
        }

        match self.default_code.as_deref() {
            Some(code) => {
                if let Some(routed) = self.lookup(code) {
                    return Ok(routed);
                }
                if self.strict {
                    return Err(self.missing(code));
                }
            }
            None if self.strict => {
                return Err(RouteError::NotConfigured("<default>".to_string()));
            }
            None => {}
        }

        Ok(RoutedProvider {
            code: STUB_PROVIDER_CODE.to_string(),
            client: Arc::clone(&self.stub),
        })
    }

    fn lookup(&self, code: &str) -> Option<RoutedProvider> {
        self.clients.get(code).map(|client| RoutedProvider {
            code: code.to_string(),
            client: Arc::clone(client),
        })
    }

    fn missing(&self, code: &str) -> RouteError {
        if self.configured.contains(code) {
            RouteError::NotAvailable(code.to_string())
        } else {
            RouteError::NotConfigured(code.to_string())
        }
    }
}

/// Build the router from settings, skipping providers without credentials.
pub fn build_from_config(config: &Config) -> ProviderRouter {
    let settings = &config.settings;
    let dump_queries = settings.logging.dump_queries;
    let mut router = ProviderRouter::new(
        settings.default_provider.clone(),
        settings.strict_provider_routing,
    );

    for (code, provider_config) in &settings.providers {
        let timeout = Duration::from_secs(provider_config.request_timeout_seconds.max(1));

        let api_key = match config.api_key_for(code) {
            Ok(value) => value,
            Err(err) => {
                info!(
                    "Skipping provider '{}' ({}) - API key resolution error: {}",
                    code, provider_config.kind, err
                );
                router = router.with_unavailable(code.clone());
                continue;
            }
        };

        let client: Arc<dyn Provider> = match provider_config.kind {
            ProviderKind::Gemini => {
                let Some(api_key) = api_key else {
                    info!(
                        "Skipping provider '{}' (gemini) - no API key configured",
                        code
                    );
                    router = router.with_unavailable(code.clone());
                    continue;
                };
                let built = GeminiClient::new(api_key, &provider_config.model, timeout).map(
                    |client| {
                        let client = client.with_dump_queries(dump_queries);
                        match provider_config.base_url.as_deref() {
                            Some(base_url) => client.with_base_url(base_url),
                            None => client,
                        }
                    },
                );
                match built {
                    Ok(client) => Arc::new(client),
                    Err(err) => {
                        warn!("Failed to build gemini client for '{}': {}", code, err);
                        router = router.with_unavailable(code.clone());
                        continue;
                    }
                }
            }
            ProviderKind::OpenAiCompatible => {
                let Some(base_url) = provider_config.base_url.clone() else {
                    info!(
                        "Skipping provider '{}' (openai_compatible) - no base_url configured",
                        code
                    );
                    router = router.with_unavailable(code.clone());
                    continue;
                };
                match OpenAiCompatibleClient::new(
                    base_url,
                    api_key,
                    &provider_config.model,
                    code.as_str(),
                    timeout,
                ) {
                    Ok(client) => Arc::new(client.with_dump_queries(dump_queries)),
                    Err(err) => {
                        warn!(
                            "Failed to build openai_compatible client for '{}': {}",
                            code, err
                        );
                        router = router.with_unavailable(code.clone());
                        continue;
                    }
                }
            }
            ProviderKind::Stub => Arc::new(StubProvider::new()),
        };

        info!(
            "Provider '{}' ready ({} / {})",
            code, provider_config.kind, provider_config.model
        );
        router = router.with_provider(code.clone(), client);
    }

    router
}
