//! Raw provider traffic dumps for debugging (`[logging] dump_queries = true`).
//!
//! Each call writes `./logs/queries/{timestamp}-{provider}-{model}.request.json`
//! and a matching `.response.json`. Inline image payloads are elided. Write
//! failures only log a warning.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;
use tracing::warn;

const QUERY_DIR: &str = "./logs/queries";

/// Strings longer than this that look like base64 are replaced.
const ELIDE_MIN_CHARS: usize = 512;

/// Pairs the request dump with its response.
pub struct QueryDump {
    base: PathBuf,
}

impl QueryDump {
    /// Dump the request and return a handle for the response.
    pub async fn request(provider: &str, model: &str, value: &Value) -> Option<Self> {
        Self::request_in(Path::new(QUERY_DIR), provider, model, value).await
    }

    async fn request_in(dir: &Path, provider: &str, model: &str, value: &Value) -> Option<Self> {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!("dump_queries: failed to create {}: {}", dir.display(), e);
            return None;
        }

        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
        let base = dir.join(format!(
            "{}-{}-{}",
            timestamp,
            file_safe(provider),
            file_safe(model)
        ));

        write_json(&suffixed(&base, "request.json"), &elide_payloads(value)).await;
        Some(Self { base })
    }

    pub async fn response(&self, value: &Value) {
        write_json(&suffixed(&self.base, "response.json"), value).await;
    }
}

/// `base` + `.suffix`, without treating dots in model names as extensions.
fn suffixed(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn file_safe(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Copy of `value` with inline image data replaced by a size marker.
fn elide_payloads(value: &Value) -> Value {
    match value {
        Value::String(text) if looks_like_payload(text) => {
            Value::String(format!("<{} base64 chars elided>", text.len()))
        }
        Value::Array(items) => Value::Array(items.iter().map(elide_payloads).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| (key.clone(), elide_payloads(inner)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn looks_like_payload(text: &str) -> bool {
    let body = text
        .split_once(";base64,")
        .map_or(text, |(_, encoded)| encoded);
    body.len() >= ELIDE_MIN_CHARS
        && body
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
}

async fn write_json(path: &Path, value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(json_str) => {
            if let Err(e) = tokio::fs::write(path, json_str).await {
                warn!("dump_queries: failed to write {}: {}", path.display(), e);
            }
        }
        Err(e) => warn!("dump_queries: failed to serialize: {}", e),
    }
}
