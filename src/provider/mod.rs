//! Model-provider client.
//!
//! Keeps the catalog of configured language models, tracks which one is
//! active, and normalizes the heterogeneous response shapes providers
//! return. Parsing probes a fixed list of known shapes in order rather
//! than deserializing into provider-specific structs.

use crate::{
    error::ErrorKind,
    events::{EventBus, SystemEvent},
    AssistError, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelType {
    Local,
    Remote,
}

/// One configured model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub endpoint: String,
    pub model_type: ModelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model_id: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub is_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_tested: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_headers: Option<HashMap<String, String>>,
}

/// Per-call overrides merged over the model defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ModelRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_message = Some(system.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub success: bool,
    pub content: Option<String>,
    pub tokens_used: Option<u64>,
    pub processing_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

impl ModelResponse {
    /// Error-kind classification for the retry loop: timeouts and
    /// 5xx/429 are retryable, other HTTP failures are not.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        if self.success {
            return None;
        }
        match self.http_status {
            Some(status) if status == 429 || status >= 500 => Some(ErrorKind::Transient),
            Some(_) => Some(ErrorKind::Internal),
            None => {
                if self
                    .error
                    .as_deref()
                    .map(|e| e.contains("timed out") || e.contains("timeout"))
                    .unwrap_or(false)
                {
                    Some(ErrorKind::Timeout)
                } else {
                    Some(ErrorKind::Transient)
                }
            }
        }
    }
}

pub struct ModelClient {
    models: RwLock<HashMap<String, ModelInfo>>,
    active: RwLock<Option<String>>,
    http: reqwest::Client,
    bus: EventBus,
}

impl ModelClient {
    pub fn new(bus: EventBus) -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
            active: RwLock::new(None),
            http: reqwest::Client::new(),
            bus,
        }
    }

    pub async fn add_model(&self, model: ModelInfo) -> Result<()> {
        url::Url::parse(&model.endpoint).map_err(|e| {
            AssistError::InvalidArgument(format!("invalid model endpoint '{}': {e}", model.endpoint))
        })?;

        let mut models = self.models.write().await;
        if models.contains_key(&model.id) {
            return Err(AssistError::AlreadyExists(format!(
                "model '{}' already configured",
                model.id
            )));
        }
        info!("Added model '{}' ({})", model.id, model.provider);
        models.insert(model.id.clone(), model);
        Ok(())
    }

    pub async fn remove_model(&self, id: &str) -> Result<()> {
        let mut models = self.models.write().await;
        models
            .remove(id)
            .ok_or_else(|| AssistError::NotFound(format!("model '{id}' is not configured")))?;
        drop(models);

        let mut active = self.active.write().await;
        if active.as_deref() == Some(id) {
            *active = None;
            warn!("Removed the active model '{}'; no model is active", id);
        }
        Ok(())
    }

    pub async fn list_models(&self) -> Vec<ModelInfo> {
        self.models.read().await.values().cloned().collect()
    }

    pub async fn get_model(&self, id: &str) -> Option<ModelInfo> {
        self.models.read().await.get(id).cloned()
    }

    pub async fn get_active(&self) -> Option<ModelInfo> {
        let active = self.active.read().await;
        match active.as_deref() {
            Some(id) => self.models.read().await.get(id).cloned(),
            None => None,
        }
    }

    /// Select the active model. The candidate is probed first; selection
    /// only sticks when the endpoint answers.
    pub async fn set_active(&self, id: &str) -> Result<()> {
        if self.get_model(id).await.is_none() {
            return Err(AssistError::NotFound(format!(
                "model '{id}' is not configured"
            )));
        }

        if !self.test_connection(id).await? {
            return Err(AssistError::ServiceUnavailable(format!(
                "model '{id}' failed the connection test"
            )));
        }

        let previous = {
            let mut active = self.active.write().await;
            active.replace(id.to_string())
        };

        if previous.as_deref() != Some(id) {
            info!("Active model changed: {:?} -> {}", previous, id);
            self.bus.publish(SystemEvent::ActiveModelChanged {
                previous,
                current: id.to_string(),
            });
        }
        Ok(())
    }

    /// Send a tiny probe. A 2xx answer or a 400 both prove the endpoint is
    /// alive (400 means the server exists but rejected the payload).
    pub async fn test_connection(&self, id: &str) -> Result<bool> {
        let model = self
            .get_model(id)
            .await
            .ok_or_else(|| AssistError::NotFound(format!("model '{id}' is not configured")))?;

        let probe = serde_json::json!({
            "model": model.model_id,
            "messages": [{"role": "user", "content": "ping"}],
            "max_tokens": 1,
        });

        let alive = match self
            .request_builder(&model)
            .json(&probe)
            .timeout(Duration::from_secs(model.timeout_seconds.min(10)))
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status();
                status.is_success() || status.as_u16() == 400
            }
            Err(e) => {
                debug!("Connection test for '{}' failed: {}", id, e);
                false
            }
        };

        let mut models = self.models.write().await;
        if let Some(entry) = models.get_mut(id) {
            entry.is_available = alive;
            entry.last_tested = Some(chrono::Utc::now());
        }
        Ok(alive)
    }

    /// Send a completion request to the active model.
    pub async fn send_request(&self, request: &ModelRequest) -> Result<ModelResponse> {
        let model = self.get_active().await.ok_or_else(|| {
            AssistError::ServiceUnavailable("no active model configured".to_string())
        })?;

        let payload = Self::build_payload(&model, request);
        let started = Instant::now();

        let outcome = self
            .request_builder(&model)
            .json(&payload)
            .timeout(Duration::from_secs(model.timeout_seconds))
            .send()
            .await;

        let elapsed = started.elapsed().as_millis() as u64;

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                let message = if e.is_timeout() {
                    format!("request to '{}' timed out", model.id)
                } else {
                    format!("request to '{}' failed: {e}", model.id)
                };
                warn!("{message}");
                return Ok(ModelResponse {
                    success: false,
                    content: None,
                    tokens_used: None,
                    processing_time_ms: elapsed,
                    error: Some(message),
                    http_status: None,
                });
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Ok(ModelResponse {
                success: false,
                content: None,
                tokens_used: None,
                processing_time_ms: elapsed,
                error: Some(format!("HTTP {}: {}", status.as_u16(), truncate(&body, 500))),
                http_status: Some(status.as_u16()),
            });
        }

        let value: serde_json::Value = serde_json::from_str(&body)?;
        let content = Self::extract_content(&value);
        let tokens_used = value
            .pointer("/usage/total_tokens")
            .and_then(|v| v.as_u64());

        match content {
            Some(content) => Ok(ModelResponse {
                success: true,
                content: Some(content),
                tokens_used,
                processing_time_ms: elapsed,
                error: None,
                http_status: Some(status.as_u16()),
            }),
            None => Ok(ModelResponse {
                success: false,
                content: None,
                tokens_used,
                processing_time_ms: elapsed,
                error: Some("response carried no recognizable content field".to_string()),
                http_status: Some(status.as_u16()),
            }),
        }
    }

    fn request_builder(&self, model: &ModelInfo) -> reqwest::RequestBuilder {
        let mut builder = self.http.post(&model.endpoint);
        if let Some(key) = &model.api_key {
            builder = builder.bearer_auth(key);
        }
        if let Some(headers) = &model.custom_headers {
            for (name, value) in headers {
                builder = builder.header(name, value);
            }
        }
        builder
    }

    /// Provider-neutral payload: request overrides win over model defaults.
    fn build_payload(model: &ModelInfo, request: &ModelRequest) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_message {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": request.prompt}));

        serde_json::json!({
            "model": model.model_id,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(model.max_tokens),
            "temperature": request.temperature.unwrap_or(model.temperature),
        })
    }

    /// Probe the known response shapes in order:
    /// chat-style, completion-style, single-string, direct content.
    fn extract_content(value: &serde_json::Value) -> Option<String> {
        for pointer in [
            "/choices/0/message/content",
            "/choices/0/text",
            "/response",
            "/content",
        ] {
            if let Some(content) = value.pointer(pointer).and_then(|v| v.as_str()) {
                return Some(content.to_string());
            }
        }
        None
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        text
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        &text[..end]
    }
}
