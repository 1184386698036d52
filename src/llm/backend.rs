//! Backend implementations: hosted HTTP model and offline mock.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::info;

use super::{build_prompt, BackendError};
use crate::config::AiConfig;
use crate::types::{RiskSignal, Sensitivity};

/// A model capable of assessing a risk signal.
///
/// Implementations return the model's raw text; prompt construction and
/// response parsing are shared (see [`build_prompt`] and
/// [`parse_response`](super::parse_response)).
#[async_trait]
pub trait RiskBackend: Send + Sync {
    async fn assess(&self, signal: &RiskSignal) -> Result<String, BackendError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// HTTP Backend
// ============================================================================

/// Hosted-model backend speaking the `generateContent` JSON dialect.
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
    name: String,
    timeout: Duration,
}

impl HttpBackend {
    /// Build from config. Returns `None` (with an explanatory log line)
    /// when no endpoint is configured or no API key is present - the engine
    /// then runs with rule fallbacks on the AI path.
    ///
    /// The API key comes from the `AI_API_KEY` environment variable only;
    /// credential management is outside this crate.
    pub fn from_config(config: &AiConfig) -> Option<Self> {
        let endpoint = config.endpoint.as_deref()?;
        let Ok(api_key) = std::env::var("AI_API_KEY") else {
            info!("AI_API_KEY not set, AI decisions will use rule fallback");
            return None;
        };
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            endpoint.trim_end_matches('/'),
            config.model,
            api_key
        );
        let timeout = Duration::from_secs(config.timeout_seconds);
        let client = reqwest::Client::builder().timeout(timeout).build().ok()?;
        info!(model = %config.model, "Model backend initialized");
        Some(Self {
            client,
            url,
            name: format!("http:{}", config.model),
            timeout,
        })
    }
}

#[async_trait]
impl RiskBackend for HttpBackend {
    async fn assess(&self, signal: &RiskSignal) -> Result<String, BackendError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": build_prompt(signal) }] }],
            "generationConfig": { "temperature": 0.1, "maxOutputTokens": 500 }
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout(self.timeout)
                } else {
                    BackendError::Other(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let detail = response.text().await.unwrap_or_default();
            return Err(BackendError::RateLimited(format!("HTTP 429: {detail}")));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(BackendError::Other(format!("HTTP {status}: {detail}")));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BackendError::Other(format!("bad response body: {e}")))?;
        payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BackendError::Other("response carried no text part".to_string()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Mock Backend
// ============================================================================

/// Deterministic offline backend for demo mode and tests.
///
/// Produces a plausible JSON verdict derived from the signal itself, so the
/// full hybrid path (queue, cache, parsing) is exercised without network
/// access or credentials.
#[derive(Debug, Default)]
pub struct MockBackend;

#[async_trait]
impl RiskBackend for MockBackend {
    async fn assess(&self, signal: &RiskSignal) -> Result<String, BackendError> {
        let event = &signal.original_event;
        let (decision, confidence, reason) = if signal
            .risk_factors
            .iter()
            .any(|f| f == "suspicious_role_action_combination")
        {
            (
                "escalate",
                0.75,
                "role/action pairing outside normal duties",
            )
        } else if event.geo_change
            && matches!(
                event.resource_sensitivity,
                Sensitivity::High | Sensitivity::Critical
            )
        {
            (
                "throttle",
                0.8,
                "location change while touching sensitive resources",
            )
        } else if signal.risk_score >= 0.6 {
            ("throttle", 0.7, "elevated composite risk")
        } else {
            ("allow", 0.7, "pattern consistent with normal usage")
        };
        Ok(format!(
            "{{\"decision\": \"{decision}\", \"confidence\": {confidence}, \"reason\": \"{reason}\"}}"
        ))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
