use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{LlmConfig, Provider};
use crate::error::ClassificationError;
use crate::models::ClassificationResult;

const SYSTEM_PROMPT: &str = "You are a precise and factual civic report classifier.";

/// Used in the prompt when the caller has no catalog for the county yet.
pub const STANDARD_DEPARTMENTS: &[&str] = &[
    "Health",
    "Education",
    "Roads and Transport",
    "Environment and Water",
    "Trade and Industry",
    "ICT and Innovation",
    "Agriculture, Livestock and Fisheries",
    "Housing and Urban Planning",
    "Finance and Economic Planning",
    "Public Service and Administration",
];

/// One text-completion call against one model identifier.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String, ClassificationError>;
}

/// Model output as decoded, before any business rules are applied.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawClassification {
    #[serde(default, deserialize_with = "lenient_bool")]
    pub verified: bool,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub confidence: f64,
    #[serde(default, alias = "department")]
    pub predicted_department: Option<String>,
    #[serde(default, alias = "county")]
    pub predicted_county: Option<String>,
}

impl From<RawClassification> for ClassificationResult {
    fn from(raw: RawClassification) -> Self {
        Self {
            verified: raw.verified,
            confidence: raw.confidence,
            predicted_department: non_blank(raw.predicted_department),
            predicted_county: non_blank(raw.predicted_county),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn lenient_bool<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(flag) => flag,
        serde_json::Value::String(text) => text.trim().eq_ignore_ascii_case("true"),
        _ => false,
    })
}

fn lenient_f64<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(number) => number.as_f64().unwrap_or(0.0),
        serde_json::Value::String(text) => text.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

/// Asks a language model to judge a report, walking a prioritised list of models.
pub struct ClassificationClient<B> {
    backend: B,
    models: Vec<String>,
    model_timeout: Duration,
    unavailable_backoff: Duration,
    deadline: Duration,
}

impl<B: ModelBackend> ClassificationClient<B> {
    pub fn new(backend: B, config: &LlmConfig) -> Self {
        Self {
            backend,
            models: config.models.clone(),
            model_timeout: config.model_timeout,
            unavailable_backoff: config.unavailable_backoff,
            deadline: config.deadline,
        }
    }

    /// Tries each model in order and returns the first parseable judgment.
    pub async fn classify(
        &self,
        title: &str,
        description: &str,
        known_departments: &[String],
    ) -> Result<ClassificationResult, ClassificationError> {
        if title.trim().is_empty() || description.trim().is_empty() {
            debug!("empty report text, skipping classification");
            return Ok(ClassificationResult::fallback());
        }

        let prompt = build_prompt(title, description, known_departments);
        let started = Instant::now();

        for (index, model) in self.models.iter().enumerate() {
            let remaining = self.deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                warn!(model = %model, "classification deadline reached before trying model");
                return Err(ClassificationError::DeadlineExceeded(self.deadline.as_secs()));
            }

            let budget = self.model_timeout.min(remaining);
            let outcome = match tokio::time::timeout(budget, self.backend.complete(model, &prompt)).await {
                Ok(result) => result,
                Err(_) => Err(ClassificationError::Timeout(budget.as_secs())),
            };

            let error = match outcome.and_then(|text| parse_response(&text)) {
                Ok(raw) => {
                    info!(model = %model, verified = raw.verified, confidence = raw.confidence, "report classified");
                    return Ok(raw.into());
                }
                Err(error) => error,
            };
            warn!(model = %model, error = %error, "classification attempt failed");

            let has_next = index + 1 < self.models.len();
            if error.is_transient() && has_next {
                let pause = self
                    .unavailable_backoff
                    .min(self.deadline.saturating_sub(started.elapsed()));
                debug!(model = %model, pause_ms = pause.as_millis() as u64, "backing off before next model");
                tokio::time::sleep(pause).await;
            }
        }

        Err(ClassificationError::Exhausted {
            attempted: self.models.len(),
        })
    }

    #[cfg(test)]
    pub(crate) fn backend(&self) -> &B {
        &self.backend
    }
}

pub fn build_prompt(title: &str, description: &str, known_departments: &[String]) -> String {
    let departments: Vec<&str> = if known_departments.is_empty() {
        STANDARD_DEPARTMENTS.to_vec()
    } else {
        known_departments.iter().map(String::as_str).collect()
    };
    let listing = departments
        .iter()
        .map(|name| format!("- {name}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are an AI assistant for a Kenyan citizen-government platform called E-Mwananchi.
Analyze the following citizen report and determine:

1. Whether it describes a genuine public issue (true/false).
2. Which department should handle it, chosen from the list below.
3. Which Kenyan county is most likely involved.
4. A confidence score between 0 and 1.

Departments:
{listing}

Respond strictly with valid JSON only, no prose, in exactly this shape:
{{
    "verified": true or false,
    "confidence": 0.0 to 1.0,
    "predicted_department": "Department Name",
    "predicted_county": "County Name"
}}

Report Title: {title}
Description: {description}
"#
    )
}

fn json_object_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("static regex is valid"))
}

/// Pulls the brace-delimited JSON object out of free-form model text.
pub fn extract_json(text: &str) -> Option<&str> {
    json_object_pattern().find(text).map(|found| found.as_str())
}

pub fn parse_response(text: &str) -> Result<RawClassification, ClassificationError> {
    if text.trim().is_empty() {
        return Err(ClassificationError::EmptyResponse);
    }
    let json = extract_json(text).ok_or(ClassificationError::MissingJson)?;
    serde_json::from_str(json).map_err(|e| ClassificationError::MalformedJson(e.to_string()))
}

/// Gemini or OpenAI-compatible HTTP backend.
pub struct HttpModelBackend {
    client: reqwest::Client,
    provider: Provider,
    endpoint: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl HttpModelBackend {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.model_timeout)
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            client,
            provider: config.provider,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            timeout_secs: config.model_timeout.as_secs(),
        })
    }

    fn transport_error(&self, error: reqwest::Error) -> ClassificationError {
        if error.is_timeout() {
            ClassificationError::Timeout(self.timeout_secs)
        } else {
            ClassificationError::Transport(error.to_string())
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<serde_json::Value, ClassificationError> {
        let response = request.send().await.map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(ClassificationError::ServiceUnavailable);
        }
        if !status.is_success() {
            return Err(ClassificationError::HttpStatus(status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| ClassificationError::MalformedJson(format!("response envelope: {e}")))
    }

    async fn call_gemini(&self, model: &str, prompt: &str) -> Result<String, ClassificationError> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.endpoint, model);
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": 0.0 },
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key)]);
        }

        let envelope = self.send(request).await?;
        let text = envelope["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part["text"].as_str())
                    .collect::<String>()
            })
            .unwrap_or_default();
        non_empty_text(text)
    }

    async fn call_openai(&self, model: &str, prompt: &str) -> Result<String, ClassificationError> {
        let url = format!("{}/v1/chat/completions", self.endpoint);
        let body = serde_json::json!({
            "model": model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "temperature": 0.0,
            "max_tokens": 250,
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let envelope = self.send(request).await?;
        let text = envelope["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        non_empty_text(text)
    }
}

fn non_empty_text(text: String) -> Result<String, ClassificationError> {
    let text = text.trim().to_string();
    if text.is_empty() {
        Err(ClassificationError::EmptyResponse)
    } else {
        Ok(text)
    }
}

#[async_trait]
impl ModelBackend for HttpModelBackend {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String, ClassificationError> {
        debug!(model, provider = ?self.provider, "sending classification request");
        match self.provider {
            Provider::Gemini => self.call_gemini(model, prompt).await,
            Provider::OpenAi => self.call_openai(model, prompt).await,
        }
    }
}
