use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};

use crate::matcher::DEFAULT_MATCH_THRESHOLD;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.6;

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
const OPENAI_ENDPOINT: &str = "https://api.openai.com";
const GEMINI_MODELS: &[&str] = &["gemini-1.5-pro", "gemini-1.5-flash", "gemini-1.5-flash-8b"];
const OPENAI_MODELS: &[&str] = &["gpt-4o", "gpt-4o-mini", "gpt-3.5-turbo"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gemini,
    OpenAi,
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Provider::Gemini),
            "openai" => Ok(Provider::OpenAi),
            other => bail!("unknown LLM provider '{other}' (expected gemini or openai)"),
        }
    }
}

/// The two decision thresholds, kept in one place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Minimum classification confidence before a report is auto-verified.
    pub confidence: f64,
    /// Minimum fuzzy similarity (0-100) for a department match.
    pub department_match: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE_THRESHOLD,
            department_match: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: Provider,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub models: Vec<String>,
    pub model_timeout: Duration,
    pub unavailable_backoff: Duration,
    pub deadline: Duration,
}

impl LlmConfig {
    pub fn defaults_for(provider: Provider) -> Self {
        let (endpoint, models) = match provider {
            Provider::Gemini => (GEMINI_ENDPOINT, GEMINI_MODELS),
            Provider::OpenAi => (OPENAI_ENDPOINT, OPENAI_MODELS),
        };
        Self {
            provider,
            endpoint: endpoint.to_string(),
            api_key: None,
            models: models.iter().map(|model| model.to_string()).collect(),
            model_timeout: Duration::from_secs(8),
            unavailable_backoff: Duration::from_secs(2),
            deadline: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub llm: LlmConfig,
    pub thresholds: Thresholds,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let provider = match get("MWANANCHI_LLM_PROVIDER") {
            Some(value) => value.parse()?,
            None => Provider::Gemini,
        };
        let mut llm = LlmConfig::defaults_for(provider);

        if let Some(endpoint) = get("MWANANCHI_LLM_ENDPOINT") {
            llm.endpoint = endpoint.trim_end_matches('/').to_string();
        }
        llm.api_key = match provider {
            Provider::Gemini => get("GEMINI_API_KEY"),
            Provider::OpenAi => get("OPENAI_API_KEY"),
        };
        if let Some(models) = get("MWANANCHI_LLM_MODELS") {
            llm.models = models
                .split(',')
                .map(str::trim)
                .filter(|model| !model.is_empty())
                .map(str::to_string)
                .collect();
            if llm.models.is_empty() {
                bail!("MWANANCHI_LLM_MODELS must name at least one model");
            }
        }
        if let Some(secs) = parse_opt::<u64>(&get, "MWANANCHI_MODEL_TIMEOUT_SECS")? {
            llm.model_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_opt::<u64>(&get, "MWANANCHI_UNAVAILABLE_BACKOFF_SECS")? {
            llm.unavailable_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_opt::<u64>(&get, "MWANANCHI_CLASSIFY_DEADLINE_SECS")? {
            llm.deadline = Duration::from_secs(secs);
        }

        let mut thresholds = Thresholds::default();
        if let Some(value) = parse_opt::<f64>(&get, "MWANANCHI_CONFIDENCE_THRESHOLD")? {
            if !(0.0..=1.0).contains(&value) {
                bail!("MWANANCHI_CONFIDENCE_THRESHOLD must lie in [0, 1], got {value}");
            }
            thresholds.confidence = value;
        }
        if let Some(value) = parse_opt::<f64>(&get, "MWANANCHI_MATCH_THRESHOLD")? {
            if !(0.0..=100.0).contains(&value) {
                bail!("MWANANCHI_MATCH_THRESHOLD must lie in [0, 100], got {value}");
            }
            thresholds.department_match = value;
        }

        Ok(Self {
            database_url: get("DATABASE_URL"),
            llm,
            thresholds,
        })
    }

    pub fn require_database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to a production Postgres instance")
    }
}

fn parse_opt<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    get(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("{key} has an invalid value '{value}'"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.llm.provider, Provider::Gemini);
        assert_eq!(config.llm.models[0], "gemini-1.5-pro");
        assert_eq!(config.thresholds, Thresholds::default());
        assert_eq!(config.thresholds.confidence, 0.6);
        assert_eq!(config.thresholds.department_match, 70.0);
        assert!(config.database_url.is_none());
        assert!(config.require_database_url().is_err());
    }

    #[test]
    fn provider_selects_key_and_models() {
        let config = config_from(&[
            ("MWANANCHI_LLM_PROVIDER", "openai"),
            ("OPENAI_API_KEY", "sk-test"),
            ("GEMINI_API_KEY", "ignored"),
        ])
        .unwrap();
        assert_eq!(config.llm.provider, Provider::OpenAi);
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.llm.models, vec!["gpt-4o", "gpt-4o-mini", "gpt-3.5-turbo"]);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config_from(&[
            ("MWANANCHI_LLM_MODELS", " a , b ,,c "),
            ("MWANANCHI_CONFIDENCE_THRESHOLD", "0.75"),
            ("MWANANCHI_MATCH_THRESHOLD", "80"),
            ("MWANANCHI_MODEL_TIMEOUT_SECS", "3"),
            ("MWANANCHI_CLASSIFY_DEADLINE_SECS", "12"),
            ("MWANANCHI_LLM_ENDPOINT", "http://localhost:8080/"),
        ])
        .unwrap();
        assert_eq!(config.llm.models, vec!["a", "b", "c"]);
        assert_eq!(config.thresholds.confidence, 0.75);
        assert_eq!(config.thresholds.department_match, 80.0);
        assert_eq!(config.llm.model_timeout, Duration::from_secs(3));
        assert_eq!(config.llm.deadline, Duration::from_secs(12));
        assert_eq!(config.llm.endpoint, "http://localhost:8080");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(config_from(&[("MWANANCHI_CONFIDENCE_THRESHOLD", "1.5")]).is_err());
        assert!(config_from(&[("MWANANCHI_MATCH_THRESHOLD", "seventy")]).is_err());
        assert!(config_from(&[("MWANANCHI_LLM_PROVIDER", "claude")]).is_err());
        assert!(config_from(&[("MWANANCHI_LLM_MODELS", " , ")]).is_err());
    }
}
