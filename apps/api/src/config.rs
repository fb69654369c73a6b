use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::evaluation::orchestrator::{EvaluatorSettings, RetryPolicy, DEFAULT_CONCURRENCY};
use crate::llm_client::{Credential, DEFAULT_API_URL, DEFAULT_MODEL};

const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;

/// Application configuration loaded from environment variables.
/// Nothing is required: without `OPENAI_API_KEY` every request must bring its own key.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    pub llm_api_key: Option<Credential>,
    pub llm_model: String,
    pub llm_api_url: String,
    pub llm_max_concurrency: usize,
    pub llm_timeout: Duration,
    pub llm_max_retries: u32,
    pub evaluation_timeout: Option<Duration>,
    pub upload_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Config {
            port: var("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: var("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            llm_api_key: Credential::from_optional(var("OPENAI_API_KEY")),
            llm_model: var("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            llm_api_url: var("LLM_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            // An unusable value falls back to the default instead of failing startup.
            llm_max_concurrency: var("LLM_MAX_CONCURRENCY")
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_CONCURRENCY),
            llm_timeout: Duration::from_secs(parse_or(
                var("LLM_TIMEOUT_SECS"),
                "LLM_TIMEOUT_SECS",
                DEFAULT_LLM_TIMEOUT_SECS,
            )?),
            llm_max_retries: parse_or(var("LLM_MAX_RETRIES"), "LLM_MAX_RETRIES", 0)?,
            evaluation_timeout: var("EVALUATION_TIMEOUT_SECS")
                .map(|v| {
                    v.trim()
                        .parse::<u64>()
                        .context("EVALUATION_TIMEOUT_SECS must be a whole number of seconds")
                })
                .transpose()?
                .map(Duration::from_secs),
            upload_dir: var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("cv-analyzer")),
        })
    }

    pub fn evaluator_settings(&self) -> EvaluatorSettings {
        EvaluatorSettings {
            concurrency_limit: self.llm_max_concurrency,
            default_credential: self.llm_api_key.clone(),
            retry: RetryPolicy {
                max_retries: self.llm_max_retries,
                ..RetryPolicy::default()
            },
            batch_timeout: self.evaluation_timeout,
        }
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        Some(v) => v
            .trim()
            .parse::<T>()
            .ok()
            .with_context(|| format!("{key} must be a non-negative integer, got '{v}'")),
        None => Ok(default),
    }
}
