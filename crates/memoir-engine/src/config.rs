use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::PipelineError;
use crate::retry::RetryPolicy;

pub const DEFAULT_WHISPER_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_IMAGE_MODEL: &str = "google/gemini-3-pro-image-preview";
pub const DEFAULT_GALLERY_DIR: &str = "gallery";

/// Process-wide settings, read once at startup and handed to each component.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub whisper_base_url: String,
    pub transcription: RetryPolicy,
    pub openrouter_api_key: Option<String>,
    pub openrouter_api_base: String,
    pub openrouter_referer: Option<String>,
    pub openrouter_title: Option<String>,
    pub image_model: String,
    pub image_fallback_model: Option<String>,
    /// Attempt cap and base delay of the generation orchestrator.
    pub generation: RetryPolicy,
    /// Transport bounds of each single generation call.
    pub generation_transport: RetryPolicy,
    pub https_fallback: bool,
    pub https_fallback_transport: RetryPolicy,
    pub image_download: RetryPolicy,
    pub gallery_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let bounded = |key: &str, default: u64, min: u64, max: u64| {
            bounded_int(text(key).as_deref(), default, min, max)
        };
        let millis = |key: &str, default: u64, min: u64, max: u64| {
            Duration::from_millis(bounded(key, default, min, max))
        };
        let retries = |key: &str, default: u64, max: u64| {
            u32::try_from(bounded(key, default, 0, max)).unwrap_or(0)
        };

        let image_attempts = u32::try_from(bounded("OPENROUTER_IMAGE_ATTEMPTS", 8, 1, 20)).unwrap_or(8);
        let generation_timeout = millis("OPENROUTER_TIMEOUT_MS", 60_000, 5_000, 300_000);

        Self {
            whisper_base_url: text("WHISPER_BASE_URL")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_WHISPER_BASE_URL.to_string()),
            transcription: RetryPolicy::with_retries(
                millis("WHISPER_TIMEOUT_MS", 25_000, 1_000, 120_000),
                retries("WHISPER_RETRIES", 2, 10),
                millis("WHISPER_RETRY_DELAY_MS", 500, 100, 5_000),
            ),
            openrouter_api_key: text("OPENROUTER_API_KEY"),
            openrouter_api_base: normalize_api_base(
                text("OPENROUTER_API_BASE")
                    .or_else(|| text("OPENROUTER_BASE_URL"))
                    .as_deref(),
            ),
            openrouter_referer: text("OPENROUTER_HTTP_REFERER"),
            openrouter_title: text("OPENROUTER_X_TITLE"),
            image_model: text("OPENROUTER_IMAGE_MODEL")
                .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
            image_fallback_model: text("OPENROUTER_IMAGE_FALLBACK_MODEL"),
            generation: RetryPolicy {
                timeout: generation_timeout,
                max_attempts: image_attempts,
                base_delay: millis("OPENROUTER_IMAGE_RETRY_DELAY_MS", 1_200, 500, 5_000),
            },
            generation_transport: RetryPolicy::with_retries(
                generation_timeout,
                retries("OPENROUTER_FETCH_RETRIES", 5, 10),
                millis("OPENROUTER_FETCH_RETRY_DELAY_MS", 800, 100, 5_000),
            ),
            https_fallback: text("OPENROUTER_HTTPS_FALLBACK")
                .map(|value| !value.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            https_fallback_transport: RetryPolicy::with_retries(
                generation_timeout,
                retries("OPENROUTER_HTTPS_FALLBACK_RETRIES", 1, 5),
                Duration::ZERO,
            ),
            image_download: RetryPolicy::with_retries(
                millis("IMAGE_DOWNLOAD_TIMEOUT_MS", 20_000, 1_000, 120_000),
                retries("IMAGE_DOWNLOAD_RETRIES", 2, 10),
                millis("IMAGE_DOWNLOAD_RETRY_DELAY_MS", 500, 100, 5_000),
            ),
            gallery_dir: text("MEMOIR_GALLERY_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_GALLERY_DIR)),
        }
    }

    pub fn require_api_key(&self) -> Result<&str, PipelineError> {
        self.openrouter_api_key
            .as_deref()
            .ok_or_else(|| PipelineError::Config("OPENROUTER_API_KEY not configured".to_string()))
    }

    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.openrouter_api_base)
    }

    pub fn transcribe_url(&self) -> String {
        format!("{}/transcribe", self.whisper_base_url)
    }
}

fn bounded_int(raw: Option<&str>, default: u64, min: u64, max: u64) -> u64 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<i64>() {
        Ok(value) if value < 0 => min,
        Ok(value) => u64::try_from(value).unwrap_or(default).clamp(min, max),
        Err(_) => default,
    }
}

fn normalize_api_base(raw: Option<&str>) -> String {
    let raw = raw.unwrap_or(DEFAULT_OPENROUTER_API_BASE);
    let mut base = raw.trim().trim_end_matches('/').to_string();
    if let Ok(parsed) = reqwest::Url::parse(&base) {
        if parsed.path().trim().is_empty() || parsed.path() == "/" {
            base = format!("{base}/api/v1");
        }
    }
    base.trim_end_matches('/').to_string()
}
