use std::error::Error as StdError;
use std::io;

use memoir_contracts::decade::ClassifyError;
use thiserror::Error;

/// Failure class of a single HTTP exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    ConnectionReset,
    Timeout,
    Dns,
    Network,
    Status(u16),
    InvalidRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn status(code: u16, target: &str, body: &str) -> Self {
        let body = body.trim();
        let message = if body.is_empty() {
            format!("HTTP {code} from {target}")
        } else {
            format!("HTTP {code} from {target}: {}", truncate_text(body, 512))
        };
        Self::new(TransportErrorKind::Status(code), message)
    }

    pub fn from_reqwest(err: &reqwest::Error, target: &str) -> Self {
        let detail = error_chain_text(err, 480);
        let message = format!("request to {target} failed: {detail}");
        let io_kind = io_error_kind(err);
        let lowered = detail.to_ascii_lowercase();
        let kind = if err.is_builder() {
            TransportErrorKind::InvalidRequest
        } else if err.is_timeout() || io_kind == Some(io::ErrorKind::TimedOut) {
            TransportErrorKind::Timeout
        } else if matches!(
            io_kind,
            Some(
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            )
        ) || lowered.contains("connection reset")
        {
            TransportErrorKind::ConnectionReset
        } else if is_dns_failure(&lowered) {
            TransportErrorKind::Dns
        } else {
            TransportErrorKind::Network
        };
        Self::new(kind, message)
    }

    /// True for failures below HTTP: reset, timeout, DNS, generic network.
    pub fn is_network(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::ConnectionReset
                | TransportErrorKind::Timeout
                | TransportErrorKind::Dns
                | TransportErrorKind::Network
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self.kind {
            TransportErrorKind::Status(code) => is_retryable_status(code),
            TransportErrorKind::InvalidRequest => false,
            _ => true,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self.kind {
            TransportErrorKind::Status(code) => Some(code),
            _ => None,
        }
    }

    /// Message shown to end users; raw detail stays in `message`.
    pub fn user_message(&self) -> String {
        match self.kind {
            TransportErrorKind::ConnectionReset => {
                "Connection reset by the upstream service, try again in a moment.".to_string()
            }
            TransportErrorKind::Timeout => {
                "The upstream service did not respond in time, try again.".to_string()
            }
            TransportErrorKind::Dns => {
                "The upstream service is unreachable right now (DNS lookup failed), try again later."
                    .to_string()
            }
            TransportErrorKind::Network => {
                "Network error while contacting the upstream service, try again in a moment."
                    .to_string()
            }
            TransportErrorKind::Status(_) | TransportErrorKind::InvalidRequest => {
                self.message.clone()
            }
        }
    }
}

/// 408, 429 and the 5xx family.
pub fn is_retryable_status(code: u16) -> bool {
    code == 408 || code == 429 || (500..600).contains(&code)
}

/// Boundary classes the pipeline failures collapse into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    BadInput,
    UpstreamUnavailable,
    Internal,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ClassifyError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("response parse failed: {0}")]
    Parse(String),

    #[error("generation service error: {message}")]
    UpstreamApi {
        message: String,
        code: Option<String>,
    },

    #[error("no image returned from the generation service{}", finish_reason_suffix(.finish_reason))]
    MissingResult { finish_reason: Option<String> },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("image decode failed: {0}")]
    Decode(String),

    #[error("failed to persist image: {0}")]
    Persist(String),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::InvalidInput(_) => "invalid_input",
            Self::Transport(_) => "transport",
            Self::Parse(_) => "parse",
            Self::UpstreamApi { .. } => "upstream_api",
            Self::MissingResult { .. } => "missing_result",
            Self::Config(_) => "config",
            Self::Decode(_) => "decode",
            Self::Persist(_) => "persist",
        }
    }

    /// Whether a generation attempt that failed this way may be tried again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_retryable(),
            Self::Parse(_) | Self::UpstreamApi { .. } | Self::MissingResult { .. } => true,
            Self::Validation(_)
            | Self::InvalidInput(_)
            | Self::Config(_)
            | Self::Decode(_)
            | Self::Persist(_) => false,
        }
    }

    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Validation(_) | Self::InvalidInput(_) => FailureClass::BadInput,
            Self::Transport(_)
            | Self::Parse(_)
            | Self::UpstreamApi { .. }
            | Self::MissingResult { .. }
            | Self::Decode(_) => FailureClass::UpstreamUnavailable,
            Self::Config(_) | Self::Persist(_) => FailureClass::Internal,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self.failure_class() {
            FailureClass::BadInput => 422,
            FailureClass::UpstreamUnavailable => 502,
            FailureClass::Internal => 500,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Transport(err) => err.user_message(),
            other => other.to_string(),
        }
    }
}

fn finish_reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|value| format!(" (finish_reason={value})"))
        .unwrap_or_default()
}

fn io_error_kind(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(cause) = current {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        current = cause.source();
    }
    None
}

fn is_dns_failure(lowered: &str) -> bool {
    [
        "dns error",
        "failed to lookup address",
        "name or service not known",
        "no such host",
        "nodename nor servname",
        "temporary failure in name resolution",
    ]
    .iter()
    .any(|marker| lowered.contains(marker))
}

pub(crate) fn error_chain_text(err: &(dyn StdError + 'static), max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(cause) = current {
        let text = cause.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty()
            && !parts
                .last()
                .map(|existing| existing == trimmed)
                .unwrap_or(false)
        {
            parts.push(trimmed.to_string());
        }
        current = cause.source();
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
