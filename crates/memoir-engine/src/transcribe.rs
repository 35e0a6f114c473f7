use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use memoir_contracts::events::EventWriter;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{truncate_text, PipelineError};
use crate::http::{FilePart, HttpRequest};
use crate::retry::RetryPolicy;
use crate::transport::ResilientTransport;

/// Recorded memory as received from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioUpload {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl AudioUpload {
    pub fn new(file_name: impl Into<String>, mime_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type,
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read audio file {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("audio")
            .to_string();
        let mime_type = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(audio_mime_for_extension)
            .map(str::to_string);
        Ok(Self::new(file_name, mime_type, bytes))
    }
}

fn audio_mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "webm" => Some("audio/webm"),
        "wav" => Some("audio/wav"),
        "mp3" => Some("audio/mpeg"),
        "m4a" | "mp4" => Some("audio/mp4"),
        "ogg" | "oga" => Some("audio/ogg"),
        "flac" => Some("audio/flac"),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
}

/// Client of the speech-to-text service (`POST /transcribe`, multipart `audio`).
#[derive(Clone)]
pub struct Transcriber {
    endpoint: String,
    policy: RetryPolicy,
    transport: ResilientTransport,
}

impl Transcriber {
    pub fn new(endpoint: impl Into<String>, policy: RetryPolicy, transport: ResilientTransport) -> Self {
        Self {
            endpoint: endpoint.into(),
            policy,
            transport,
        }
    }

    pub fn from_config(config: &EngineConfig, transport: ResilientTransport) -> Self {
        Self::new(config.transcribe_url(), config.transcription, transport)
    }

    pub fn transcribe(
        &self,
        audio: &AudioUpload,
        events: &EventWriter,
    ) -> Result<Transcript, PipelineError> {
        if audio.bytes.is_empty() {
            return Err(PipelineError::InvalidInput("missing audio file".to_string()));
        }
        let request = HttpRequest::post_multipart(
            &self.endpoint,
            vec![FilePart {
                field: "audio".to_string(),
                file_name: audio.file_name.clone(),
                mime_type: audio.mime_type.clone(),
                bytes: audio.bytes.clone(),
            }],
        );
        let response = self.transport.attempt(&request, &self.policy, events)?;
        let mut transcript: Transcript = serde_json::from_slice(&response.body).map_err(|err| {
            PipelineError::Parse(format!(
                "transcription response: {err} (body: {})",
                truncate_text(response.text().trim(), 160)
            ))
        })?;
        transcript.text = transcript.text.trim().to_string();
        transcript.language = transcript
            .language
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Ok(transcript)
    }
}
