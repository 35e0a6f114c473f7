use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use memoir_contracts::decade::{classify_decade, Decade};
use memoir_contracts::events::EventWriter;
use memoir_contracts::prompt::build_instruction;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::PipelineError;
use crate::fallback::{FailoverTransport, FallbackPolicy, Ipv4Exchange};
use crate::gallery::Gallery;
use crate::generation::{GenerationSettings, ImageGenerator};
use crate::http::{HttpExchange, PooledExchange};
use crate::normalize::ImageNormalizer;
use crate::retry::{Sleeper, ThreadSleeper};
use crate::trace;
use crate::transcribe::{AudioUpload, Transcriber};
use crate::transport::ResilientTransport;

/// Outcome of one memory request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryImage {
    pub request_id: String,
    pub transcript: String,
    pub language: Option<String>,
    pub decade: Decade,
    pub instruction: String,
    pub media_type: String,
    pub saved_path: PathBuf,
    pub public_path: String,
    pub bytes: usize,
    pub attempts: usize,
}

/// Transcribe → classify → build → generate → normalize → persist.
#[derive(Clone)]
pub struct MemoryPipeline {
    config: EngineConfig,
    transcriber: Transcriber,
    failover: FailoverTransport,
    normalizer: ImageNormalizer,
    gallery: Gallery,
    sleeper: Arc<dyn Sleeper>,
    events: EventWriter,
}

impl MemoryPipeline {
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let pooled: Arc<dyn HttpExchange> = Arc::new(PooledExchange::new()?);
        let fallback: Option<Arc<dyn HttpExchange>> = if config.https_fallback {
            Some(Arc::new(Ipv4Exchange::new()?))
        } else {
            None
        };
        Ok(Self::with_exchanges(
            config,
            pooled,
            fallback,
            Arc::new(ThreadSleeper),
        ))
    }

    /// Wires the pipeline over caller-supplied exchanges and sleeper.
    pub fn with_exchanges(
        config: EngineConfig,
        primary: Arc<dyn HttpExchange>,
        fallback: Option<Arc<dyn HttpExchange>>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let primary = ResilientTransport::with_sleeper(primary, Arc::clone(&sleeper));
        let fallback = match fallback {
            Some(exchange) if config.https_fallback => FallbackPolicy::Enabled {
                transport: ResilientTransport::with_sleeper(exchange, Arc::clone(&sleeper)),
                policy: config.https_fallback_transport,
            },
            _ => FallbackPolicy::Disabled,
        };
        Self {
            transcriber: Transcriber::from_config(&config, primary.clone()),
            failover: FailoverTransport::new(primary.clone(), fallback),
            normalizer: ImageNormalizer::new(primary, config.image_download),
            gallery: Gallery::new(config.gallery_dir.clone()),
            sleeper,
            events: EventWriter::disabled(""),
            config,
        }
    }

    /// Sends the per-request event stream to `path`.
    pub fn with_event_log(mut self, path: Option<PathBuf>) -> Self {
        self.events = EventWriter::with_path(path, "");
        self
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Full run from recorded audio.
    pub fn remember(&self, audio: &AudioUpload) -> Result<MemoryImage, PipelineError> {
        let events = self.events.for_request(Uuid::new_v4().to_string());
        trace(
            &events,
            "request_started",
            json!({
                "source": "audio",
                "audio_name": audio.file_name,
                "audio_type": audio.mime_type,
                "audio_bytes": audio.bytes.len(),
            }),
        );
        let result = self
            .transcriber
            .transcribe(audio, &events)
            .and_then(|transcript| {
                trace(
                    &events,
                    "transcript_received",
                    json!({
                        "chars": transcript.text.chars().count(),
                        "language": transcript.language,
                    }),
                );
                self.run_from_transcript(&transcript.text, transcript.language, &events)
            });
        finish(&events, result)
    }

    /// Run starting from an already known transcript.
    pub fn imagine(&self, transcript: &str) -> Result<MemoryImage, PipelineError> {
        let events = self.events.for_request(Uuid::new_v4().to_string());
        trace(
            &events,
            "request_started",
            json!({ "source": "transcript", "chars": transcript.chars().count() }),
        );
        let result = self.run_from_transcript(transcript, None, &events);
        finish(&events, result)
    }

    fn run_from_transcript(
        &self,
        transcript: &str,
        language: Option<String>,
        events: &EventWriter,
    ) -> Result<MemoryImage, PipelineError> {
        let decade = classify_decade(transcript)?;
        trace(
            events,
            "decade_classified",
            json!({ "decade": decade, "label": decade.label() }),
        );

        let instruction = build_instruction(transcript, decade);
        trace(
            events,
            "instruction_built",
            json!({ "chars": instruction.chars().count() }),
        );

        let settings = GenerationSettings::from_config(&self.config)?;
        let generator =
            ImageGenerator::with_sleeper(settings, self.failover.clone(), Arc::clone(&self.sleeper));
        let generation = generator.generate(&instruction, events)?;

        let image = self.normalizer.resolve(&generation.reference, events)?;
        let saved = self.gallery.save(&image, Utc::now())?;
        trace(
            events,
            "image_saved",
            json!({
                "file_name": saved.file_name,
                "path": saved.path,
                "bytes": saved.bytes,
            }),
        );

        Ok(MemoryImage {
            request_id: events.request_id().to_string(),
            transcript: transcript.trim().to_string(),
            language,
            decade,
            instruction,
            media_type: image.media_type,
            saved_path: saved.path,
            public_path: saved.public_path,
            bytes: saved.bytes,
            attempts: generation.attempts.len(),
        })
    }
}

fn finish(
    events: &EventWriter,
    result: Result<MemoryImage, PipelineError>,
) -> Result<MemoryImage, PipelineError> {
    match &result {
        Ok(image) => trace(
            events,
            "request_finished",
            json!({
                "decade": image.decade,
                "public_path": image.public_path,
                "attempts": image.attempts,
            }),
        ),
        Err(err) => trace(
            events,
            "request_failed",
            json!({
                "kind": err.kind(),
                "status": err.http_status(),
                "error": err.to_string(),
                "user_message": err.user_message(),
            }),
        ),
    }
    result
}
