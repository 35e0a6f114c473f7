use std::sync::{Arc, OnceLock};

use memoir_contracts::events::EventWriter;
use memoir_contracts::images::ImageReference;
use memoir_contracts::prompt::instruction_for_attempt;
use regex::Regex;
use serde_json::{json, Value};

use crate::config::EngineConfig;
use crate::error::{truncate_text, PipelineError};
use crate::fallback::FailoverTransport;
use crate::http::HttpRequest;
use crate::retry::{run_with_backoff, Attempt, RetryPolicy, Sleeper, ThreadSleeper};
use crate::trace;

const DATA_URI_PATTERN: &str = r"data:image/[a-zA-Z0-9.+-]+;base64,[A-Za-z0-9+/=]+";
const URL_PATTERN: &str = r#"https?://[^\s)"]+"#;

/// Everything one generation run needs besides the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub endpoint: String,
    pub api_key: String,
    pub primary_model: String,
    pub fallback_model: Option<String>,
    pub referer: Option<String>,
    pub title: Option<String>,
    /// Orchestrator attempt cap and inter-attempt base delay.
    pub attempts: RetryPolicy,
    /// Timeout and retries of each single call.
    pub transport: RetryPolicy,
}

impl GenerationSettings {
    pub fn from_config(config: &EngineConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            endpoint: config.chat_completions_url(),
            api_key: config.require_api_key()?.to_string(),
            primary_model: config.image_model.clone(),
            fallback_model: config.image_fallback_model.clone(),
            referer: config.openrouter_referer.clone(),
            title: config.openrouter_title.clone(),
            attempts: config.generation,
            transport: config.generation_transport,
        })
    }

    pub fn model_for_attempt(&self, attempt: u32) -> &str {
        match self.fallback_model.as_deref() {
            Some(fallback) if attempt > 0 => fallback,
            _ => &self.primary_model,
        }
    }
}

/// One try against the generation service.
#[derive(Debug, Clone, PartialEq)]
pub struct CallAttempt {
    pub index: u32,
    pub model: String,
    pub instruction: String,
    pub failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub reference: ImageReference,
    pub attempts: Vec<CallAttempt>,
}

/// Drives attempts against the generation service until one yields an image
/// reference. The reference is returned unresolved.
#[derive(Clone)]
pub struct ImageGenerator {
    settings: GenerationSettings,
    transport: FailoverTransport,
    sleeper: Arc<dyn Sleeper>,
}

impl ImageGenerator {
    pub fn new(settings: GenerationSettings, transport: FailoverTransport) -> Self {
        Self::with_sleeper(settings, transport, Arc::new(ThreadSleeper))
    }

    pub fn with_sleeper(
        settings: GenerationSettings,
        transport: FailoverTransport,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            settings,
            transport,
            sleeper,
        }
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    pub fn generate(
        &self,
        instruction: &str,
        events: &EventWriter,
    ) -> Result<Generation, PipelineError> {
        let max_attempts = self.settings.attempts.max_attempts.max(1);
        let mut attempts: Vec<CallAttempt> = Vec::new();
        let result = run_with_backoff(
            &self.settings.attempts,
            self.sleeper.as_ref(),
            |attempt| {
                let model = self.settings.model_for_attempt(attempt).to_string();
                let text = instruction_for_attempt(instruction, attempt);
                trace(
                    events,
                    "generation_attempt",
                    json!({
                        "attempt": attempt + 1,
                        "max_attempts": max_attempts,
                        "model": model,
                        "instruction_chars": text.chars().count(),
                    }),
                );
                let outcome = self.call_once(&model, &text, events);
                attempts.push(CallAttempt {
                    index: attempt,
                    model: model.clone(),
                    instruction: text,
                    failure: outcome.as_ref().err().map(ToString::to_string),
                });
                match outcome {
                    Ok(reference) => Attempt::Done(reference),
                    Err(err) => {
                        trace(
                            events,
                            "generation_attempt_failed",
                            json!({
                                "attempt": attempt + 1,
                                "model": model,
                                "kind": err.kind(),
                                "retryable": err.is_retryable(),
                                "error": err.to_string(),
                                "user_message": err.user_message(),
                            }),
                        );
                        if err.is_retryable() {
                            Attempt::Retry(err)
                        } else {
                            Attempt::Fail(err)
                        }
                    }
                }
            },
            |_, _, _| {},
        );
        let reference = result?;
        trace(
            events,
            "generation_succeeded",
            json!({
                "attempts": attempts.len(),
                "reference": reference.kind(),
            }),
        );
        Ok(Generation {
            reference,
            attempts,
        })
    }

    fn call_once(
        &self,
        model: &str,
        instruction: &str,
        events: &EventWriter,
    ) -> Result<ImageReference, PipelineError> {
        let request = self.request_for(model, instruction);
        let response = self
            .transport
            .send(&request, &self.settings.transport, events)?;
        let payload: Value = serde_json::from_slice(&response.body).map_err(|err| {
            PipelineError::Parse(format!(
                "{err} (body: {})",
                truncate_text(response.text().trim(), 160)
            ))
        })?;
        if let Some(error) = payload.get("error") {
            if let Some(message) = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
            {
                return Err(PipelineError::UpstreamApi {
                    message: message.to_string(),
                    code: error.get("code").and_then(code_text),
                });
            }
        }
        extract_image_reference(&payload).ok_or_else(|| PipelineError::MissingResult {
            finish_reason: payload["choices"][0]["finish_reason"]
                .as_str()
                .map(str::to_string),
        })
    }

    fn request_for(&self, model: &str, instruction: &str) -> HttpRequest {
        let body = json!({
            "model": model,
            "messages": [{ "role": "user", "content": instruction }],
            "modalities": ["image", "text"],
        });
        let mut request =
            HttpRequest::post_json(&self.settings.endpoint, body).bearer_auth(&self.settings.api_key);
        if let Some(referer) = self.settings.referer.as_deref() {
            request = request.header("HTTP-Referer", referer);
        }
        if let Some(title) = self.settings.title.as_deref() {
            request = request.header("X-Title", title);
        }
        request
    }
}

type SignalExtractor = fn(&Value) -> Option<String>;

/// Image signal sources in priority order.
const EXTRACTORS: [(&str, SignalExtractor); 2] =
    [("images", signal_from_image_list), ("content", signal_from_content)];

/// Pulls the first image reference out of a chat-completions payload.
pub fn extract_image_reference(payload: &Value) -> Option<ImageReference> {
    let message = &payload["choices"][0]["message"];
    EXTRACTORS
        .iter()
        .find_map(|(_, extract)| extract(message))
        .and_then(|signal| ImageReference::from_signal(&signal))
}

fn signal_from_image_list(message: &Value) -> Option<String> {
    message
        .get("images")?
        .as_array()?
        .iter()
        .find_map(|entry| {
            entry
                .get("image_url")
                .and_then(url_of)
                .or_else(|| non_empty_str(entry.get("url")))
                .or_else(|| non_empty_str(entry.get("b64_json")))
                .or_else(|| non_empty_str(entry.get("data")))
        })
}

fn signal_from_content(message: &Value) -> Option<String> {
    match message.get("content")? {
        Value::String(text) => signal_in_text(text),
        Value::Array(parts) => parts.iter().find_map(|part| {
            part.get("image_url")
                .and_then(url_of)
                .or_else(|| non_empty_str(part.get("url")))
                .or_else(|| part.get("text").and_then(Value::as_str).and_then(signal_in_text))
        }),
        _ => None,
    }
}

fn signal_in_text(text: &str) -> Option<String> {
    let data_uri = data_uri_regex().and_then(|re| re.find(text));
    data_uri
        .or_else(|| url_regex().and_then(|re| re.find(text)))
        .map(|found| found.as_str().to_string())
}

/// `image_url` is either the locator itself or `{ "url": ... }`.
fn url_of(value: &Value) -> Option<String> {
    match value {
        Value::String(_) => non_empty_str(Some(value)),
        Value::Object(_) => non_empty_str(value.get("url")),
        _ => None,
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn code_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn data_uri_regex() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(DATA_URI_PATTERN).ok()).as_ref()
}

fn url_regex() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(URL_PATTERN).ok()).as_ref()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use memoir_contracts::prompt::IMAGE_ONLY_DIRECTIVE;

    use super::*;
    use crate::error::{TransportError, TransportErrorKind};
    use crate::fallback::FallbackPolicy;
    use crate::http::{HttpResponse, RequestBody};
    use crate::retry::testing::RecordingSleeper;
    use crate::test_support::{respond, respond_json, FakeExchange};
    use crate::transport::ResilientTransport;

    fn settings(attempts: u32, fallback_model: Option<&str>) -> GenerationSettings {
        GenerationSettings {
            endpoint: "http://router.test/api/v1/chat/completions".to_string(),
            api_key: "sk-test".to_string(),
            primary_model: "primary/model".to_string(),
            fallback_model: fallback_model.map(str::to_string),
            referer: Some("https://memoir.local".to_string()),
            title: Some("Memoir".to_string()),
            attempts: RetryPolicy {
                timeout: Duration::from_secs(60),
                max_attempts: attempts,
                base_delay: Duration::from_millis(1_200),
            },
            transport: RetryPolicy {
                timeout: Duration::from_secs(60),
                max_attempts: 1,
                base_delay: Duration::from_millis(800),
            },
        }
    }

    struct Harness {
        generator: ImageGenerator,
        exchange: Arc<FakeExchange>,
        sleeper: Arc<RecordingSleeper>,
    }

    fn harness(
        settings: GenerationSettings,
        outcomes: Vec<Result<HttpResponse, TransportError>>,
    ) -> Harness {
        let exchange = Arc::new(FakeExchange::new("pooled", outcomes));
        let sleeper = Arc::new(RecordingSleeper::default());
        let transport = FailoverTransport::new(
            ResilientTransport::with_sleeper(exchange.clone(), sleeper.clone()),
            FallbackPolicy::Disabled,
        );
        Harness {
            generator: ImageGenerator::with_sleeper(settings, transport, sleeper.clone()),
            exchange,
            sleeper,
        }
    }

    fn inline_image_reply() -> HttpResponse {
        respond_json(
            200,
            json!({
                "choices": [{
                    "message": {
                        "content": "",
                        "images": [{ "type": "image_url", "image_url": { "url": "data:image/png;base64,iVBORw0KGgo=" } }]
                    },
                    "finish_reason": "stop"
                }]
            }),
        )
    }

    fn text_only_reply() -> HttpResponse {
        respond_json(
            200,
            json!({
                "choices": [{
                    "message": { "content": "Here is a description of a warm 1970s kitchen." },
                    "finish_reason": "stop"
                }]
            }),
        )
    }

    fn sent_content(request: &HttpRequest) -> String {
        match &request.body {
            RequestBody::Json(body) => body["messages"][0]["content"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        }
    }

    fn sent_model(request: &HttpRequest) -> String {
        match &request.body {
            RequestBody::Json(body) => body["model"].as_str().unwrap_or_default().to_string(),
            _ => String::new(),
        }
    }

    #[test]
    fn service_error_then_inline_image_takes_two_calls() -> anyhow::Result<()> {
        let h = harness(
            settings(2, None),
            vec![
                Ok(respond_json(200, json!({ "error": { "message": "Provider overloaded", "code": 502 } }))),
                Ok(inline_image_reply()),
                Ok(text_only_reply()),
            ],
        );
        let generation = h
            .generator
            .generate("a picnic", &EventWriter::disabled("req"))?;
        assert_eq!(h.exchange.calls(), 2);
        assert_eq!(
            generation.reference,
            ImageReference::Inline {
                media_type: "image/png".to_string(),
                data: "iVBORw0KGgo=".to_string(),
            }
        );
        assert_eq!(generation.attempts.len(), 2);
        assert_eq!(
            generation.attempts[0].failure.as_deref(),
            Some("generation service error: Provider overloaded")
        );
        assert_eq!(generation.attempts[1].failure, None);
        assert_eq!(h.sleeper.slept(), vec![Duration::from_millis(1_200)]);
        Ok(())
    }

    #[test]
    fn descriptive_text_every_time_exhausts_attempts() {
        let h = harness(settings(3, None), vec![Ok(text_only_reply())]);
        let err = h
            .generator
            .generate("a picnic", &EventWriter::disabled("req"))
            .unwrap_err();
        assert_eq!(h.exchange.calls(), 3);
        assert!(matches!(
            err,
            PipelineError::MissingResult { ref finish_reason } if finish_reason.as_deref() == Some("stop")
        ));
        assert_eq!(
            h.sleeper.slept(),
            vec![Duration::from_millis(1_200), Duration::from_millis(2_400)]
        );
    }

    #[test]
    fn resets_without_fallback_surface_normalized_message() -> anyhow::Result<()> {
        let mut config = settings(2, None);
        config.transport.max_attempts = 3;
        let h = harness(
            config,
            vec![Err(TransportError::new(
                TransportErrorKind::ConnectionReset,
                "request failed: connection reset by peer",
            ))],
        );
        let temp = tempfile::tempdir()?;
        let log = temp.path().join("events.jsonl");
        let err = h
            .generator
            .generate("a picnic", &EventWriter::new(&log, "req-1"))
            .unwrap_err();
        assert_eq!(h.exchange.calls(), 6);
        assert!(err.user_message().contains("Connection reset"));
        assert!(err.user_message().contains("try again"));
        assert_eq!(err.http_status(), 502);
        let content = std::fs::read_to_string(&log)?;
        assert!(!content.contains("transport_fallback"));
        Ok(())
    }

    #[test]
    fn later_attempts_switch_model_and_append_directive() -> anyhow::Result<()> {
        let h = harness(
            settings(4, Some("fallback/model")),
            vec![Ok(text_only_reply()), Ok(text_only_reply()), Ok(inline_image_reply())],
        );
        h.generator
            .generate("a picnic", &EventWriter::disabled("req"))?;
        let requests = h.exchange.requests();
        assert_eq!(requests.len(), 3);

        assert_eq!(sent_model(&requests[0]), "primary/model");
        assert_eq!(sent_content(&requests[0]), "a picnic");
        for request in &requests[1..] {
            assert_eq!(sent_model(request), "fallback/model");
            assert_eq!(
                sent_content(request),
                format!("a picnic\n\n{IMAGE_ONLY_DIRECTIVE}")
            );
        }
        Ok(())
    }

    #[test]
    fn request_carries_auth_attribution_and_modalities() -> anyhow::Result<()> {
        let h = harness(settings(1, None), vec![Ok(inline_image_reply())]);
        h.generator
            .generate("a picnic", &EventWriter::disabled("req"))?;
        let request = &h.exchange.requests()[0];
        assert_eq!(request.url, "http://router.test/api/v1/chat/completions");
        assert!(request
            .headers
            .contains(&("Authorization".to_string(), "Bearer sk-test".to_string())));
        assert!(request
            .headers
            .contains(&("HTTP-Referer".to_string(), "https://memoir.local".to_string())));
        assert!(request
            .headers
            .contains(&("X-Title".to_string(), "Memoir".to_string())));
        let RequestBody::Json(body) = &request.body else {
            anyhow::bail!("expected a JSON body");
        };
        assert_eq!(body["modalities"], json!(["image", "text"]));
        assert_eq!(body["messages"][0]["role"], json!("user"));
        Ok(())
    }

    #[test]
    fn unauthorized_is_terminal() {
        let h = harness(settings(8, None), vec![Ok(respond(401, b"invalid key"))]);
        let err = h
            .generator
            .generate("a picnic", &EventWriter::disabled("req"))
            .unwrap_err();
        assert_eq!(h.exchange.calls(), 1);
        assert!(matches!(err, PipelineError::Transport(ref inner) if inner.status_code() == Some(401)));
        assert!(h.sleeper.slept().is_empty());
    }

    #[test]
    fn unparseable_body_is_retried() -> anyhow::Result<()> {
        let h = harness(
            settings(3, None),
            vec![Ok(respond(200, b"<html>gateway</html>")), Ok(inline_image_reply())],
        );
        let generation = h
            .generator
            .generate("a picnic", &EventWriter::disabled("req"))?;
        assert_eq!(h.exchange.calls(), 2);
        assert!(generation.attempts[0]
            .failure
            .as_deref()
            .unwrap_or_default()
            .starts_with("response parse failed"));
        Ok(())
    }

    #[test]
    fn image_list_wins_over_content() {
        let payload = json!({
            "choices": [{ "message": {
                "content": "see https://cdn.example.com/from-content.png",
                "images": [{ "image_url": "https://cdn.example.com/from-list.png" }]
            }}]
        });
        assert_eq!(
            extract_image_reference(&payload),
            Some(ImageReference::Remote {
                url: "https://cdn.example.com/from-list.png".to_string()
            })
        );
    }

    #[test]
    fn image_list_entries_fall_through_to_encoded_fields() {
        let payload = json!({
            "choices": [{ "message": { "images": [
                { "type": "image_url", "image_url": { "url": "" } },
                { "b64_json": "iVBORw0KGgo=" }
            ]}}]
        });
        assert_eq!(
            extract_image_reference(&payload),
            Some(ImageReference::Raw {
                data: "iVBORw0KGgo=".to_string()
            })
        );
    }

    #[test]
    fn data_uri_is_found_inside_text_before_urls() {
        let payload = json!({
            "choices": [{ "message": {
                "content": "Link https://example.com/page and data:image/webp;base64,UklGRg== done"
            }}]
        });
        assert_eq!(
            extract_image_reference(&payload),
            Some(ImageReference::Inline {
                media_type: "image/webp".to_string(),
                data: "UklGRg==".to_string(),
            })
        );
    }

    #[test]
    fn content_parts_are_scanned_in_order() {
        let payload = json!({
            "choices": [{ "message": { "content": [
                { "type": "text", "text": "Here you go:" },
                { "type": "text", "text": "(https://cdn.example.com/a.jpg)" },
                { "type": "image_url", "image_url": { "url": "https://cdn.example.com/b.jpg" } }
            ]}}]
        });
        assert_eq!(
            extract_image_reference(&payload),
            Some(ImageReference::Remote {
                url: "https://cdn.example.com/a.jpg".to_string()
            })
        );
    }

    #[test]
    fn no_signal_means_no_reference() {
        assert_eq!(extract_image_reference(&json!({})), None);
        assert_eq!(
            extract_image_reference(&json!({ "choices": [{ "message": { "content": "just words" } }] })),
            None
        );
    }
}
