pub mod config;
pub mod error;
pub mod fallback;
pub mod gallery;
pub mod generation;
pub mod http;
pub mod normalize;
pub mod pipeline;
pub mod retry;
pub mod transcribe;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

use memoir_contracts::events::EventWriter;
use serde_json::{Map, Value};

pub use config::EngineConfig;
pub use error::{FailureClass, PipelineError, TransportError, TransportErrorKind};
pub use fallback::{FailoverTransport, FallbackPolicy, Ipv4Exchange};
pub use gallery::{Gallery, SavedImage};
pub use generation::{CallAttempt, Generation, GenerationSettings, ImageGenerator};
pub use http::{HttpExchange, HttpRequest, HttpResponse, PooledExchange};
pub use normalize::ImageNormalizer;
pub use pipeline::{MemoryImage, MemoryPipeline};
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};
pub use transcribe::{AudioUpload, Transcriber, Transcript};
pub use transport::ResilientTransport;

/// Emits a diagnostic event; a failing log sink never fails the caller.
pub(crate) fn trace(events: &EventWriter, event_type: &str, payload: Value) {
    let _ = events.emit(event_type, map_object(payload));
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
