use std::sync::OnceLock;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use memoir_contracts::events::EventWriter;
use memoir_contracts::images::{DecodedImage, ImageReference, DEFAULT_MEDIA_TYPE};
use regex::Regex;
use serde_json::json;

use crate::error::PipelineError;
use crate::http::HttpRequest;
use crate::retry::RetryPolicy;
use crate::trace;
use crate::transport::ResilientTransport;

const RAW_PAYLOAD_PATTERN: &str = r"^[A-Za-z0-9+/=]+$";

/// Standard alphabet that accepts payloads with or without `=` padding.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Resolves an [`ImageReference`] into bytes plus media type.
#[derive(Clone)]
pub struct ImageNormalizer {
    transport: ResilientTransport,
    download: RetryPolicy,
}

impl ImageNormalizer {
    pub fn new(transport: ResilientTransport, download: RetryPolicy) -> Self {
        Self {
            transport,
            download,
        }
    }

    pub fn resolve(
        &self,
        reference: &ImageReference,
        events: &EventWriter,
    ) -> Result<DecodedImage, PipelineError> {
        let image = match reference {
            ImageReference::Inline { media_type, data } => {
                DecodedImage::new(decode_base64(data)?, media_type.clone())
            }
            ImageReference::Remote { url } => self.download(url, events)?,
            ImageReference::Raw { data } => {
                if !is_plausible_base64(data) {
                    return Err(PipelineError::Decode(
                        "unrecognized image payload (not a data URI, URL, or base64)".to_string(),
                    ));
                }
                DecodedImage::new(decode_base64(data)?, DEFAULT_MEDIA_TYPE)
            }
        };
        if image.bytes.is_empty() {
            return Err(PipelineError::Decode("image payload is empty".to_string()));
        }
        trace(
            events,
            "image_resolved",
            json!({
                "reference": reference.kind(),
                "media_type": image.media_type,
                "bytes": image.bytes.len(),
            }),
        );
        Ok(image)
    }

    fn download(&self, url: &str, events: &EventWriter) -> Result<DecodedImage, PipelineError> {
        let response = self
            .transport
            .attempt(&HttpRequest::get(url), &self.download, events)?;
        let declared = response
            .content_type()
            .and_then(|value| value.split(';').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(content_type) = declared {
            if !content_type.to_ascii_lowercase().starts_with("image/") {
                trace(
                    events,
                    "image_rejected",
                    json!({ "url": url, "content_type": content_type }),
                );
                return Err(PipelineError::Decode(format!(
                    "remote reference is not an image (content-type {content_type})"
                )));
            }
        }
        let media_type = declared.unwrap_or(DEFAULT_MEDIA_TYPE).to_string();
        Ok(DecodedImage::new(response.body, media_type))
    }
}

fn decode_base64(data: &str) -> Result<Vec<u8>, PipelineError> {
    let compact: String = data.chars().filter(|ch| !ch.is_whitespace()).collect();
    LENIENT_BASE64
        .decode(compact.as_bytes())
        .map_err(|err| PipelineError::Decode(format!("invalid base64 image data: {err}")))
}

fn is_plausible_base64(data: &str) -> bool {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(RAW_PAYLOAD_PATTERN).ok())
        .as_ref()
        .map(|re| re.is_match(data))
        .unwrap_or(false)
}
