/// Media type assumed when a reference does not declare one.
pub const DEFAULT_MEDIA_TYPE: &str = "image/png";

/// Unresolved pointer to generated image data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    /// `data:<media-type>;base64,<payload>`
    Inline { media_type: String, data: String },
    /// Remote locator that still has to be fetched.
    Remote { url: String },
    /// Bare encoded string without scheme or media type.
    Raw { data: String },
}

impl ImageReference {
    /// Classifies a non-empty image signal pulled out of a service response.
    pub fn from_signal(signal: &str) -> Option<Self> {
        let trimmed = signal.trim();
        if trimmed.is_empty() {
            return None;
        }
        let lowered = trimmed.to_ascii_lowercase();
        if lowered.starts_with("data:") {
            if let Some((meta, payload)) = trimmed.split_once(',') {
                let media_type = meta
                    .strip_prefix("data:")
                    .or_else(|| meta.get(5..))
                    .and_then(|rest| rest.split(';').next())
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .unwrap_or(DEFAULT_MEDIA_TYPE)
                    .to_string();
                return Some(Self::Inline {
                    media_type,
                    data: payload.trim().to_string(),
                });
            }
        }
        if lowered.starts_with("http://") || lowered.starts_with("https://") {
            return Some(Self::Remote {
                url: trimmed.to_string(),
            });
        }
        Some(Self::Raw {
            data: trimmed.to_string(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Inline { .. } => "inline",
            Self::Remote { .. } => "remote",
            Self::Raw { .. } => "raw",
        }
    }
}

/// Final artifact of a memory request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl DecodedImage {
    pub fn new(bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            bytes,
            media_type: media_type.into(),
        }
    }
}
