//! Payload extraction from backend responses.
//!
//! The response shape is not under our control: image data may arrive as a
//! typed `inlineData` attachment or, in some response variants, as a long
//! base64 string inside a plain `text` part. Both are accepted. Only the
//! first qualifying part of the first candidate is ever used.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use nb_contracts::{NanoError, NanoResult};
use serde_json::Value;
use tracing::{debug, warn};

/// Text parts shorter than this are never treated as image data.
pub const MIN_TEXT_PAYLOAD_CHARS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePart {
    BinaryAttachment {
        mime_type: Option<String>,
        data: String,
    },
    TextEncodedImage {
        data: String,
    },
}

impl ImagePart {
    pub fn data(&self) -> &str {
        match self {
            Self::BinaryAttachment { data, .. } | Self::TextEncodedImage { data } => data,
        }
    }

    pub fn mime_type(&self) -> Option<&str> {
        match self {
            Self::BinaryAttachment { mime_type, .. } => mime_type.as_deref(),
            Self::TextEncodedImage { .. } => None,
        }
    }
}

/// Base64 image data extracted from one backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImagePayload {
    encoded: String,
    source_call_index: usize,
    mime_type: Option<String>,
}

impl RawImagePayload {
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn source_call_index(&self) -> usize {
        self.source_call_index
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn decode(&self) -> NanoResult<Vec<u8>> {
        BASE64.decode(self.encoded.as_bytes()).map_err(|err| {
            NanoError::MalformedResponse(format!("image payload is not valid base64: {err}"))
        })
    }
}

/// Length and alphabet predicate for image data smuggled in a text field.
///
/// Equivalent to `text.len() >= 1000 && /^[A-Za-z0-9+/]*={0,2}$/`.
pub fn looks_like_base64_image(text: &str) -> bool {
    if text.len() < MIN_TEXT_PAYLOAD_CHARS {
        return false;
    }
    let body = text
        .strip_suffix("==")
        .or_else(|| text.strip_suffix('='))
        .unwrap_or(text);
    body.bytes()
        .all(|byte| byte.is_ascii_alphanumeric() || byte == b'+' || byte == b'/')
}

pub fn classify_part(part: &Value) -> Option<ImagePart> {
    let inline = part
        .get("inlineData")
        .or_else(|| part.get("inline_data"))
        .and_then(Value::as_object);
    if let Some(inline) = inline {
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !data.is_empty() {
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .map(str::to_string);
            return Some(ImagePart::BinaryAttachment {
                mime_type,
                data: data.to_string(),
            });
        }
    }

    part.get("text")
        .and_then(Value::as_str)
        .filter(|text| looks_like_base64_image(text))
        .map(|text| ImagePart::TextEncodedImage {
            data: text.to_string(),
        })
}

pub fn extract_payload(response: &Value, call_index: usize) -> NanoResult<RawImagePayload> {
    let candidates = response
        .get("candidates")
        .and_then(Value::as_array)
        .ok_or_else(|| NanoError::MalformedResponse("response has no candidates".to_string()))?;
    let first = candidates
        .first()
        .ok_or_else(|| NanoError::MalformedResponse("candidate list is empty".to_string()))?;
    let parts = first
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            NanoError::MalformedResponse("first candidate has no content parts".to_string())
        })?;

    for (part_index, part) in parts.iter().enumerate() {
        let Some(image) = classify_part(part) else {
            continue;
        };
        match BASE64.decode(image.data().as_bytes()) {
            Ok(bytes) if !bytes.is_empty() => {
                debug!(
                    call = call_index + 1,
                    part = part_index,
                    bytes = bytes.len(),
                    text_encoded = matches!(image, ImagePart::TextEncodedImage { .. }),
                    "accepted image payload"
                );
                let mime_type = image.mime_type().map(str::to_string);
                return Ok(RawImagePayload {
                    encoded: image.data().to_string(),
                    source_call_index: call_index,
                    mime_type,
                });
            }
            Ok(_) => continue,
            Err(err) => {
                warn!(
                    call = call_index + 1,
                    part = part_index,
                    "discarding image part that is not valid base64: {err}"
                );
            }
        }
    }

    Err(NanoError::NoImageInResponse)
}
