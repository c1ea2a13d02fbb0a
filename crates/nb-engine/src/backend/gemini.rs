use nb_contracts::{NanoError, NanoResult};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{BackendRequest, ImageBackend};
use crate::config::BackendConfig;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// `generateContent` transport for Gemini image models.
pub struct GeminiBackend {
    api_base: String,
    api_key: String,
    http: HttpClient,
}

impl GeminiBackend {
    pub fn new(config: &BackendConfig) -> NanoResult<Self> {
        let api_key = config.api_key()?.to_string();
        // Calls are allowed to take as long as the backend needs.
        let http = HttpClient::builder()
            .timeout(None)
            .build()
            .map_err(|err| NanoError::Config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            api_base: config.api_base().to_string(),
            api_key,
            http,
        })
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(request: &BackendRequest) -> Value {
        let mut parts = vec![json!({ "text": request.prompt })];
        for attachment in &request.attachments {
            parts.push(json!({
                "inlineData": {
                    "mimeType": attachment.mime_type,
                    "data": attachment.data,
                }
            }));
        }

        let mut generation_config = Map::new();
        generation_config.insert(
            "responseModalities".to_string(),
            Value::Array(vec![Value::String("IMAGE".to_string())]),
        );
        if let Some(aspect_ratio) = request.aspect_ratio {
            generation_config.insert(
                "imageConfig".to_string(),
                json!({ "aspectRatio": aspect_ratio.as_str() }),
            );
        }
        if let Some(seed) = request.seed {
            generation_config.insert("seed".to_string(), Value::Number(seed.into()));
        }

        json!({
            "contents": [{
                "role": "user",
                "parts": parts,
            }],
            "generationConfig": generation_config,
        })
    }
}

impl ImageBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn call(&self, request: &BackendRequest) -> NanoResult<Value> {
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_payload(request);
        debug!(
            endpoint = %endpoint,
            attachments = request.attachments.len(),
            "sending Gemini generateContent request"
        );
        let response = self
            .http
            .post(&endpoint)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&payload)
            .send()
            .map_err(|err| NanoError::Backend(format!("Gemini request failed ({endpoint}): {err}")))?;
        response_json_or_error("Gemini", response)
    }
}

fn response_json_or_error(backend: &str, response: HttpResponse) -> NanoResult<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(|err| NanoError::Backend(format!("{backend} response body read failed: {err}")))?;
    if !status.is_success() {
        return Err(NanoError::Backend(format!(
            "{backend} request failed ({code}): {}",
            error_message_from_body(&body)
        )));
    }
    serde_json::from_str(&body)
        .map_err(|err| NanoError::Backend(format!("{backend} returned invalid JSON payload: {err}")))
}

/// Prefers the API's own `error.message`; falls back to the raw body.
fn error_message_from_body(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|parsed| {
            parsed
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| truncate_text(body.trim(), 512))
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
