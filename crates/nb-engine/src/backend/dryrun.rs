use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, Rgb, RgbImage};
use nb_contracts::{AspectRatio, NanoError, NanoResult};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::{BackendRequest, ImageBackend};

const DRYRUN_LONG_SIDE: u32 = 256;

/// Offline backend answering every call with a solid-color PNG.
///
/// The color is a digest of prompt and seed, so reruns are reproducible.
/// For edits the output keeps the dimensions of the first attachment.
#[derive(Debug, Clone, Default)]
pub struct DryrunBackend;

impl ImageBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn call(&self, request: &BackendRequest) -> NanoResult<Value> {
        let (width, height) = request
            .attachments
            .first()
            .and_then(|attachment| attachment_dims(&attachment.data))
            .unwrap_or_else(|| dims_for_aspect(request.aspect_ratio));
        let (r, g, b) = color_from_prompt(&request.prompt, request.seed.unwrap_or_default());
        let mut canvas = RgbImage::new(width, height);
        for pixel in canvas.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }

        let mut png = Vec::new();
        DynamicImage::ImageRgb8(canvas)
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|err| NanoError::Backend(format!("dryrun render failed: {err}")))?;

        Ok(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{
                        "inlineData": {
                            "mimeType": "image/png",
                            "data": BASE64.encode(png),
                        }
                    }]
                },
                "finishReason": "STOP",
            }],
            "modelVersion": request.model,
        }))
    }
}

fn attachment_dims(data: &str) -> Option<(u32, u32)> {
    let bytes = BASE64.decode(data.as_bytes()).ok()?;
    let decoded = image::load_from_memory(&bytes).ok()?;
    Some((decoded.width(), decoded.height()))
}

fn dims_for_aspect(aspect_ratio: Option<AspectRatio>) -> (u32, u32) {
    let ratio = aspect_ratio.unwrap_or(AspectRatio::Square);
    let (w, h) = ratio
        .as_str()
        .split_once(':')
        .and_then(|(w, h)| Some((w.parse::<u32>().ok()?, h.parse::<u32>().ok()?)))
        .unwrap_or((1, 1));
    if w >= h {
        (DRYRUN_LONG_SIDE, (DRYRUN_LONG_SIDE * h / w).max(1))
    } else {
        ((DRYRUN_LONG_SIDE * w / h).max(1), DRYRUN_LONG_SIDE)
    }
}

fn color_from_prompt(prompt: &str, seed: i64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

#[cfg(test)]
mod tests {
    use nb_contracts::AspectRatio;

    use super::{color_from_prompt, dims_for_aspect, DryrunBackend};
    use crate::backend::{BackendRequest, ImageBackend};
    use crate::payload::extract_payload;

    #[test]
    fn dryrun_response_is_extractable_and_sized_by_aspect() -> anyhow::Result<()> {
        let request = BackendRequest {
            model: "dryrun-image-1".to_string(),
            prompt: "boat".to_string(),
            attachments: Vec::new(),
            aspect_ratio: Some(AspectRatio::Landscape16x9),
            seed: Some(3),
        };
        let response = DryrunBackend.call(&request)?;
        let payload = extract_payload(&response, 0)?;
        let decoded = image::load_from_memory(&payload.decode()?)?;
        assert_eq!((decoded.width(), decoded.height()), (256, 144));
        Ok(())
    }

    #[test]
    fn color_depends_on_prompt_and_seed() {
        assert_eq!(color_from_prompt("boat", 1), color_from_prompt("boat", 1));
        assert_ne!(color_from_prompt("boat", 1), color_from_prompt("boat", 2));
        assert_eq!(dims_for_aspect(None), (256, 256));
        assert_eq!(dims_for_aspect(Some(AspectRatio::Portrait9x16)), (144, 256));
    }
}
