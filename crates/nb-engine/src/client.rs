use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use nb_contracts::{GenerationRequest, ImageFormat, NanoError, NanoResult};
use tracing::debug;

use crate::backend::{Attachment, BackendRequest, ImageBackend};
use crate::payload::{extract_payload, RawImagePayload};
use crate::transform::sniff_format;

/// Drives backend calls for one model and turns responses into payloads.
pub struct GenerationClient {
    backend: Box<dyn ImageBackend>,
    model: String,
}

impl GenerationClient {
    pub fn new(backend: Box<dyn ImageBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// One backend call per requested image, strictly in order.
    ///
    /// Either all `count` payloads come back or nothing does.
    pub fn generate(&self, request: &GenerationRequest) -> NanoResult<Vec<RawImagePayload>> {
        let total = request.count();
        let backend_request = self.backend_request(request, Vec::new());
        let mut payloads = Vec::with_capacity(total);
        for call_index in 0..total {
            debug!(
                backend = self.backend.name(),
                model = %self.model,
                call = call_index + 1,
                total,
                "generation call"
            );
            let payload = self
                .backend
                .call(&backend_request)
                .and_then(|response| extract_payload(&response, call_index))
                .map_err(|source| wrap_call_error(source, call_index, total))?;
            payloads.push(payload);
        }

        if payloads.len() != total {
            return Err(NanoError::MalformedResponse(format!(
                "expected {total} images, received {}",
                payloads.len()
            )));
        }
        Ok(payloads)
    }

    /// Single multi-part call: prompt, base image, then the mask if the
    /// request carries one.
    pub fn edit(
        &self,
        base_image: &[u8],
        request: &GenerationRequest,
    ) -> NanoResult<RawImagePayload> {
        let mut attachments = vec![attachment(base_image)];
        if let Some(mask) = request.mask() {
            attachments.push(attachment(mask));
        }
        let backend_request = self.backend_request(request, attachments);
        debug!(
            backend = self.backend.name(),
            model = %self.model,
            attachments = backend_request.attachments.len(),
            "edit call"
        );
        let response = self.backend.call(&backend_request)?;
        extract_payload(&response, 0)
    }

    fn backend_request(
        &self,
        request: &GenerationRequest,
        attachments: Vec<Attachment>,
    ) -> BackendRequest {
        BackendRequest {
            model: self.model.clone(),
            prompt: request.prompt().to_string(),
            attachments,
            aspect_ratio: request.aspect_ratio(),
            seed: request.seed(),
        }
    }
}

fn wrap_call_error(source: NanoError, call_index: usize, total: usize) -> NanoError {
    if total <= 1 {
        return source;
    }
    NanoError::Generation {
        call: call_index + 1,
        total,
        source: Box::new(source),
    }
}

fn attachment(bytes: &[u8]) -> Attachment {
    let mime_type = sniff_format(bytes)
        .unwrap_or(ImageFormat::Png)
        .mime_type()
        .to_string();
    Attachment {
        mime_type,
        data: BASE64.encode(bytes),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use nb_contracts::{AspectRatio, GenerationRequest, NanoError, NanoResult};
    use serde_json::{json, Value};

    use super::GenerationClient;
    use crate::backend::{BackendRequest, ImageBackend};
    use crate::payload::tests::response_with_parts;
    use crate::transform::tests::noisy_png;

    /// Answers calls from a script; an empty script keeps returning images.
    #[derive(Clone, Default)]
    pub(crate) struct ScriptedBackend {
        script: Arc<Mutex<VecDeque<NanoResult<Value>>>>,
        calls: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<BackendRequest>>>,
    }

    impl ScriptedBackend {
        pub(crate) fn with_script(script: Vec<NanoResult<Value>>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into())),
                ..Self::default()
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn seen(&self) -> Vec<BackendRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    pub(crate) fn image_response(bytes: &[u8]) -> Value {
        response_with_parts(json!([
            { "inlineData": { "mimeType": "image/png", "data": BASE64.encode(bytes) } }
        ]))
    }

    impl ImageBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn call(&self, request: &BackendRequest) -> NanoResult<Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request.clone());
            match self.script.lock().unwrap().pop_front() {
                Some(next) => next,
                None => Ok(image_response(format!("image-{call}").as_bytes())),
            }
        }
    }

    fn client(backend: &ScriptedBackend) -> GenerationClient {
        GenerationClient::new(Box::new(backend.clone()), "test-model")
    }

    #[test]
    fn generate_returns_exactly_count_payloads_in_call_order() -> anyhow::Result<()> {
        for count in 1..=8 {
            let backend = ScriptedBackend::default();
            let request = GenerationRequest::new("a red circle", count)?;
            let payloads = client(&backend).generate(&request)?;
            assert_eq!(payloads.len(), count);
            assert_eq!(backend.calls(), count);
            for (idx, payload) in payloads.iter().enumerate() {
                assert_eq!(payload.source_call_index(), idx);
                assert_eq!(payload.decode()?, format!("image-{idx}").into_bytes());
            }
        }
        Ok(())
    }

    #[test]
    fn failed_middle_call_aborts_the_whole_request() -> anyhow::Result<()> {
        let backend = ScriptedBackend::with_script(vec![
            Ok(image_response(b"one")),
            Ok(response_with_parts(json!([]))),
            Ok(image_response(b"three")),
        ]);
        let request = GenerationRequest::new("a red circle", 3)?;
        let err = client(&backend).generate(&request).unwrap_err();
        match &err {
            NanoError::Generation { call, total, .. } => assert_eq!((*call, *total), (2, 3)),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(err.root(), NanoError::NoImageInResponse));
        assert_eq!(backend.calls(), 2);
        Ok(())
    }

    #[test]
    fn single_call_errors_are_not_wrapped() -> anyhow::Result<()> {
        let backend = ScriptedBackend::with_script(vec![Err(NanoError::Backend(
            "API key not valid".to_string(),
        ))]);
        let err = client(&backend)
            .generate(&GenerationRequest::single("a red circle")?)
            .unwrap_err();
        assert_eq!(err.to_string(), "Image generation failed: API key not valid");
        Ok(())
    }

    #[test]
    fn generation_options_reach_every_call() -> anyhow::Result<()> {
        let backend = ScriptedBackend::default();
        let request = GenerationRequest::new("boat", 2)?
            .with_aspect_ratio(Some(AspectRatio::Landscape16x9))
            .with_seed(Some(7));
        client(&backend).generate(&request)?;
        for seen in backend.seen() {
            assert_eq!(seen.model, "test-model");
            assert_eq!(seen.prompt, "boat");
            assert_eq!(seen.aspect_ratio, Some(AspectRatio::Landscape16x9));
            assert_eq!(seen.seed, Some(7));
            assert!(seen.attachments.is_empty());
        }
        Ok(())
    }

    #[test]
    fn edit_sends_base_image_then_mask() -> anyhow::Result<()> {
        let base = noisy_png(4, 4);
        let mask = b"\xff\xd8\xff\xe0 fake jpeg mask".to_vec();
        let backend = ScriptedBackend::default();
        let request = GenerationRequest::single("remove the hat")?.with_mask(Some(mask.clone()));
        let payload = client(&backend).edit(&base, &request)?;
        assert_eq!(payload.decode()?, b"image-0");

        let seen = backend.seen();
        assert_eq!(seen.len(), 1);
        let attachments = &seen[0].attachments;
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].mime_type, "image/png");
        assert_eq!(BASE64.decode(&attachments[0].data)?, base);
        assert_eq!(attachments[1].mime_type, "image/jpeg");
        assert_eq!(BASE64.decode(&attachments[1].data)?, mask);
        Ok(())
    }

    #[test]
    fn edit_without_mask_sends_one_attachment() -> anyhow::Result<()> {
        let backend = ScriptedBackend::default();
        client(&backend).edit(&noisy_png(2, 2), &GenerationRequest::single("sharpen")?)?;
        assert_eq!(backend.seen()[0].attachments.len(), 1);
        Ok(())
    }
}
