//! HTTP surface: one endpoint that turns text prompts into a WAV download.

pub mod artifact;
pub mod error;
pub mod generate;

use std::sync::Arc;

use axum::{routing::post, Router};
use tower_http::trace::TraceLayer;

use crate::pipeline::MusicGenerator;

pub const GENERATE_ROUTE: &str = "/generate-music/";

/// Shared application state.  The model is loaded once at startup and only
/// read afterwards.
#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<dyn MusicGenerator>,
}

impl AppState {
    pub fn new(generator: Arc<dyn MusicGenerator>) -> Self {
        Self { generator }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(GENERATE_ROUTE, post(generate::generate_music))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{
        body::{Body, Bytes},
        http::{header, HeaderMap, Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{error::GenerationError, pipeline::GeneratedAudio, wav::to_pcm16};

    const RATE: u32 = 32_000;

    /// Clip `i` is `100 * (i + 1)` samples of constant amplitude `0.25 * (i + 1)`.
    struct StubGenerator {
        calls: AtomicUsize,
    }

    impl MusicGenerator for StubGenerator {
        fn sample_rate(&self) -> u32 {
            RATE
        }

        fn generate(&self, prompts: &[String]) -> crate::error::Result<GeneratedAudio> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if prompts.is_empty() {
                return Err(GenerationError::Encoding("no prompts to encode".into()));
            }
            let clips = (0..prompts.len())
                .map(|i| vec![0.25 * (i + 1) as f32; 100 * (i + 1)])
                .collect();
            Ok(GeneratedAudio { clips, sample_rate: RATE })
        }
    }

    struct FailingGenerator;

    impl MusicGenerator for FailingGenerator {
        fn sample_rate(&self) -> u32 {
            RATE
        }

        fn generate(&self, _prompts: &[String]) -> crate::error::Result<GeneratedAudio> {
            Err(GenerationError::Inference("decoder step 0: out of memory".into()))
        }
    }

    fn stub() -> Arc<StubGenerator> {
        Arc::new(StubGenerator { calls: AtomicUsize::new(0) })
    }

    async fn send(
        generator: Arc<dyn MusicGenerator>,
        method: &str,
        body: &str,
    ) -> (StatusCode, HeaderMap, Bytes) {
        let request = Request::builder()
            .method(method)
            .uri(GENERATE_ROUTE)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        dispatch(generator, request).await
    }

    async fn dispatch(
        generator: Arc<dyn MusicGenerator>,
        request: Request<Body>,
    ) -> (StatusCode, HeaderMap, Bytes) {
        let app = create_router(AppState::new(generator));
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, bytes)
    }

    fn read_wav(bytes: &Bytes) -> (hound::WavSpec, Vec<i16>) {
        let reader = hound::WavReader::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
        let spec = reader.spec();
        let samples = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        (spec, samples)
    }

    fn error_body(bytes: &Bytes) -> serde_json::Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_single_prompt_returns_wav_attachment() {
        let generator = stub();
        let (status, headers, body) =
            send(generator.clone(), "POST", r#"{"prompts": ["calm piano melody"]}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "audio/wav");
        let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.contains("generated_music.wav"), "{disposition}");
        assert_eq!(headers[header::CONTENT_LENGTH], body.len().to_string().as_str());

        let (spec, samples) = read_wav(&body);
        assert_eq!(spec.sample_rate, RATE);
        assert_eq!(spec.channels, 1);
        assert_eq!(samples.len(), 100);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_returns_only_first_clip() {
        let (status, _, body) =
            send(stub(), "POST", r#"{"prompts": ["calm piano", "upbeat drum solo"]}"#).await;

        assert_eq!(status, StatusCode::OK);
        let (_, samples) = read_wav(&body);
        assert_eq!(samples.len(), 100);
        assert!(samples.iter().all(|&s| s == to_pcm16(0.25)));
    }

    #[tokio::test]
    async fn test_empty_prompt_list_is_server_error() {
        let (status, headers, body) = send(stub(), "POST", r#"{"prompts": []}"#).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        let json = error_body(&body);
        assert_eq!(json["kind"], "encoding_error");
        assert!(json["detail"].as_str().unwrap().contains("no prompts"));
    }

    #[tokio::test]
    async fn test_generation_failure_reports_detail() {
        let (status, _, body) =
            send(Arc::new(FailingGenerator), "POST", r#"{"prompts": ["calm"]}"#).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let json = error_body(&body);
        assert_eq!(json["kind"], "inference_error");
        assert_eq!(json["detail"], "inference failed: decoder step 0: out of memory");
    }

    #[tokio::test]
    async fn test_missing_prompts_never_reaches_model() {
        let generator = stub();
        let (status, _, body) = send(generator.clone(), "POST", r#"{"text": "calm"}"#).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(error_body(&body)["kind"], "validation_error");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_json_is_unprocessable() {
        let generator = stub();
        let (status, _, body) = send(generator.clone(), "POST", r#"{"prompts": ["#).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(error_body(&body)["kind"], "validation_error");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wrong_prompt_type_is_unprocessable() {
        let (status, _, body) = send(stub(), "POST", r#"{"prompts": "calm piano"}"#).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(error_body(&body)["kind"], "validation_error");
    }

    #[tokio::test]
    async fn test_missing_content_type_is_unprocessable() {
        let generator = stub();
        let request = Request::builder()
            .method("POST")
            .uri(GENERATE_ROUTE)
            .body(Body::from(r#"{"prompts": ["calm"]}"#))
            .unwrap();
        let (status, _, body) = dispatch(generator.clone(), request).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(error_body(&body)["kind"], "validation_error");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_get_is_not_allowed() {
        let (status, _, _) = send(stub(), "GET", "").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_sequential_requests_share_model() {
        let generator = stub();
        let state: Arc<dyn MusicGenerator> = generator.clone();
        for _ in 0..3 {
            let (status, _, _) = send(state.clone(), "POST", r#"{"prompts": ["piano"]}"#).await;
            assert_eq!(status, StatusCode::OK);
        }
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    }
}
