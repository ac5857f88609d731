//! POST /generate-music/

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Deserialize;
use tracing::{debug, info};

use super::{artifact::AudioArtifact, error::ApiError, AppState};
use crate::{error::GenerationError, pipeline::MusicGenerator};

#[derive(Debug, Deserialize)]
pub struct GenerationRequest {
    pub prompts: Vec<String>,
}

pub async fn generate_music(
    State(state): State<AppState>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<AudioArtifact, ApiError> {
    let Json(request) = payload?;
    info!("Generating music for {} prompt(s)", request.prompts.len());

    let generator = Arc::clone(&state.generator);
    let artifact = tokio::task::spawn_blocking(move || {
        render_first_clip(generator.as_ref(), &request.prompts)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("generation task failed: {e}")))??;

    info!("Returning {} ({} bytes)", super::artifact::FILENAME, artifact.content_length());
    Ok(artifact)
}

/// Run the whole batch, then keep only the clip of the first prompt.
fn render_first_clip(
    generator: &dyn MusicGenerator,
    prompts: &[String],
) -> Result<AudioArtifact, GenerationError> {
    let audio = generator.generate(prompts)?;
    if audio.clips.len() > 1 {
        debug!("Discarding {} clip(s) after the first", audio.clips.len() - 1);
    }
    let clip = audio
        .first_clip()
        .ok_or_else(|| GenerationError::Inference("model returned no audio".into()))?;
    debug!("First clip: {:.2} s at {} Hz", audio.duration_secs(), audio.sample_rate);
    AudioArtifact::write(clip, audio.sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::GeneratedAudio;

    struct Fixed(GeneratedAudio);

    impl MusicGenerator for Fixed {
        fn sample_rate(&self) -> u32 {
            self.0.sample_rate
        }

        fn generate(&self, _prompts: &[String]) -> crate::error::Result<GeneratedAudio> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_request_deserializes() {
        let req: GenerationRequest =
            serde_json::from_str(r#"{"prompts": ["calm piano", "upbeat drum solo"]}"#).unwrap();
        assert_eq!(req.prompts, vec!["calm piano", "upbeat drum solo"]);
    }

    #[test]
    fn test_request_rejects_non_string_prompts() {
        assert!(serde_json::from_str::<GenerationRequest>(r#"{"prompts": [1, 2]}"#).is_err());
        assert!(serde_json::from_str::<GenerationRequest>(r#"{"prompts": "calm"}"#).is_err());
    }

    #[test]
    fn test_only_first_clip_is_written() {
        let generator = Fixed(GeneratedAudio {
            clips: vec![vec![0.5; 10], vec![0.25; 20]],
            sample_rate: 16_000,
        });
        let artifact = render_first_clip(&generator, &["a".into(), "b".into()]).unwrap();
        let reader = hound::WavReader::open(artifact.path()).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.len(), 10);
    }

    #[test]
    fn test_no_clips_is_inference_error() {
        let generator = Fixed(GeneratedAudio { clips: Vec::new(), sample_rate: 32_000 });
        let err = render_first_clip(&generator, &["a".into()]).err().unwrap();
        assert_eq!(err.kind(), "inference_error");
    }
}
