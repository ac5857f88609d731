//! The seam between the HTTP layer and the model.

use crate::error::Result;

/// Mono clips produced for one batch of prompts, in prompt order.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAudio {
    pub clips: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl GeneratedAudio {
    /// The clip generated for the first prompt of the batch.
    pub fn first_clip(&self) -> Option<&[f32]> {
        self.clips.first().map(Vec::as_slice)
    }

    /// Length of the first clip in seconds.
    pub fn duration_secs(&self) -> f32 {
        self.first_clip().map_or(0.0, |c| c.len() as f32 / self.sample_rate as f32)
    }
}

/// A loaded text-to-music model, shared read-only across requests.
pub trait MusicGenerator: Send + Sync {
    /// Native output sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Generate one clip per prompt.  Blocking; call from a blocking context.
    fn generate(&self, prompts: &[String]) -> Result<GeneratedAudio>;
}
