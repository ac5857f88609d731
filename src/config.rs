//! `config.json` / `generation_config.json` schemas for MusicGen repositories.
//!
//! Only the fields the ONNX runner needs are deserialised; everything else in
//! the HuggingFace configs is ignored.  Absent fields fall back to the values
//! shipped with `musicgen-small`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Default cap on generated audio tokens per request (~5 s at 50 frames/s).
pub const DEFAULT_MAX_NEW_TOKENS: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// config.json
// ─────────────────────────────────────────────────────────────────────────────

/// Deserialised `config.json` of a MusicGen repository.
#[derive(Debug, Clone, Deserialize)]
pub struct MusicgenConfig {
    pub decoder: DecoderConfig,
    pub audio_encoder: AudioEncoderConfig,
}

/// The `decoder` section: the autoregressive audio-token LM.
#[derive(Debug, Clone, Deserialize)]
pub struct DecoderConfig {
    #[serde(default = "default_num_codebooks")]
    pub num_codebooks: usize,

    #[serde(default = "default_vocab_size")]
    pub vocab_size: usize,

    #[serde(default = "default_num_hidden_layers")]
    pub num_hidden_layers: usize,

    #[serde(default = "default_num_attention_heads")]
    pub num_attention_heads: usize,

    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,

    #[serde(default = "default_special_token")]
    pub pad_token_id: i64,

    #[serde(default = "default_special_token")]
    pub bos_token_id: i64,
}

/// The `audio_encoder` section (EnCodec).
#[derive(Debug, Clone, Deserialize)]
pub struct AudioEncoderConfig {
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: u32,
}

fn default_num_codebooks() -> usize {
    4
}

fn default_vocab_size() -> usize {
    2048
}

fn default_num_hidden_layers() -> usize {
    24
}

fn default_num_attention_heads() -> usize {
    16
}

fn default_hidden_size() -> usize {
    1024
}

fn default_special_token() -> i64 {
    2048
}

fn default_sampling_rate() -> u32 {
    32_000
}

impl MusicgenConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Cannot read config: {}", path.display()))?;
        let config: Self = serde_json::from_slice(&bytes).context("Failed to parse config.json")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let d = &self.decoder;
        if d.num_codebooks == 0 {
            bail!("config.json: decoder.num_codebooks must be > 0");
        }
        if d.num_attention_heads == 0 || d.hidden_size % d.num_attention_heads != 0 {
            bail!(
                "config.json: hidden_size {} is not divisible by num_attention_heads {}",
                d.hidden_size,
                d.num_attention_heads
            );
        }
        if self.audio_encoder.sampling_rate == 0 {
            bail!("config.json: audio_encoder.sampling_rate must be > 0");
        }
        Ok(())
    }

    /// Per-head dimension of the decoder attention layers.
    pub fn head_dim(&self) -> usize {
        self.decoder.hidden_size / self.decoder.num_attention_heads
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// generation_config.json
// ─────────────────────────────────────────────────────────────────────────────

/// Sampling parameters.  Read from `generation_config.json`, then completed by
/// the server with `max_new_tokens` and an optional fixed `seed`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_do_sample")]
    pub do_sample: bool,

    /// Classifier-free guidance weight.  Values `<= 1.0` disable guidance.
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f32,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Falls back to `decoder.bos_token_id` when absent.
    #[serde(default)]
    pub decoder_start_token_id: Option<i64>,

    /// Not part of the HuggingFace file; set once at startup.
    #[serde(skip, default = "default_max_new_tokens")]
    pub max_new_tokens: usize,

    /// Not part of the HuggingFace file; `None` draws a fresh seed per call.
    #[serde(skip)]
    pub seed: Option<u64>,
}

fn default_do_sample() -> bool {
    true
}

fn default_guidance_scale() -> f32 {
    3.0
}

fn default_top_k() -> usize {
    250
}

fn default_temperature() -> f32 {
    1.0
}

fn default_max_new_tokens() -> usize {
    DEFAULT_MAX_NEW_TOKENS
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            do_sample: default_do_sample(),
            guidance_scale: default_guidance_scale(),
            top_k: default_top_k(),
            temperature: default_temperature(),
            decoder_start_token_id: None,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            seed: None,
        }
    }
}

impl GenerationConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Cannot read generation config: {}", path.display()))?;
        serde_json::from_slice(&bytes).context("Failed to parse generation_config.json")
    }

    /// Whether an unconditional half is added to the batch.
    pub fn uses_guidance(&self) -> bool {
        self.guidance_scale > 1.0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // Trimmed copy of facebook/musicgen-small's config.json.
    const MUSICGEN_SMALL: &str = r#"{
        "architectures": ["MusicgenForConditionalGeneration"],
        "audio_encoder": { "model_type": "encodec", "sampling_rate": 32000, "frame_rate": 50 },
        "decoder": {
            "model_type": "musicgen_decoder",
            "num_codebooks": 4,
            "vocab_size": 2048,
            "num_hidden_layers": 24,
            "num_attention_heads": 16,
            "hidden_size": 1024,
            "pad_token_id": 2048,
            "bos_token_id": 2048
        },
        "text_encoder": { "model_type": "t5", "d_model": 768 }
    }"#;

    #[test]
    fn test_parse_musicgen_small() {
        let cfg: MusicgenConfig = serde_json::from_str(MUSICGEN_SMALL).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.decoder.num_codebooks, 4);
        assert_eq!(cfg.decoder.num_hidden_layers, 24);
        assert_eq!(cfg.audio_encoder.sampling_rate, 32_000);
        assert_eq!(cfg.head_dim(), 64);
    }

    #[test]
    fn test_missing_decoder_fields_use_defaults() {
        let cfg: MusicgenConfig =
            serde_json::from_str(r#"{ "decoder": {}, "audio_encoder": {} }"#).unwrap();
        assert_eq!(cfg.decoder.pad_token_id, 2048);
        assert_eq!(cfg.audio_encoder.sampling_rate, 32_000);
    }

    #[test]
    fn test_rejects_indivisible_heads() {
        let cfg: MusicgenConfig = serde_json::from_str(
            r#"{ "decoder": { "hidden_size": 1000, "num_attention_heads": 16 }, "audio_encoder": {} }"#,
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_generation_config_file_fields() {
        let g: GenerationConfig = serde_json::from_str(
            r#"{ "do_sample": true, "guidance_scale": 3.0, "max_length": 1500, "top_k": 250,
                 "decoder_start_token_id": 2048 }"#,
        )
        .unwrap();
        assert!(g.uses_guidance());
        assert_eq!(g.top_k, 250);
        assert_eq!(g.decoder_start_token_id, Some(2048));
        // max_length in the file is the HF total-length cap, not ours.
        assert_eq!(g.max_new_tokens, DEFAULT_MAX_NEW_TOKENS);
        assert_eq!(g.seed, None);
    }

    #[test]
    fn test_guidance_disabled_at_one() {
        let g = GenerationConfig { guidance_scale: 1.0, ..GenerationConfig::default() };
        assert!(!g.uses_guidance());
    }
}
