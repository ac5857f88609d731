//! ONNX model runner for MusicGen.
//!
//! Uses [`ort`] (ONNX Runtime Rust bindings) for inference.  A MusicGen export
//! is three graphs:
//!
//! | Graph                        | Inputs                                              | Output                          |
//! |------------------------------|-----------------------------------------------------|---------------------------------|
//! | `text_encoder.onnx`          | `input_ids [B, S]`, `attention_mask [B, S]`         | `last_hidden_state [B, S, D]`   |
//! | `decoder_model_merged.onnx`  | `input_ids [B·K, 1]`, encoder states/mask, KV cache | `logits [B·K, 1, V]`, `present.*` |
//! | `encodec_decode.onnx`        | `audio_codes [1, B, K, frames]`                     | `audio_values [B, 1, samples]`  |
//!
//! With classifier-free guidance the decoder runs on `2B` rows: the second
//! half sees zeroed text conditioning, and the two halves are blended before
//! sampling.

use std::{
    path::{Path, PathBuf},
    sync::Mutex,
    time::Instant,
};

use anyhow::{anyhow, bail, Context, Result};
use ort::{
    session::{Session, SessionInputValue},
    value::{DynValue, Tensor},
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    config::{GenerationConfig, MusicgenConfig},
    delay::DelayPattern,
    error::GenerationError,
    pipeline::{GeneratedAudio, MusicGenerator},
    processor::{EncodedPrompts, PromptProcessor},
    sampling::{apply_guidance, argmax, sample_top_k},
};

// ─────────────────────────────────────────────────────────────────────────────
// Model files
// ─────────────────────────────────────────────────────────────────────────────

/// Locations of every file a MusicGen ONNX export needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFiles {
    pub config: PathBuf,
    /// Optional: sampling defaults are used when absent.
    pub generation_config: Option<PathBuf>,
    pub tokenizer: PathBuf,
    pub text_encoder: PathBuf,
    pub decoder: PathBuf,
    pub audio_decoder: PathBuf,
}

impl ModelFiles {
    pub const CONFIG: &'static str = "config.json";
    pub const GENERATION_CONFIG: &'static str = "generation_config.json";
    pub const TOKENIZER: &'static str = "tokenizer.json";
    pub const TEXT_ENCODER: &'static str = "onnx/text_encoder.onnx";
    pub const DECODER: &'static str = "onnx/decoder_model_merged.onnx";
    pub const AUDIO_DECODER: &'static str = "onnx/encodec_decode.onnx";

    /// The repository layout rooted at `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        let generation_config = dir.join(Self::GENERATION_CONFIG);
        Self {
            config: dir.join(Self::CONFIG),
            generation_config: generation_config.exists().then_some(generation_config),
            tokenizer: dir.join(Self::TOKENIZER),
            text_encoder: dir.join(Self::TEXT_ENCODER),
            decoder: dir.join(Self::DECODER),
            audio_decoder: dir.join(Self::AUDIO_DECODER),
        }
    }

    fn ensure_present(&self) -> Result<()> {
        for path in [
            &self.config,
            &self.tokenizer,
            &self.text_encoder,
            &self.decoder,
            &self.audio_decoder,
        ] {
            if !path.is_file() {
                bail!("Missing model file: {}", path.display());
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// KV cache
// ─────────────────────────────────────────────────────────────────────────────

/// `(past input name, present output name, is cross-attention)` for every
/// cache tensor of a `layers`-deep decoder, in graph input order.
fn cache_layout(layers: usize) -> Vec<(String, String, bool)> {
    let mut layout = Vec::with_capacity(layers * 4);
    for layer in 0..layers {
        for part in ["decoder", "encoder"] {
            for kind in ["key", "value"] {
                layout.push((
                    format!("past_key_values.{layer}.{part}.{kind}"),
                    format!("present.{layer}.{part}.{kind}"),
                    part == "encoder",
                ));
            }
        }
    }
    layout
}

struct CacheEntry {
    past: String,
    present: String,
    cross_attention: bool,
    value: DynValue,
}

/// Past key/values fed back into the merged decoder.
///
/// Self-attention entries grow by one position per step.  Cross-attention
/// entries are computed on the first step only; on the cached branch the
/// merged graph does not recompute them, so the first-step values are kept.
struct KvCache {
    entries: Vec<CacheEntry>,
}

/// Whether a cache entry takes the decoder's `present.*` output after `step`.
fn refreshes_at(cross_attention: bool, step: usize) -> bool {
    !cross_attention || step == 0
}

impl KvCache {
    /// Zero-length cache for the first (uncached) decoder step.
    fn empty(config: &MusicgenConfig, batch: usize) -> Result<Self> {
        let heads = config.decoder.num_attention_heads;
        let head_dim = config.head_dim();
        let entries = cache_layout(config.decoder.num_hidden_layers)
            .into_iter()
            .map(|(past, present, cross_attention)| {
                let shape = [batch, heads, 0usize, head_dim];
                let value = Tensor::<f32>::from_array((shape, Vec::new()))
                    .context("Failed to build empty past_key_values tensor")?
                    .into_dyn();
                Ok(CacheEntry { past, present, cross_attention, value })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tensor helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Text-encoder output, already expanded for guidance when enabled.
struct EncoderOutput {
    batch: usize,
    seq_len: usize,
    hidden_size: usize,
    hidden_states: Vec<f32>,
    attention_mask: Vec<i64>,
}

/// Split decoder logits `[rows, seq, vocab]` into the last position of each row.
fn last_position_logits(
    dims: &[i64],
    data: &[f32],
    rows: usize,
    vocab: usize,
) -> Result<Vec<Vec<f32>>> {
    if dims.len() != 3 || dims[0] as usize != rows || dims[2] as usize != vocab {
        bail!("Unexpected logits shape {:?}, expected [{}, seq, {}]", dims, rows, vocab);
    }
    let seq = dims[1] as usize;
    if seq == 0 || data.len() != rows * seq * vocab {
        bail!("Logits tensor holds {} values for shape {:?}", data.len(), dims);
    }
    Ok((0..rows)
        .map(|r| {
            let start = (r * seq + seq - 1) * vocab;
            data[start..start + vocab].to_vec()
        })
        .collect())
}

/// Split `audio_values [batch, channels, samples]` into the first channel of
/// every batch element.
fn split_clips(dims: &[i64], data: &[f32], batch: usize) -> Result<Vec<Vec<f32>>> {
    if dims.len() != 3 || dims[0] as usize != batch || dims[1] < 1 {
        bail!("Unexpected audio_values shape {:?} for batch {}", dims, batch);
    }
    let channels = dims[1] as usize;
    let samples = dims[2] as usize;
    if data.len() != batch * channels * samples {
        bail!("audio_values holds {} values for shape {:?}", data.len(), dims);
    }
    Ok((0..batch)
        .map(|b| {
            let start = b * channels * samples;
            data[start..start + samples].to_vec()
        })
        .collect())
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding steps
// ─────────────────────────────────────────────────────────────────────────────

/// Zero the hidden state of every token whose attention mask is 0.
fn mask_padding(hidden_states: &mut [f32], attention_mask: &[i64], hidden_size: usize) {
    for (token, &mask) in hidden_states.chunks_mut(hidden_size).zip(attention_mask) {
        if mask == 0 {
            token.fill(0.0);
        }
    }
}

/// Append the unconditional half: zero hidden states under a zero mask.
fn expand_for_guidance(hidden_states: &mut Vec<f32>, attention_mask: &mut Vec<i64>) {
    hidden_states.resize(hidden_states.len() * 2, 0.0);
    attention_mask.resize(attention_mask.len() * 2, 0);
}

/// Last token of every sequence; the unconditional half mirrors it.
fn step_input_ids(sequences: &[Vec<i64>], guidance: bool) -> Vec<i64> {
    let mut ids: Vec<i64> = sequences.iter().filter_map(|s| s.last().copied()).collect();
    if guidance {
        ids.extend_from_within(..);
    }
    ids
}

/// Token appended to each of the `rows` conditional sequences at `position`.
///
/// With a guidance scale, `logits` holds `2 * rows` rows and row `r + rows`
/// is the unconditional twin of row `r`.  Slots the delay pattern forces are
/// filled without calling `pick`.
fn next_tokens(
    logits: &[Vec<f32>],
    rows: usize,
    pattern: &DelayPattern,
    position: usize,
    guidance_scale: Option<f32>,
    mut pick: impl FnMut(&[f32]) -> usize,
) -> Result<Vec<i64>> {
    let expected = if guidance_scale.is_some() { rows * 2 } else { rows };
    if logits.len() != expected {
        bail!("Got {} logit rows, expected {}", logits.len(), expected);
    }
    let num_codebooks = pattern.num_codebooks();
    Ok((0..rows)
        .map(|row| {
            if let Some(forced) = pattern.forced_token(row % num_codebooks, position) {
                return forced;
            }
            match guidance_scale {
                Some(scale) => {
                    let mut guided = logits[row].clone();
                    apply_guidance(&mut guided, &logits[row + rows], scale);
                    pick(&guided) as i64
                }
                None => pick(&logits[row]) as i64,
            }
        })
        .collect())
}

fn load_session(path: &Path) -> Result<Session> {
    Session::builder()
        .context("Failed to create ORT session builder")?
        .commit_from_file(path)
        .with_context(|| format!("Cannot load ONNX model: {}", path.display()))
}

fn lock<'a>(session: &'a Mutex<Session>, name: &str) -> Result<std::sync::MutexGuard<'a, Session>> {
    session.lock().map_err(|_| anyhow!("{name} session mutex poisoned"))
}

// ─────────────────────────────────────────────────────────────────────────────
// MusicgenOnnx
// ─────────────────────────────────────────────────────────────────────────────

/// The loaded model: prompt processor plus the three ONNX sessions.
///
/// Sessions need exclusive access while running, so each sits behind a
/// `Mutex`; concurrent callers are served one at a time.
pub struct MusicgenOnnx {
    processor: PromptProcessor,
    text_encoder: Mutex<Session>,
    decoder: Mutex<Session>,
    audio_decoder: Mutex<Session>,
    config: MusicgenConfig,
    generation: GenerationConfig,
    pattern: DelayPattern,
}

impl MusicgenOnnx {
    /// Load every file of a MusicGen export.
    pub fn load(files: &ModelFiles) -> Result<Self> {
        files.ensure_present()?;

        let config = MusicgenConfig::from_file(&files.config)?;
        let generation = match &files.generation_config {
            Some(path) => GenerationConfig::from_file(path)?,
            None => GenerationConfig::default(),
        };
        let processor = PromptProcessor::from_file(&files.tokenizer)?;

        tracing::info!("Loading text encoder ({})", files.text_encoder.display());
        let text_encoder = load_session(&files.text_encoder)?;
        tracing::info!("Loading decoder ({})", files.decoder.display());
        let decoder = load_session(&files.decoder)?;
        tracing::info!("Loading audio decoder ({})", files.audio_decoder.display());
        let audio_decoder = load_session(&files.audio_decoder)?;

        let pattern = DelayPattern::new(
            config.decoder.num_codebooks,
            generation.max_new_tokens,
            config.decoder.pad_token_id,
        )?;

        Ok(Self {
            processor,
            text_encoder: Mutex::new(text_encoder),
            decoder: Mutex::new(decoder),
            audio_decoder: Mutex::new(audio_decoder),
            config,
            generation,
            pattern,
        })
    }

    /// Load a model laid out like the HuggingFace repository under `dir`.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load(&ModelFiles::in_dir(dir))
    }

    /// Cap the number of generated audio tokens per request.
    pub fn with_max_new_tokens(mut self, max_new_tokens: usize) -> Result<Self> {
        self.pattern = DelayPattern::new(
            self.config.decoder.num_codebooks,
            max_new_tokens,
            self.config.decoder.pad_token_id,
        )?;
        self.generation.max_new_tokens = max_new_tokens;
        Ok(self)
    }

    /// Fix the sampling seed so identical prompts give identical audio.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.generation.seed = seed;
        self
    }

    pub fn generation_config(&self) -> &GenerationConfig {
        &self.generation
    }

    // ── Stage 1: text encoder ────────────────────────────────────────────────

    fn encode_text(&self, prompts: &EncodedPrompts) -> Result<EncoderOutput> {
        let shape = [prompts.batch_size, prompts.seq_len];
        let t_input_ids = Tensor::<i64>::from_array((shape, prompts.input_ids.clone()))
            .context("Failed to build input_ids tensor")?;
        let t_attention_mask = Tensor::<i64>::from_array((shape, prompts.attention_mask.clone()))
            .context("Failed to build attention_mask tensor")?;

        let mut session = lock(&self.text_encoder, "text encoder")?;
        let outputs = session
            .run(ort::inputs![
                "input_ids" => t_input_ids,
                "attention_mask" => t_attention_mask
            ])
            .context("Text encoder inference failed")?;

        let (dims, data) = outputs["last_hidden_state"]
            .try_extract_tensor::<f32>()
            .context("Failed to extract last_hidden_state")?;
        if dims.len() != 3 || data.len() != prompts.input_ids.len() * dims[2] as usize {
            bail!("Unexpected last_hidden_state shape {:?}", &dims[..]);
        }
        let hidden_size = dims[2] as usize;

        // Padding positions must not condition the decoder.
        let mut hidden_states = data.to_vec();
        mask_padding(&mut hidden_states, &prompts.attention_mask, hidden_size);

        let mut attention_mask = prompts.attention_mask.clone();
        let mut batch = prompts.batch_size;
        if self.generation.uses_guidance() {
            expand_for_guidance(&mut hidden_states, &mut attention_mask);
            batch *= 2;
        }

        Ok(EncoderOutput {
            batch,
            seq_len: prompts.seq_len,
            hidden_size,
            hidden_states,
            attention_mask,
        })
    }

    // ── Stage 2: autoregressive decoder ──────────────────────────────────────

    fn pick_token(&self, logits: &[f32], rng: &mut ChaCha8Rng) -> usize {
        if self.generation.do_sample {
            sample_top_k(logits, self.generation.top_k, self.generation.temperature, rng)
        } else {
            argmax(logits)
        }
    }

    /// Run the decoder for `max_new_tokens` steps.  Returns one finished
    /// sequence per conditional row (`batch * K`, batch-major).
    fn decode_tokens(&self, encoded: &EncoderOutput) -> Result<Vec<Vec<i64>>> {
        let guidance = self.generation.uses_guidance();
        let num_codebooks = self.pattern.num_codebooks();
        let vocab = self.config.decoder.vocab_size;
        let cond_batch = if guidance { encoded.batch / 2 } else { encoded.batch };
        let rows = cond_batch * num_codebooks;
        let start_token =
            self.generation.decoder_start_token_id.unwrap_or(self.config.decoder.bos_token_id);

        let mut sequences: Vec<Vec<i64>> = (0..rows)
            .map(|_| {
                let mut seq = Vec::with_capacity(self.pattern.max_length());
                seq.push(start_token);
                seq
            })
            .collect();

        let seed = self.generation.seed.unwrap_or_else(|| rand::rng().random());
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        tracing::debug!("Sampling seed {}", seed);

        let t_hidden = Tensor::<f32>::from_array((
            [encoded.batch, encoded.seq_len, encoded.hidden_size],
            encoded.hidden_states.clone(),
        ))
        .context("Failed to build encoder_hidden_states tensor")?;
        let t_mask = Tensor::<i64>::from_array((
            [encoded.batch, encoded.seq_len],
            encoded.attention_mask.clone(),
        ))
        .context("Failed to build encoder_attention_mask tensor")?;
        let mut cache = KvCache::empty(&self.config, encoded.batch)?;

        let mut session = lock(&self.decoder, "decoder")?;
        for step in 0..self.generation.max_new_tokens {
            let step_ids = step_input_ids(&sequences, guidance);
            let decoder_rows = step_ids.len();

            let t_input_ids = Tensor::<i64>::from_array(([decoder_rows, 1usize], step_ids))
                .context("Failed to build decoder input_ids tensor")?;
            let t_use_cache = Tensor::<bool>::from_array(([1usize], vec![step > 0]))
                .context("Failed to build use_cache_branch tensor")?;

            let mut inputs: Vec<(String, SessionInputValue<'_>)> =
                Vec::with_capacity(cache.entries.len() + 4);
            inputs.push(("input_ids".to_string(), t_input_ids.into()));
            inputs.push(("encoder_attention_mask".to_string(), t_mask.view().into()));
            inputs.push(("encoder_hidden_states".to_string(), t_hidden.view().into()));
            for entry in &cache.entries {
                inputs.push((entry.past.clone(), entry.value.view().into()));
            }
            inputs.push(("use_cache_branch".to_string(), t_use_cache.into()));

            let mut outputs = session
                .run(inputs)
                .with_context(|| format!("Decoder inference failed at step {step}"))?;

            let next_logits = {
                let (dims, data) = outputs["logits"]
                    .try_extract_tensor::<f32>()
                    .context("Failed to extract logits")?;
                last_position_logits(&dims[..], data, decoder_rows, vocab)?
            };

            let mut presents = Vec::with_capacity(cache.entries.len());
            for entry in &cache.entries {
                if !refreshes_at(entry.cross_attention, step) {
                    presents.push(None);
                    continue;
                }
                let value = outputs
                    .remove(entry.present.as_str())
                    .with_context(|| format!("Decoder output '{}' missing", entry.present))?;
                presents.push(Some(value));
            }
            drop(outputs);
            for (entry, present) in cache.entries.iter_mut().zip(presents) {
                if let Some(value) = present {
                    entry.value = value;
                }
            }

            let scale = guidance.then_some(self.generation.guidance_scale);
            let tokens = next_tokens(&next_logits, rows, &self.pattern, step + 1, scale, |logits| {
                self.pick_token(logits, &mut rng)
            })?;
            for (seq, token) in sequences.iter_mut().zip(tokens) {
                seq.push(token);
            }
        }

        Ok(sequences)
    }

    // ── Stage 3: EnCodec decoder ─────────────────────────────────────────────

    fn decode_audio(&self, codes: Vec<i64>, batch: usize) -> Result<Vec<Vec<f32>>> {
        let t_codes = Tensor::<i64>::from_array((
            [1usize, batch, self.pattern.num_codebooks(), self.pattern.frames()],
            codes,
        ))
        .context("Failed to build audio_codes tensor")?;

        let mut session = lock(&self.audio_decoder, "audio decoder")?;
        let outputs = session
            .run(ort::inputs!["audio_codes" => t_codes])
            .context("Audio decoder inference failed")?;

        let (dims, data) = outputs["audio_values"]
            .try_extract_tensor::<f32>()
            .context("Failed to extract audio_values")?;
        split_clips(&dims[..], data, batch)
    }

    // ── Prompts → audio ──────────────────────────────────────────────────────

    /// Generate one clip per prompt at the model's sample rate.
    pub fn generate_batch(&self, prompts: &[String]) -> crate::error::Result<GeneratedAudio> {
        let started = Instant::now();

        let encoded = self.processor.encode_batch(prompts).map_err(GenerationError::encoding)?;
        let text = self.encode_text(&encoded).map_err(GenerationError::inference)?;
        let sequences = self.decode_tokens(&text).map_err(GenerationError::inference)?;
        let codes = self.pattern.extract_codes(&sequences).map_err(GenerationError::inference)?;
        let clips = self
            .decode_audio(codes, encoded.batch_size)
            .map_err(GenerationError::inference)?;

        let audio = GeneratedAudio { clips, sample_rate: self.config.audio_encoder.sampling_rate };
        tracing::info!(
            "Generated {} clip(s), {:.2} s each, in {:.1} s",
            audio.clips.len(),
            audio.duration_secs(),
            started.elapsed().as_secs_f32()
        );
        Ok(audio)
    }
}

impl MusicGenerator for MusicgenOnnx {
    fn sample_rate(&self) -> u32 {
        self.config.audio_encoder.sampling_rate
    }

    fn generate(&self, prompts: &[String]) -> crate::error::Result<GeneratedAudio> {
        self.generate_batch(prompts)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
