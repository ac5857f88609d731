//! # musicgen-server
//!
//! Text-to-music over HTTP, running the ONNX export of
//! [MusicGen](https://huggingface.co/facebook/musicgen-small) with ONNX Runtime.
//!
//! ## Quick start
//!
//! ```no_run
//! use musicgen_server::{download, MusicGenerator};
//!
//! // Download the model from HuggingFace (cached after first run)
//! let model = download::load_from_hub("Xenova/musicgen-small").unwrap();
//!
//! // One clip per prompt (Vec<f32>, 32 kHz mono)
//! let audio = model.generate(&["80s pop track with bassy drums".to_string()]).unwrap();
//!
//! // Or write the first clip to a WAV file
//! musicgen_server::wav::write_wav(
//!     audio.first_clip().unwrap(),
//!     audio.sample_rate,
//!     std::path::Path::new("generated_music.wav"),
//! ).unwrap();
//! ```
//!
//! ## Server
//!
//! With the default `server` feature the `musicgen-server` binary serves
//! `POST /generate-music/` on `0.0.0.0:8000`.  It takes `{"prompts": [...]}`
//! and answers with the clip of the first prompt as an `audio/wav`
//! attachment named `generated_music.wav`.
//!
//! ## Pipeline
//! 1. **Tokenisation**: T5 tokenizer, batch padded to the longest prompt.
//! 2. **Text encoding**: `text_encoder.onnx` → hidden states, padded
//!    positions zeroed.  An unconditional copy is appended when
//!    classifier-free guidance is on.
//! 3. **Token decoding**: `decoder_model_merged.onnx`, one step per frame with
//!    a KV cache, under the codebook delay pattern.  Guided logits are
//!    sampled with top-k.
//! 4. **Audio decoding**: `encodec_decode.onnx` turns codebook frames into
//!    32 kHz mono samples.

pub mod config;
pub mod delay;
pub mod download;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod processor;
pub mod sampling;
pub mod wav;

#[cfg(feature = "server")]
pub mod server;

pub use error::GenerationError;
pub use model::{ModelFiles, MusicgenOnnx};
pub use pipeline::{GeneratedAudio, MusicGenerator};
