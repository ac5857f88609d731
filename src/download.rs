//! HuggingFace Hub model downloader.
//!
//! Fetches the config files, tokenizer and the three ONNX graphs of a MusicGen
//! export, then constructs and returns a [`MusicgenOnnx`].

use std::path::PathBuf;

use anyhow::{Context, Result};
use hf_hub::api::sync::{Api, ApiRepo};

use crate::model::{ModelFiles, MusicgenOnnx};

/// Repository served when no model is specified.
pub const DEFAULT_REPO: &str = "Xenova/musicgen-small";

/// Organisation prepended to bare model names.
const DEFAULT_ORG: &str = "Xenova";

/// Expand bare model names (e.g. "musicgen-small" → "Xenova/musicgen-small").
pub fn resolve_repo_id(repo_id: &str) -> String {
    if repo_id.contains('/') {
        repo_id.to_string()
    } else {
        format!("{}/{}", DEFAULT_ORG, repo_id)
    }
}

/// Download a single file from a HuggingFace repository.
fn hf_download(repo: &ApiRepo, repo_id: &str, filename: &str) -> Result<PathBuf> {
    tracing::info!("Fetching {} from {}", filename, repo_id);
    repo.get(filename)
        .with_context(|| format!("Failed to download '{}' from '{}'", filename, repo_id))
}

/// Download (or reuse from cache) every file of a MusicGen export.
///
/// Files are cached in the HuggingFace Hub cache directory
/// (`~/.cache/huggingface/hub` by default).
pub fn fetch_model_files(repo_id: &str) -> Result<ModelFiles> {
    let repo_id = resolve_repo_id(repo_id);
    let api = Api::new().context("Failed to initialise HuggingFace Hub client")?;
    let repo = api.model(repo_id.clone());

    Ok(ModelFiles {
        config: hf_download(&repo, &repo_id, ModelFiles::CONFIG)?,
        generation_config: Some(hf_download(&repo, &repo_id, ModelFiles::GENERATION_CONFIG)?),
        tokenizer: hf_download(&repo, &repo_id, ModelFiles::TOKENIZER)?,
        text_encoder: hf_download(&repo, &repo_id, ModelFiles::TEXT_ENCODER)?,
        decoder: hf_download(&repo, &repo_id, ModelFiles::DECODER)?,
        audio_decoder: hf_download(&repo, &repo_id, ModelFiles::AUDIO_DECODER)?,
    })
}

/// Download and initialise a [`MusicgenOnnx`] model from HuggingFace.
///
/// # Example
/// ```no_run
/// use musicgen_server::MusicGenerator;
///
/// let model = musicgen_server::download::load_from_hub("Xenova/musicgen-small").unwrap();
/// let audio = model.generate(&["lo-fi beat with warm piano".to_string()]).unwrap();
/// assert_eq!(audio.sample_rate, model.sample_rate());
/// ```
pub fn load_from_hub(repo_id: &str) -> Result<MusicgenOnnx> {
    let files = fetch_model_files(repo_id)?;
    tracing::info!("Loading model…");
    MusicgenOnnx::load(&files)
}

/// Convenience alias using [`DEFAULT_REPO`].
pub fn load_default() -> Result<MusicgenOnnx> {
    load_from_hub(DEFAULT_REPO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_name_gets_default_org() {
        assert_eq!(resolve_repo_id("musicgen-small"), "Xenova/musicgen-small");
    }

    #[test]
    fn test_full_repo_id_is_kept() {
        assert_eq!(resolve_repo_id("someone/musicgen-medium"), "someone/musicgen-medium");
    }
}
