//! Turns a batch of text prompts into padded T5 input ids.
//!
//! Wraps the `tokenizer.json` shipped with the model.  All prompts of a
//! request are encoded together and right-padded to the longest one, so the
//! text encoder sees a rectangular `[batch, seq_len]` tensor; the attention
//! mask is `1` for real tokens and `0` for padding.

use std::path::Path;

use anyhow::{anyhow, bail, Result};
use tokenizers::{PaddingDirection, PaddingParams, PaddingStrategy, Tokenizer};

/// Pad token used by the T5 vocabulary when the tokenizer does not name one.
const DEFAULT_PAD_TOKEN: &str = "<pad>";

/// A rectangular, padded batch of prompt token ids.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPrompts {
    pub batch_size: usize,
    pub seq_len: usize,
    /// Row-major `[batch_size, seq_len]`.
    pub input_ids: Vec<i64>,
    /// Row-major `[batch_size, seq_len]`.
    pub attention_mask: Vec<i64>,
}

pub struct PromptProcessor {
    tokenizer: Tokenizer,
}

impl PromptProcessor {
    /// Load `tokenizer.json` and configure batch-longest padding.
    pub fn from_file(path: &Path) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| anyhow!("Cannot load tokenizer {}: {e}", path.display()))?;
        Ok(Self::new(tokenizer))
    }

    pub fn new(mut tokenizer: Tokenizer) -> Self {
        let pad_id = tokenizer.token_to_id(DEFAULT_PAD_TOKEN).unwrap_or(0);
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            direction: PaddingDirection::Right,
            pad_id,
            pad_token: DEFAULT_PAD_TOKEN.to_string(),
            ..Default::default()
        }));
        Self { tokenizer }
    }

    /// Encode every prompt as one padded batch.
    ///
    /// An empty batch is an error: the text encoder cannot run on zero rows.
    pub fn encode_batch(&self, prompts: &[String]) -> Result<EncodedPrompts> {
        if prompts.is_empty() {
            bail!("no prompts to encode");
        }

        let inputs: Vec<&str> = prompts.iter().map(String::as_str).collect();
        let encodings = self
            .tokenizer
            .encode_batch(inputs, true)
            .map_err(|e| anyhow!("tokenization failed: {e}"))?;

        let seq_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);
        if seq_len == 0 {
            bail!("prompts produced no tokens");
        }

        let mut input_ids = Vec::with_capacity(prompts.len() * seq_len);
        let mut attention_mask = Vec::with_capacity(prompts.len() * seq_len);
        for encoding in &encodings {
            // BatchLongest already pads every row to `seq_len`.
            if encoding.get_ids().len() != seq_len {
                bail!(
                    "tokenizer returned ragged batch ({} vs {} tokens)",
                    encoding.get_ids().len(),
                    seq_len
                );
            }
            input_ids.extend(encoding.get_ids().iter().map(|&id| id as i64));
            attention_mask.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
        }

        Ok(EncodedPrompts { batch_size: prompts.len(), seq_len, input_ids, attention_mask })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
