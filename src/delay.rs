//! Codebook delay pattern.
//!
//! MusicGen predicts `K` EnCodec codebooks in parallel, with codebook `k`
//! lagging `k` steps behind codebook 0.  For a sequence of `max_length`
//! positions (position 0 holds the decoder start token) the pattern for
//! `K = 4`, `max_length = 8` looks like this (`P` = pad, `x` = sampled):
//!
//! ```text
//! k=0   P x x x x P P P
//! k=1   P P x x x x P P
//! k=2   P P P x x x x P
//! k=3   P P P P x x x x
//! ```
//!
//! Every codebook ends up with `max_length - K` sampled frames, which are
//! re-aligned into `[K, frames]` before EnCodec decoding.

use anyhow::{bail, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayPattern {
    num_codebooks: usize,
    max_length: usize,
    pad_token_id: i64,
}

impl DelayPattern {
    /// `max_new_tokens` is the number of decoding steps after the start token.
    pub fn new(num_codebooks: usize, max_new_tokens: usize, pad_token_id: i64) -> Result<Self> {
        if num_codebooks == 0 {
            bail!("delay pattern needs at least one codebook");
        }
        if max_new_tokens < num_codebooks {
            bail!(
                "max_new_tokens ({}) must be at least the number of codebooks ({})",
                max_new_tokens,
                num_codebooks
            );
        }
        Ok(Self { num_codebooks, max_length: max_new_tokens + 1, pad_token_id })
    }

    pub fn num_codebooks(&self) -> usize {
        self.num_codebooks
    }

    /// Total sequence length, start token included.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Sampled frames per codebook once the pattern is undone.
    pub fn frames(&self) -> usize {
        self.max_length - self.num_codebooks
    }

    /// The token the pattern forces at `position` of `codebook`, or `None`
    /// when that slot is free for sampling.
    pub fn forced_token(&self, codebook: usize, position: usize) -> Option<i64> {
        let tail = self.max_length - self.num_codebooks + 1 + codebook;
        if position <= codebook || position >= tail {
            Some(self.pad_token_id)
        } else {
            None
        }
    }

    /// Undo the delay for a batch of finished sequences.
    ///
    /// `rows` holds `batch * K` sequences of `max_length` tokens, ordered
    /// batch-major (`row = b * K + k`).  Returns `[batch, K, frames]`
    /// flattened row-major.
    pub fn extract_codes(&self, rows: &[Vec<i64>]) -> Result<Vec<i64>> {
        let k_total = self.num_codebooks;
        if rows.is_empty() || rows.len() % k_total != 0 {
            bail!("expected a multiple of {} sequences, got {}", k_total, rows.len());
        }
        let frames = self.frames();
        let mut codes = Vec::with_capacity(rows.len() * frames);
        for (row_idx, row) in rows.iter().enumerate() {
            if row.len() != self.max_length {
                bail!(
                    "sequence {} has {} tokens, expected {}",
                    row_idx,
                    row.len(),
                    self.max_length
                );
            }
            let k = row_idx % k_total;
            codes.extend_from_slice(&row[k + 1..k + 1 + frames]);
        }
        Ok(codes)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
