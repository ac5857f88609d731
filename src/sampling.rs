//! Next-token selection: classifier-free guidance, temperature, top-k and a
//! multinomial draw.

use rand::Rng;

/// Blend conditional and unconditional logits in place:
/// `cond = uncond + (cond - uncond) * scale`.
pub fn apply_guidance(cond: &mut [f32], uncond: &[f32], scale: f32) {
    for (c, &u) in cond.iter_mut().zip(uncond) {
        *c = u + (*c - u) * scale;
    }
}

/// Index of the largest logit.  NaNs never win.
pub fn argmax(logits: &[f32]) -> usize {
    let mut best = 0;
    let mut best_val = f32::NEG_INFINITY;
    for (i, &v) in logits.iter().enumerate() {
        if v > best_val {
            best = i;
            best_val = v;
        }
    }
    best
}

/// Sample one index from `logits` restricted to the `top_k` highest entries.
///
/// `top_k == 0` disables the restriction.  Non-positive temperatures fall
/// back to greedy decoding.
pub fn sample_top_k<R: Rng + ?Sized>(
    logits: &[f32],
    top_k: usize,
    temperature: f32,
    rng: &mut R,
) -> usize {
    if logits.is_empty() {
        return 0;
    }
    if temperature <= 0.0 {
        return argmax(logits);
    }

    let mut candidates: Vec<(usize, f32)> =
        logits.iter().copied().enumerate().filter(|(_, v)| !v.is_nan()).collect();
    if candidates.is_empty() {
        return 0;
    }
    candidates.sort_unstable_by(|a, b| b.1.total_cmp(&a.1));
    if top_k > 0 && top_k < candidates.len() {
        candidates.truncate(top_k);
    }

    // Softmax over the survivors, shifted by the max for stability.
    let max = candidates[0].1 / temperature;
    let weights: Vec<f64> = candidates
        .iter()
        .map(|&(_, v)| ((v / temperature - max) as f64).exp())
        .collect();
    let total: f64 = weights.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return candidates[0].0;
    }

    // Weighted random selection via CDF walk
    let sample: f64 = rng.random::<f64>() * total;
    let mut cumulative = 0.0f64;
    for (&(idx, _), w) in candidates.iter().zip(&weights) {
        cumulative += w;
        if sample < cumulative {
            return idx;
        }
    }
    // Floating-point rounding: fall back to the last candidate.
    candidates[candidates.len() - 1].0
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
