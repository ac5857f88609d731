//! WAV writer for generated clips.

use std::path::Path;

use anyhow::{Context, Result};

/// Header of every file we emit: mono 16-bit PCM at `sample_rate`.
///
/// 16-bit PCM over 32-bit float because several common players accept an
/// IEEE-float header and then play silence.
pub fn wav_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Convert f32 [-1.0, 1.0] → i16 [-32768, 32767], clamping out-of-range input.
pub fn to_pcm16(sample: f32) -> i16 {
    (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Write `audio` to `output_path`, creating or truncating the file.
pub fn write_wav(audio: &[f32], sample_rate: u32, output_path: &Path) -> Result<()> {
    let mut writer = hound::WavWriter::create(output_path, wav_spec(sample_rate))
        .with_context(|| format!("Cannot create WAV: {}", output_path.display()))?;
    for &s in audio {
        writer.write_sample(to_pcm16(s)).context("WAV write error")?;
    }
    writer.finalize().context("WAV finalise error")?;
    tracing::debug!(
        "Wrote {} samples ({:.2} s) to {}",
        audio.len(),
        audio.len() as f32 / sample_rate as f32,
        output_path.display()
    );
    Ok(())
}
