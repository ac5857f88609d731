//! Per-request WAV file that lives exactly as long as the response body.
//!
//! The clip is written to a named temporary file, then streamed back in
//! chunks from a blocking task.  That task owns the file and unlinks it when
//! the last chunk has been handed over or the client disconnects, whichever
//! comes first.

use std::{
    io::{self, Read},
    path::Path,
};

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{error::GenerationError, wav::write_wav};

macro_rules! download_name {
    () => {
        "generated_music.wav"
    };
}

/// Suggested download name.
pub const FILENAME: &str = download_name!();

pub const MEDIA_TYPE: &str = "audio/wav";

const CONTENT_DISPOSITION: &str = concat!("attachment; filename=\"", download_name!(), "\"");

const CHUNK_SIZE: usize = 64 * 1024;

pub struct AudioArtifact {
    file: NamedTempFile,
    len: u64,
}

impl AudioArtifact {
    /// Write `samples` as a mono WAV into a fresh temporary file.
    pub fn write(samples: &[f32], sample_rate: u32) -> crate::error::Result<Self> {
        let file = tempfile::Builder::new().prefix("musicgen-").suffix(".wav").tempfile()?;
        write_wav(samples, sample_rate, file.path()).map_err(GenerationError::audio)?;
        let len = file.as_file().metadata()?.len();
        Ok(Self { file, len })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Size of the WAV file in bytes.
    pub fn content_length(&self) -> u64 {
        self.len
    }

    /// Stream the file as a response body.  Must be called inside a tokio
    /// runtime.
    pub fn into_body(self) -> Body {
        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(4);
        tokio::task::spawn_blocking(move || {
            self.pump(&tx);
            let path = self.path().to_path_buf();
            // Unlink before `tx` drops, so the body only ends once the file is gone.
            drop(self);
            tracing::debug!("Removed {}", path.display());
        });
        Body::from_stream(ReceiverStream::new(rx))
    }

    fn pump(&self, tx: &mpsc::Sender<io::Result<Bytes>>) {
        let mut file = match self.file.reopen() {
            Ok(file) => file,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        };
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                        tracing::debug!("Client went away before {} was fully sent", FILENAME);
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    break;
                }
            }
        }
    }
}

impl IntoResponse for AudioArtifact {
    fn into_response(self) -> Response {
        let headers = [
            (header::CONTENT_TYPE, HeaderValue::from_static(MEDIA_TYPE)),
            (header::CONTENT_DISPOSITION, HeaderValue::from_static(CONTENT_DISPOSITION)),
            (header::CONTENT_LENGTH, HeaderValue::from(self.len)),
        ];
        (headers, self.into_body()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_creates_wav_file() {
        let artifact = AudioArtifact::write(&[0.0, 0.5, -0.5], 32_000).unwrap();
        assert!(artifact.path().exists());
        assert_eq!(artifact.path().extension().unwrap(), "wav");
        // 44-byte header + 3 × 16-bit samples
        assert_eq!(artifact.content_length(), 44 + 6);
        let reader = hound::WavReader::open(artifact.path()).unwrap();
        assert_eq!(reader.spec().sample_rate, 32_000);
    }

    #[test]
    fn test_disposition_names_download() {
        assert_eq!(CONTENT_DISPOSITION, format!("attachment; filename=\"{FILENAME}\""));
    }

    #[test]
    fn test_each_artifact_gets_its_own_file() {
        let a = AudioArtifact::write(&[0.1], 32_000).unwrap();
        let b = AudioArtifact::write(&[0.1], 32_000).unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_dropping_artifact_removes_file() {
        let artifact = AudioArtifact::write(&[0.25; 16], 32_000).unwrap();
        let path = artifact.path().to_path_buf();
        drop(artifact);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_body_streams_file_then_removes_it() {
        let samples: Vec<f32> = (0..100_000).map(|i| (i as f32 * 0.001).sin()).collect();
        let artifact = AudioArtifact::write(&samples, 32_000).unwrap();
        let path = artifact.path().to_path_buf();
        let expected = std::fs::read(&path).unwrap();
        assert!(expected.len() > CHUNK_SIZE, "test needs more than one chunk");

        let bytes = axum::body::to_bytes(artifact.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.as_ref(), expected.as_slice());
        assert!(!path.exists(), "temporary file should be gone after the body ends");
    }

    #[tokio::test]
    async fn test_abandoned_body_removes_file() {
        let artifact = AudioArtifact::write(&vec![0.5; 200_000], 32_000).unwrap();
        let path = artifact.path().to_path_buf();
        drop(artifact.into_body());

        for _ in 0..200 {
            if !path.exists() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("temporary file was not removed after the client went away");
    }
}
