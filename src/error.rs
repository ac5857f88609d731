//! Error type returned at the generation boundary.
//!
//! Internals propagate `anyhow::Error` with context; each stage of a request
//! is then classified into one of these kinds so callers (the HTTP layer in
//! particular) can report what failed without parsing messages.

/// Result type alias using [`GenerationError`].
pub type Result<T> = std::result::Result<T, GenerationError>;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The prompt batch could not be turned into model inputs.
    #[error("prompt encoding failed: {0}")]
    Encoding(String),

    /// ONNX Runtime or tensor bookkeeping failed during generation.
    #[error("inference failed: {0}")]
    Inference(String),

    /// The generated samples could not be written out.
    #[error("audio output failed: {0}")]
    Audio(String),
}

impl GenerationError {
    /// Stable machine-readable name of the kind.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Encoding(_) => "encoding_error",
            GenerationError::Inference(_) => "inference_error",
            GenerationError::Audio(_) => "audio_error",
        }
    }

    pub(crate) fn encoding(err: anyhow::Error) -> Self {
        GenerationError::Encoding(format!("{err:#}"))
    }

    pub(crate) fn inference(err: anyhow::Error) -> Self {
        GenerationError::Inference(format!("{err:#}"))
    }

    pub(crate) fn audio(err: anyhow::Error) -> Self {
        GenerationError::Audio(format!("{err:#}"))
    }
}

impl From<std::io::Error> for GenerationError {
    fn from(error: std::io::Error) -> Self {
        GenerationError::Audio(error.to_string())
    }
}
