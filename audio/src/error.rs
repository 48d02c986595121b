use thiserror::Error;

/// Errors returned by audio operations.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio: empty input, no samples to process")]
    Empty,

    #[error("audio: invalid format: {0}")]
    InvalidFormat(String),

    #[error("audio: resample error: {0}")]
    Resample(String),

    #[error("audio: chunk/decision count mismatch: {chunks} chunks, {decisions} decisions")]
    DecisionCountMismatch { chunks: usize, decisions: usize },
}

impl From<rubato::ResamplerConstructionError> for AudioError {
    fn from(e: rubato::ResamplerConstructionError) -> Self {
        AudioError::Resample(e.to_string())
    }
}

impl From<rubato::ResampleError> for AudioError {
    fn from(e: rubato::ResampleError) -> Self {
        AudioError::Resample(e.to_string())
    }
}
