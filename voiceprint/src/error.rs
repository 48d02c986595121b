use thiserror::Error;

/// Errors returned by voiceprint operations.
#[derive(Debug, Error)]
pub enum VoiceprintError {
    #[error("voiceprint: audio too short: need at least {min_samples} samples, got {got_samples}")]
    InsufficientAudio {
        min_samples: usize,
        got_samples: usize,
    },

    #[error("voiceprint: audio too long: {got_seconds:.1}s exceeds the {max_seconds:.0}s limit")]
    AudioTooLong { got_seconds: f64, max_seconds: f64 },

    #[error("voiceprint: embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("voiceprint: enrollment set is empty")]
    EmptyEnrollment,

    #[error("voiceprint: audio error: {0}")]
    Audio(#[from] ownvoice_audio::AudioError),
}

/// Errors from the threshold store and its backends.
#[derive(Debug, Error)]
pub enum ThresholdError {
    #[error("threshold: backend error: {0}")]
    Backend(String),

    #[error("threshold: serialization error: {0}")]
    Serialization(String),

    #[error(
        "threshold: invalid config: owner threshold {owner} must be >= uncertain threshold {uncertain}"
    )]
    ThresholdOrder { owner: f64, uncertain: f64 },

    #[error("threshold: invalid config: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for ThresholdError {
    fn from(e: serde_json::Error) -> Self {
        ThresholdError::Serialization(e.to_string())
    }
}
