//! Audio handling for the voice verification pipeline.
//!
//! This crate provides the PCM-level building blocks consumed by the
//! `ownvoice-voiceprint` crate:
//!
//! - `pcm`: decoded PCM value type with downmix and duration helpers
//! - `resample`: deterministic whole-buffer resampling to 16kHz
//! - `chunk`: splitting long recordings into time-tagged sub-clips and
//!   reconstructing verified audio from them
//! - `quality`: rule-based quality gating for enrollment audio
//!
//! Decoding from container formats (WAV/M4A/...) is an external
//! responsibility; everything here operates on already-decoded samples.

pub mod chunk;
pub mod error;
pub mod pcm;
pub mod quality;
pub mod resample;

pub use chunk::{reconstruct, split, AudioChunk, ChunkDecision, ChunkOptions};
pub use error::AudioError;
pub use pcm::PcmAudio;
pub use quality::{QualityChecks, QualityMetrics, QualityReport, QualityStatus, RejectionReason};
pub use resample::resample;
