//! Speaker verification core.
//!
//! The pipeline: [`FeatureExtractor`] turns mono PCM into a fixed
//! 120-dimension MFCC summary embedding; [`EnrollmentSet`] holds the
//! embeddings captured at registration; [`decide`] and [`Verifier`]
//! compare a probe against every enrollment member and collapse the
//! result to an owner/other answer under environment-specific
//! thresholds; [`SessionVerifier`] runs that per chunk over a long
//! recording. Thresholds live in a [`ThresholdStore`] and are
//! recalibratable from the recorded similarity observations.
//!
//! Everything here is synchronous and CPU-bound; no model files and no
//! network.

mod embedding;
mod error;
mod mfcc;
mod session;
mod store;
mod threshold;
mod verify;

pub use embedding::{
    cosine_similarity, l2_normalize, Embedding, EnrollmentSample, EnrollmentSet, EMBEDDING_DIM,
};
pub use error::{ThresholdError, VoiceprintError};
pub use mfcc::{FeatureExtractor, MfccConfig};
pub use session::{ChunkVerification, SessionVerifier};
pub use store::{MemoryBackend, RedbBackend, ThresholdBackend, GLOBAL_SCOPE};
pub use threshold::{
    SimilarityDistribution, SimilarityObservation, ThresholdConfig, ThresholdStore,
    DEFAULT_OWNER_THRESHOLD, DEFAULT_UNCERTAIN_THRESHOLD, OBSERVATION_WINDOW,
};
pub use verify::{
    decide, Decision, InternalState, ThresholdsUsed, VerificationDecision, Verifier,
};
