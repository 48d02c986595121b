//! The verification decision engine.
//!
//! Compares a probe embedding against every enrollment member and turns
//! the similarity scores into a decision. Internally the outcome is
//! three-way (owner / uncertain / other); callers get the binary
//! collapse, with the uncertain band folded into "other" so a borderline
//! match never unlocks anything. The full internal state is kept on the
//! result for calibration and audit.

use ownvoice_audio::ChunkDecision;
use serde::{Deserialize, Serialize};

use crate::embedding::{cosine_similarity, Embedding, EnrollmentSet};
use crate::error::VoiceprintError;
use crate::threshold::{ThresholdConfig, ThresholdStore};

/// How many of the top similarity scores feed the secondary statistic.
const TOP_K: usize = 2;

/// Fine-grained verification outcome, before collapsing to the binary
/// answer exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InternalState {
    #[serde(rename = "OWNER")]
    Owner,
    #[serde(rename = "UNCERTAIN")]
    Uncertain,
    #[serde(rename = "OTHER")]
    Other,
    /// The chunk could not be scored at all (extraction failed).
    #[serde(rename = "SKIPPED")]
    Skipped,
}

impl From<InternalState> for ChunkDecision {
    fn from(state: InternalState) -> Self {
        match state {
            InternalState::Owner => ChunkDecision::Owner,
            InternalState::Uncertain => ChunkDecision::Uncertain,
            InternalState::Other => ChunkDecision::Other,
            InternalState::Skipped => ChunkDecision::Skipped,
        }
    }
}

/// The binary answer exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "OWNER")]
    Owner,
    #[serde(rename = "OTHER")]
    Other,
}

/// The thresholds that were in force when a decision was made.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdsUsed {
    #[serde(rename = "ownerThreshold")]
    pub owner_threshold: f64,
    #[serde(rename = "uncertainThreshold")]
    pub uncertain_threshold: f64,
}

/// A single verification outcome with its full score breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationDecision {
    #[serde(rename = "decision")]
    pub decision: Decision,

    #[serde(rename = "internalState")]
    pub internal_state: InternalState,

    /// The score the decision was made on: the best match across the
    /// enrollment members.
    #[serde(rename = "maxSimilarity")]
    pub max_similarity: f64,

    /// Mean of the top scores, reported for diagnostics only.
    #[serde(rename = "topKMean")]
    pub top_k_mean: f64,

    /// Per-member similarities in enrollment order.
    #[serde(rename = "allSimilarities")]
    pub all_similarities: Vec<f64>,

    #[serde(rename = "thresholdsUsed")]
    pub thresholds_used: ThresholdsUsed,
}

impl VerificationDecision {
    /// The degraded result for a chunk that could not be scored. The
    /// binary answer fails open to owner so a broken extractor cannot
    /// lock the owner out; the chunk's audio is still excluded from
    /// reconstruction.
    pub fn skipped(config: &ThresholdConfig) -> Self {
        Self {
            decision: Decision::Owner,
            internal_state: InternalState::Skipped,
            max_similarity: 0.0,
            top_k_mean: 0.0,
            all_similarities: Vec::new(),
            thresholds_used: ThresholdsUsed {
                owner_threshold: config.owner_threshold,
                uncertain_threshold: config.uncertain_threshold,
            },
        }
    }
}

/// Scores a probe against an enrollment set under the given thresholds.
///
/// Pure: no store access, no recording. The decision is driven by the
/// max similarity; owner at or above `owner_threshold`, uncertain at or
/// above `uncertain_threshold`, other below.
pub fn decide(
    probe: &Embedding,
    enrollment: &EnrollmentSet,
    config: &ThresholdConfig,
) -> Result<VerificationDecision, VoiceprintError> {
    if probe.dim() != enrollment.dim() {
        return Err(VoiceprintError::DimensionMismatch {
            expected: enrollment.dim(),
            got: probe.dim(),
        });
    }

    let all_similarities: Vec<f64> = enrollment
        .embeddings()
        .map(|e| cosine_similarity(probe.as_slice(), e.as_slice()))
        .collect();

    let max_similarity = all_similarities
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);

    let mut sorted = all_similarities.clone();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let k = TOP_K.min(sorted.len());
    let top_k_mean = sorted[..k].iter().sum::<f64>() / k as f64;

    let internal_state = if max_similarity >= config.owner_threshold {
        InternalState::Owner
    } else if max_similarity >= config.uncertain_threshold {
        InternalState::Uncertain
    } else {
        InternalState::Other
    };
    let decision = match internal_state {
        InternalState::Owner => Decision::Owner,
        _ => Decision::Other,
    };

    Ok(VerificationDecision {
        decision,
        internal_state,
        max_similarity,
        top_k_mean,
        all_similarities,
        thresholds_used: ThresholdsUsed {
            owner_threshold: config.owner_threshold,
            uncertain_threshold: config.uncertain_threshold,
        },
    })
}

/// Decision engine bound to a threshold store and an environment.
///
/// Threshold resolution and observation recording are best effort and
/// never fail a verification.
pub struct Verifier {
    thresholds: std::sync::Arc<ThresholdStore>,
    environment: String,
}

impl Verifier {
    pub fn new(thresholds: std::sync::Arc<ThresholdStore>, environment: impl Into<String>) -> Self {
        Self {
            thresholds,
            environment: environment.into(),
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// The thresholds currently in force for this verifier's
    /// environment.
    pub fn current_config(&self) -> ThresholdConfig {
        self.thresholds.resolve(&self.environment)
    }

    /// Scores a probe against an enrollment set using the environment's
    /// active thresholds, and records the outcome for recalibration.
    pub fn verify(
        &self,
        probe: &Embedding,
        enrollment: &EnrollmentSet,
        identity: Option<&str>,
    ) -> Result<VerificationDecision, VoiceprintError> {
        let config = self.thresholds.resolve(&self.environment);
        let result = decide(probe, enrollment, &config)?;
        self.thresholds.record_observation(
            result.max_similarity,
            result.internal_state,
            &self.environment,
            identity,
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use std::sync::Arc;

    fn orthogonal_enrollment() -> EnrollmentSet {
        // Three orthogonal unit vectors; a probe's similarity to each is
        // just the matching coordinate.
        EnrollmentSet::new(vec![
            Embedding::new(vec![1.0, 0.0, 0.0]),
            Embedding::new(vec![0.0, 1.0, 0.0]),
            Embedding::new(vec![0.0, 0.0, 1.0]),
        ])
        .unwrap()
    }

    fn config() -> ThresholdConfig {
        ThresholdConfig::defaults("test")
    }

    fn decide_with(similarities: &[f64]) -> VerificationDecision {
        // Build an enrollment/probe pair whose similarity scores are
        // exactly `similarities`: orthogonal members and a probe with
        // matching coordinates, re-scaled so the probe stays unit norm.
        let n = similarities.len();
        let members: Vec<Embedding> = (0..n)
            .map(|i| {
                let mut v = vec![0.0; n + 1];
                v[i] = 1.0;
                Embedding::new(v)
            })
            .collect();
        let mut coords: Vec<f64> = similarities.to_vec();
        let norm_sq: f64 = coords.iter().map(|s| s * s).sum();
        assert!(norm_sq <= 1.0, "similarity vector must fit in a unit ball");
        coords.push((1.0 - norm_sq).sqrt());

        let enrollment = EnrollmentSet::new(members).unwrap();
        decide(&Embedding::new(coords), &enrollment, &config()).unwrap()
    }

    #[test]
    fn strong_match_is_owner() {
        let result = decide_with(&[0.9, 0.4, 0.1]);
        assert_eq!(result.internal_state, InternalState::Owner);
        assert_eq!(result.decision, Decision::Owner);
        assert!((result.max_similarity - 0.9).abs() < 1e-9);
        assert!((result.top_k_mean - 0.65).abs() < 1e-9);
        assert_eq!(result.all_similarities.len(), 3);
    }

    #[test]
    fn borderline_match_collapses_to_other() {
        let result = decide_with(&[0.65, 0.5, 0.2]);
        assert_eq!(result.internal_state, InternalState::Uncertain);
        assert_eq!(result.decision, Decision::Other);
    }

    #[test]
    fn weak_match_is_other() {
        let result = decide_with(&[0.3, 0.2, 0.1]);
        assert_eq!(result.internal_state, InternalState::Other);
        assert_eq!(result.decision, Decision::Other);
    }

    #[test]
    fn thresholds_are_inclusive() {
        let result = decide_with(&[0.75]);
        assert_eq!(result.internal_state, InternalState::Owner);

        let result = decide_with(&[0.6]);
        assert_eq!(result.internal_state, InternalState::Uncertain);
    }

    #[test]
    fn single_member_top_k() {
        let result = decide_with(&[0.8]);
        assert!((result.top_k_mean - 0.8).abs() < 1e-9);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let enrollment = orthogonal_enrollment();
        let err = decide(&Embedding::new(vec![1.0, 0.0]), &enrollment, &config());
        assert!(matches!(
            err,
            Err(VoiceprintError::DimensionMismatch {
                expected: 3,
                got: 2
            })
        ));
    }

    #[test]
    fn zero_probe_scores_zero() {
        let enrollment = orthogonal_enrollment();
        let result = decide(
            &Embedding::new(vec![0.0, 0.0, 0.0]),
            &enrollment,
            &config(),
        )
        .unwrap();
        assert_eq!(result.max_similarity, 0.0);
        assert_eq!(result.internal_state, InternalState::Other);
    }

    #[test]
    fn verifier_records_observations() {
        let store = Arc::new(ThresholdStore::new(Arc::new(MemoryBackend::new())));
        let verifier = Verifier::new(store.clone(), "dev");
        let enrollment = orthogonal_enrollment();

        let result = verifier
            .verify(&Embedding::new(vec![1.0, 0.0, 0.0]), &enrollment, Some("u1"))
            .unwrap();
        assert_eq!(result.decision, Decision::Owner);

        let dist = store.compute_distribution("dev", None);
        assert_eq!(dist.sample_count, 1);
        let scoped = store.compute_distribution("dev", Some("u1"));
        assert_eq!(scoped.sample_count, 1);
    }

    #[test]
    fn skipped_fails_open() {
        let result = VerificationDecision::skipped(&config());
        assert_eq!(result.decision, Decision::Owner);
        assert_eq!(result.internal_state, InternalState::Skipped);
        assert_eq!(result.max_similarity, 0.0);
        assert!(result.all_similarities.is_empty());
    }

    #[test]
    fn internal_state_maps_to_chunk_decision() {
        assert_eq!(
            ChunkDecision::from(InternalState::Uncertain),
            ChunkDecision::Uncertain
        );
        assert_eq!(
            ChunkDecision::from(InternalState::Skipped),
            ChunkDecision::Skipped
        );
    }
}
