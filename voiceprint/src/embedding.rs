//! Embedding and enrollment set value types.

use serde::{Deserialize, Serialize};

use crate::error::VoiceprintError;

/// Dimensionality of speaker embeddings produced by the feature extractor:
/// mean and standard deviation of 60 per-frame features.
pub const EMBEDDING_DIM: usize = 120;

/// A fixed-length, L2-normalized speaker embedding.
///
/// Produced only by [`crate::FeatureExtractor::extract`]; immutable once
/// created. A zero vector is the degenerate low-confidence case (silent or
/// empty signal) and compares at 0.0 similarity to everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f64>);

impl Embedding {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&v| v == 0.0)
    }
}

/// L2-normalizes a vector in place. A zero vector is left unchanged;
/// callers treat it as a degenerate embedding.
pub fn l2_normalize(v: &mut [f64]) {
    let norm: f64 = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity `dot(a,b) / (|a|*|b|)`.
///
/// Returns 0.0 when either vector has zero norm. Lengths must match;
/// the decision engine validates dimensions before calling.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// One enrollment recording's embedding plus audit metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentSample {
    /// Position of this sample in the enrollment sequence.
    #[serde(rename = "index")]
    pub index: usize,

    #[serde(rename = "embedding")]
    pub embedding: Embedding,

    /// Cosine similarity to every other member of the set, in member
    /// order (own slot is 1.0). Low values flag a bad enrollment take.
    #[serde(rename = "pairwiseSimilarities")]
    pub pairwise_similarities: Vec<f64>,
}

/// The embeddings captured during voice registration, kept individually.
///
/// Verification always compares against every member; the samples are
/// never collapsed into an average (that loses the variability that makes
/// multi-sample comparison robust). Re-enrollment replaces the whole set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentSet {
    #[serde(rename = "samples")]
    samples: Vec<EnrollmentSample>,
}

impl EnrollmentSet {
    /// Builds a set from the enrollment embeddings, computing pairwise
    /// similarity metadata for quality auditing.
    ///
    /// Fails with `EmptyEnrollment` for an empty list and
    /// `DimensionMismatch` if the embeddings disagree on length.
    pub fn new(embeddings: Vec<Embedding>) -> Result<Self, VoiceprintError> {
        if embeddings.is_empty() {
            return Err(VoiceprintError::EmptyEnrollment);
        }
        let dim = embeddings[0].dim();
        for e in &embeddings[1..] {
            if e.dim() != dim {
                return Err(VoiceprintError::DimensionMismatch {
                    expected: dim,
                    got: e.dim(),
                });
            }
        }

        let samples = embeddings
            .iter()
            .enumerate()
            .map(|(i, emb)| EnrollmentSample {
                index: i,
                embedding: emb.clone(),
                pairwise_similarities: embeddings
                    .iter()
                    .map(|other| cosine_similarity(emb.as_slice(), other.as_slice()))
                    .collect(),
            })
            .collect();
        Ok(Self { samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[EnrollmentSample] {
        &self.samples
    }

    /// Embedding dimensionality shared by every member.
    pub fn dim(&self) -> usize {
        self.samples[0].embedding.dim()
    }

    pub fn embeddings(&self) -> impl Iterator<Item = &Embedding> {
        self.samples.iter().map(|s| &s.embedding)
    }

    /// Average of the members, re-normalized. Kept for legacy consumers
    /// only; verification must compare against the individual members.
    pub fn mean_embedding(&self) -> Embedding {
        let dim = self.dim();
        let mut mean = vec![0.0f64; dim];
        for s in &self.samples {
            for (m, v) in mean.iter_mut().zip(s.embedding.as_slice()) {
                *m += v;
            }
        }
        for m in &mut mean {
            *m /= self.samples.len() as f64;
        }
        l2_normalize(&mut mean);
        Embedding::new(mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_self_similarity_is_one() {
        let v = vec![0.3, -0.5, 0.8, 0.1];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_is_symmetric() {
        let a = vec![0.3, -0.5, 0.8, 0.1];
        let b = vec![0.1, 0.9, -0.2, 0.4];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn cosine_orthogonal_and_opposite() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn cosine_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn l2_normalize_unit_and_zero() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        let norm: f64 = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-12);

        let mut z = vec![0.0, 0.0];
        l2_normalize(&mut z);
        assert_eq!(z, vec![0.0, 0.0]);
    }

    #[test]
    fn enrollment_set_pairwise_metadata() {
        let set = EnrollmentSet::new(vec![
            Embedding::new(vec![1.0, 0.0]),
            Embedding::new(vec![0.0, 1.0]),
        ])
        .unwrap();
        assert_eq!(set.len(), 2);
        let s0 = &set.samples()[0];
        assert_eq!(s0.index, 0);
        assert!((s0.pairwise_similarities[0] - 1.0).abs() < 1e-12);
        assert_eq!(s0.pairwise_similarities[1], 0.0);
    }

    #[test]
    fn enrollment_set_rejects_empty_and_mismatched() {
        assert!(matches!(
            EnrollmentSet::new(vec![]),
            Err(VoiceprintError::EmptyEnrollment)
        ));
        let err = EnrollmentSet::new(vec![
            Embedding::new(vec![1.0, 0.0]),
            Embedding::new(vec![1.0, 0.0, 0.0]),
        ]);
        assert!(matches!(
            err,
            Err(VoiceprintError::DimensionMismatch {
                expected: 2,
                got: 3
            })
        ));
    }

    #[test]
    fn mean_embedding_is_normalized() {
        let set = EnrollmentSet::new(vec![
            Embedding::new(vec![1.0, 0.0]),
            Embedding::new(vec![0.0, 1.0]),
        ])
        .unwrap();
        let mean = set.mean_embedding();
        let norm: f64 = mean.as_slice().iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-12);
    }

    #[test]
    fn embedding_serde_is_transparent() {
        let e = Embedding::new(vec![0.5, -0.25]);
        let json = serde_json::to_string(&e).unwrap();
        assert_eq!(json, "[0.5,-0.25]");
        let back: Embedding = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
