//! Chunked session verification.
//!
//! Splits a long recording into overlapping chunks, scores every chunk
//! against the enrollment set, and reassembles the per-chunk outcomes in
//! timeline order. A chunk that cannot be scored never aborts the
//! session: it is marked skipped, its binary answer fails open to owner,
//! and only positively matched chunk audio is reassembled.

use std::sync::atomic::{AtomicUsize, Ordering};

use ownvoice_audio::{reconstruct, split, AudioChunk, ChunkDecision, ChunkOptions, PcmAudio};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::embedding::EnrollmentSet;
use crate::error::VoiceprintError;
use crate::mfcc::FeatureExtractor;
use crate::verify::{InternalState, VerificationDecision, Verifier};

/// Verification outcome for one chunk, tagged with its position in the
/// source recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkVerification {
    /// 0-based position in the chunk sequence.
    #[serde(rename = "index")]
    pub index: usize,

    /// Start time in seconds, relative to the original recording.
    #[serde(rename = "startTime")]
    pub start_time: f64,

    /// End time in seconds, relative to the original recording.
    #[serde(rename = "endTime")]
    pub end_time: f64,

    #[serde(rename = "decision")]
    pub decision: VerificationDecision,
}

impl ChunkVerification {
    /// The coarse label consumed by [`reconstruct`].
    pub fn chunk_decision(&self) -> ChunkDecision {
        self.decision.internal_state.into()
    }
}

/// Scores chunked sessions against an enrollment set.
///
/// Chunks are independent, so they are fanned out across a scoped thread
/// pool sized to the machine; results are reassembled in chunk order
/// regardless of completion order.
pub struct SessionVerifier {
    extractor: FeatureExtractor,
    verifier: Verifier,
}

impl SessionVerifier {
    pub fn new(extractor: FeatureExtractor, verifier: Verifier) -> Self {
        Self {
            extractor,
            verifier,
        }
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Scores every chunk, in parallel, returning one result per chunk
    /// in chunk order.
    ///
    /// A chunk whose extraction or scoring fails gets the degraded
    /// skipped decision instead of failing the whole batch.
    pub fn verify_chunks(
        &self,
        chunks: &[AudioChunk],
        enrollment: &EnrollmentSet,
        identity: Option<&str>,
    ) -> Vec<ChunkVerification> {
        if chunks.is_empty() {
            return Vec::new();
        }

        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(chunks.len());

        let next = AtomicUsize::new(0);
        let results: Mutex<Vec<ChunkVerification>> = Mutex::new(Vec::with_capacity(chunks.len()));

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    let Some(chunk) = chunks.get(i) else {
                        break;
                    };
                    let result = self.verify_chunk(chunk, enrollment, identity);
                    results.lock().push(result);
                });
            }
        });

        let mut results = results.into_inner();
        results.sort_by_key(|r| r.index);

        let owner = results
            .iter()
            .filter(|r| r.decision.internal_state == InternalState::Owner)
            .count();
        let skipped = results
            .iter()
            .filter(|r| r.decision.internal_state == InternalState::Skipped)
            .count();
        debug!(
            chunks = results.len(),
            owner, skipped, "chunk verification complete"
        );
        results
    }

    fn verify_chunk(
        &self,
        chunk: &AudioChunk,
        enrollment: &EnrollmentSet,
        identity: Option<&str>,
    ) -> ChunkVerification {
        let decision = self
            .extractor
            .extract(&chunk.pcm)
            .and_then(|probe| self.verifier.verify(&probe, enrollment, identity))
            .unwrap_or_else(|e| {
                warn!(
                    index = chunk.index,
                    start = chunk.start_time,
                    error = %e,
                    "chunk could not be scored, skipping"
                );
                VerificationDecision::skipped(&self.verifier.current_config())
            });
        ChunkVerification {
            index: chunk.index,
            start_time: chunk.start_time,
            end_time: chunk.end_time,
            decision,
        }
    }

    /// Splits a recording and scores every chunk.
    pub fn verify_session(
        &self,
        pcm: &PcmAudio,
        opts: &ChunkOptions,
        enrollment: &EnrollmentSet,
        identity: Option<&str>,
    ) -> Vec<ChunkVerification> {
        let chunks = split(pcm, opts);
        self.verify_chunks(&chunks, enrollment, identity)
    }

    /// Splits and scores a recording, then reassembles the audio of the
    /// chunks attributed to the owner (plus uncertain chunks when
    /// `include_uncertain` is set).
    pub fn owner_audio(
        &self,
        pcm: &PcmAudio,
        opts: &ChunkOptions,
        enrollment: &EnrollmentSet,
        identity: Option<&str>,
        include_uncertain: bool,
    ) -> Result<(PcmAudio, Vec<ChunkVerification>), VoiceprintError> {
        let chunks = split(pcm, opts);
        let results = self.verify_chunks(&chunks, enrollment, identity);
        let decisions: Vec<ChunkDecision> = results.iter().map(|r| r.chunk_decision()).collect();
        let audio = reconstruct(&chunks, &decisions, include_uncertain)?;
        Ok((audio, results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use crate::threshold::ThresholdStore;
    use crate::verify::Decision;
    use std::sync::Arc;

    fn tone(freq: f64, seconds: f64) -> PcmAudio {
        let rate = 16000u32;
        let samples: Vec<f64> = (0..(seconds * rate as f64) as usize)
            .map(|i| 0.4 * (2.0 * std::f64::consts::PI * freq * i as f64 / rate as f64).sin())
            .collect();
        PcmAudio::new(samples, rate, 1, 16).unwrap()
    }

    fn session_verifier() -> SessionVerifier {
        let store = Arc::new(ThresholdStore::new(Arc::new(MemoryBackend::new())));
        SessionVerifier::new(FeatureExtractor::new(), Verifier::new(store, "test"))
    }

    fn enrollment_from(sv: &SessionVerifier, pcm: &PcmAudio) -> EnrollmentSet {
        let embedding = sv.extractor().extract(pcm).unwrap();
        EnrollmentSet::new(vec![embedding]).unwrap()
    }

    #[test]
    fn same_voice_session_is_all_owner() {
        let sv = session_verifier();
        let audio = tone(300.0, 25.0);
        let enrollment = enrollment_from(&sv, &tone(300.0, 12.0));

        let results = sv.verify_session(&audio, &ChunkOptions::default(), &enrollment, None);
        assert_eq!(results.len(), 3);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.index, i);
            assert_eq!(r.decision.decision, Decision::Owner);
        }
    }

    #[test]
    fn results_come_back_in_chunk_order() {
        let sv = session_verifier();
        let audio = tone(300.0, 60.0);
        let enrollment = enrollment_from(&sv, &tone(300.0, 12.0));

        let chunks = split(&audio, &ChunkOptions::default());
        let results = sv.verify_chunks(&chunks, &enrollment, None);
        assert_eq!(results.len(), chunks.len());
        for (r, c) in results.iter().zip(&chunks) {
            assert_eq!(r.index, c.index);
            assert_eq!(r.start_time, c.start_time);
            assert_eq!(r.end_time, c.end_time);
        }
    }

    #[test]
    fn unscorable_chunk_is_skipped_not_fatal() {
        let sv = session_verifier();
        let enrollment = enrollment_from(&sv, &tone(300.0, 12.0));

        // 10ms is far below one analysis frame.
        let chunks = vec![AudioChunk {
            pcm: tone(300.0, 0.01),
            start_time: 0.0,
            end_time: 0.01,
            index: 0,
            duration: 0.01,
        }];
        let results = sv.verify_chunks(&chunks, &enrollment, None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].decision.internal_state, InternalState::Skipped);
        // Fail-open: a skipped chunk counts as the owner's.
        assert_eq!(results[0].decision.decision, Decision::Owner);
        assert_eq!(results[0].chunk_decision(), ChunkDecision::Skipped);
    }

    #[test]
    fn empty_chunk_list_yields_empty_results() {
        let sv = session_verifier();
        let enrollment = enrollment_from(&sv, &tone(300.0, 12.0));
        assert!(sv.verify_chunks(&[], &enrollment, None).is_empty());
    }

    #[test]
    fn owner_audio_keeps_owner_chunks() {
        let sv = session_verifier();
        let audio = tone(300.0, 25.0);
        let enrollment = enrollment_from(&sv, &tone(300.0, 12.0));

        let (kept, results) = sv
            .owner_audio(&audio, &ChunkOptions::default(), &enrollment, None, false)
            .unwrap();
        assert_eq!(results.len(), 3);
        // Every chunk matched, so all chunk audio survives.
        let total: usize = split(&audio, &ChunkOptions::default())
            .iter()
            .map(|c| c.pcm.num_frames())
            .sum();
        assert_eq!(kept.num_frames(), total);
    }

    #[test]
    fn verification_feeds_the_observation_stream() {
        let store = Arc::new(ThresholdStore::new(Arc::new(MemoryBackend::new())));
        let sv = SessionVerifier::new(
            FeatureExtractor::new(),
            Verifier::new(store.clone(), "test"),
        );
        let audio = tone(300.0, 25.0);
        let enrollment = enrollment_from(&sv, &tone(300.0, 12.0));

        let results = sv.verify_session(&audio, &ChunkOptions::default(), &enrollment, None);
        let dist = store.compute_distribution("test", None);
        assert_eq!(dist.sample_count, results.len());
    }
}
