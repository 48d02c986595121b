//! Session audio chunking.
//!
//! Long recordings are split into overlapping 12 second clips so speaker
//! verification can run per chunk and catch speaker changes mid-session.
//! Each chunk owns its PCM buffer and carries timing relative to the
//! original recording; consuming a chunk by value releases the buffer.

use serde::{Deserialize, Serialize};

use crate::error::AudioError;
use crate::pcm::PcmAudio;

/// Safety cap on the number of emitted chunks, guarding against
/// pathological inputs.
pub const MAX_CHUNKS: usize = 1000;

/// Options for [`split`].
#[derive(Debug, Clone)]
pub struct ChunkOptions {
    /// Target chunk duration in seconds (default: 12.0).
    ///
    /// 10-15s is the useful range: shorter chunks give unreliable
    /// embeddings, longer ones can miss speaker changes.
    pub chunk_duration: f64,
    /// Overlap between consecutive chunks in seconds (default: 0.5),
    /// so words are not cut at boundaries.
    pub overlap: f64,
    /// Slices shorter than this are not emitted (default: 1.0).
    pub min_chunk_duration: f64,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_duration: 12.0,
            overlap: 0.5,
            min_chunk_duration: 1.0,
        }
    }
}

/// A time-bounded slice of a longer recording.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// The chunk's own copy of the samples.
    pub pcm: PcmAudio,
    /// Start time in seconds, relative to the original recording.
    pub start_time: f64,
    /// End time in seconds, relative to the original recording.
    pub end_time: f64,
    /// 0-based position in the chunk sequence.
    pub index: usize,
    /// Chunk duration in seconds.
    pub duration: f64,
}

/// Verification outcome for one chunk, as consumed by [`reconstruct`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkDecision {
    /// Spoken by the enrolled owner.
    Owner,
    /// Similarity fell in the uncertain band.
    Uncertain,
    /// Spoken by someone else.
    Other,
    /// Verification could not run for this chunk.
    Skipped,
}

/// Splits audio into overlapping chunks.
///
/// Starting at t=0, each chunk covers `[t, min(t + chunk_duration, total))`.
/// A slice shorter than `min_chunk_duration` is dropped and splitting
/// stops; otherwise the next chunk starts at `end - overlap`. Emission
/// stops unconditionally after [`MAX_CHUNKS`] chunks.
///
/// Guarantees: end times are monotonically non-decreasing, and the final
/// chunk ends exactly at the source duration unless the cap was hit.
pub fn split(pcm: &PcmAudio, opts: &ChunkOptions) -> Vec<AudioChunk> {
    let rate = pcm.sample_rate() as f64;
    let total_frames = pcm.num_frames();
    let chunk_frames = (opts.chunk_duration * rate) as usize;
    let overlap_frames = (opts.overlap * rate) as usize;
    let min_frames = (opts.min_chunk_duration * rate) as usize;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < total_frames {
        let end = (start + chunk_frames).min(total_frames);
        if end - start < min_frames {
            break;
        }
        chunks.push(AudioChunk {
            pcm: pcm.slice_frames(start, end),
            start_time: start as f64 / rate,
            end_time: end as f64 / rate,
            index: chunks.len(),
            duration: (end - start) as f64 / rate,
        });
        if chunks.len() >= MAX_CHUNKS {
            break;
        }
        start = end - overlap_frames;
    }
    chunks
}

/// Concatenates, in original chunk order, every chunk whose decision is
/// `Owner` (plus `Uncertain` when `include_uncertain` is set).
///
/// `Other` and `Skipped` chunks are dropped so non-owner speech never
/// reaches the downstream pipeline. When nothing qualifies, a 100ms
/// silence placeholder is returned instead of an empty buffer.
pub fn reconstruct(
    chunks: &[AudioChunk],
    decisions: &[ChunkDecision],
    include_uncertain: bool,
) -> Result<PcmAudio, AudioError> {
    if chunks.len() != decisions.len() {
        return Err(AudioError::DecisionCountMismatch {
            chunks: chunks.len(),
            decisions: decisions.len(),
        });
    }

    let keep = |d: &ChunkDecision| {
        matches!(d, ChunkDecision::Owner)
            || (include_uncertain && matches!(d, ChunkDecision::Uncertain))
    };

    let mut iter = chunks
        .iter()
        .zip(decisions.iter())
        .filter(|(_, d)| keep(d))
        .map(|(c, _)| c);

    let Some(first) = iter.next() else {
        let rate = chunks.first().map_or(16000, |c| c.pcm.sample_rate());
        return Ok(PcmAudio::silence(0.1, rate));
    };

    let mut out = first.pcm.clone();
    for chunk in iter {
        out.concat(&chunk.pcm)?;
    }
    Ok(out)
}
