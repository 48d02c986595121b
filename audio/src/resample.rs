//! Whole-buffer sample rate conversion.
//!
//! Wraps rubato's FFT resampler for deterministic conversion of a complete
//! mono buffer. The feature extractor uses this to bring arbitrary-rate
//! input to its 16kHz analysis rate.

use rubato::{FftFixedInOut, Resampler};

use crate::error::AudioError;
use crate::pcm::PcmAudio;

/// Frames fed to the resampler per processing block.
const BLOCK_FRAMES: usize = 1024;

/// Resamples mono PCM to `target_rate`.
///
/// The input is processed in fixed blocks with the tail zero-padded, and
/// the output is trimmed to the exact expected length
/// `round(frames * target / source)`, so the result depends only on the
/// input samples.
///
/// Returns the input unchanged when it is already at `target_rate`.
pub fn resample(pcm: &PcmAudio, target_rate: u32) -> Result<PcmAudio, AudioError> {
    if pcm.channels() != 1 {
        return Err(AudioError::InvalidFormat(
            "resample expects mono input, downmix first".into(),
        ));
    }
    if pcm.sample_rate() == target_rate {
        return Ok(pcm.clone());
    }
    if pcm.is_empty() {
        return Err(AudioError::Empty);
    }

    let src = pcm.samples();
    let expected_len =
        (src.len() as f64 * target_rate as f64 / pcm.sample_rate() as f64).round() as usize;

    let mut resampler = FftFixedInOut::<f64>::new(
        pcm.sample_rate() as usize,
        target_rate as usize,
        BLOCK_FRAMES,
        1,
    )?;

    let mut out = Vec::with_capacity(expected_len + BLOCK_FRAMES);
    let mut pos = 0usize;
    let mut block = vec![vec![0.0f64; resampler.input_frames_next()]];

    // One extra zero block flushes the filter tail so short inputs still
    // produce their full expected output length.
    let mut flushed = false;
    while out.len() < expected_len {
        let need = resampler.input_frames_next();
        block[0].resize(need, 0.0);

        let avail = src.len().saturating_sub(pos);
        if avail == 0 {
            if flushed {
                break;
            }
            flushed = true;
            block[0].fill(0.0);
        } else {
            let take = avail.min(need);
            block[0][..take].copy_from_slice(&src[pos..pos + take]);
            block[0][take..].fill(0.0);
            pos += take;
        }

        let processed = resampler.process(&block, None)?;
        out.extend_from_slice(&processed[0]);
    }

    out.truncate(expected_len);
    PcmAudio::new(out, target_rate, 1, pcm.bit_depth())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine(freq: f64, rate: u32, seconds: f64) -> PcmAudio {
        let n = (rate as f64 * seconds) as usize;
        let samples: Vec<f64> = (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / rate as f64).sin() * 0.5)
            .collect();
        PcmAudio::new(samples, rate, 1, 16).unwrap()
    }

    #[test]
    fn same_rate_passthrough() {
        let pcm = sine(440.0, 16000, 0.5);
        let out = resample(&pcm, 16000).unwrap();
        assert_eq!(out.samples(), pcm.samples());
    }

    #[test]
    fn output_length_matches_ratio() {
        let pcm = sine(440.0, 48000, 1.0);
        let out = resample(&pcm, 16000).unwrap();
        assert_eq!(out.sample_rate(), 16000);
        assert_eq!(out.num_frames(), 16000);
    }

    #[test]
    fn upsample_length() {
        let pcm = sine(440.0, 8000, 0.5);
        let out = resample(&pcm, 16000).unwrap();
        assert_eq!(out.num_frames(), 8000);
    }

    #[test]
    fn deterministic() {
        let pcm = sine(440.0, 44100, 0.7);
        let a = resample(&pcm, 16000).unwrap();
        let b = resample(&pcm, 16000).unwrap();
        assert_eq!(a.samples(), b.samples());
    }

    #[test]
    fn rejects_stereo() {
        let pcm = PcmAudio::new(vec![0.0; 100], 48000, 2, 16).unwrap();
        assert!(resample(&pcm, 16000).is_err());
    }

    #[test]
    fn preserves_tone_energy() {
        // A 440Hz tone is far below Nyquist at both rates; resampling
        // should preserve most of its RMS.
        let pcm = sine(440.0, 48000, 1.0);
        let out = resample(&pcm, 16000).unwrap();
        let rms_in =
            (pcm.samples().iter().map(|s| s * s).sum::<f64>() / pcm.num_frames() as f64).sqrt();
        let rms_out =
            (out.samples().iter().map(|s| s * s).sum::<f64>() / out.num_frames() as f64).sqrt();
        assert!(
            (rms_in - rms_out).abs() / rms_in < 0.1,
            "rms {rms_in} vs {rms_out}"
        );
    }
}
