//! Decoded PCM value type.

use crate::error::AudioError;

/// Decoded PCM audio.
///
/// Samples are stored as f64 in `[-1, 1]`, interleaved when multi-channel.
/// `bit_depth` records the source quantization so downstream analysis
/// (clipping detection, RMS on the integer scale) can reason about the
/// original representable range.
#[derive(Debug, Clone)]
pub struct PcmAudio {
    samples: Vec<f64>,
    sample_rate: u32,
    channels: u16,
    bit_depth: u16,
}

impl PcmAudio {
    /// Creates a PcmAudio from normalized f64 samples.
    ///
    /// Returns an error if the format fields are degenerate (zero sample
    /// rate or zero channels); callers feeding undecodable input should
    /// surface that through the quality validator instead.
    pub fn new(
        samples: Vec<f64>,
        sample_rate: u32,
        channels: u16,
        bit_depth: u16,
    ) -> Result<Self, AudioError> {
        if sample_rate == 0 {
            return Err(AudioError::InvalidFormat("sample rate is 0".into()));
        }
        if channels == 0 {
            return Err(AudioError::InvalidFormat("channel count is 0".into()));
        }
        if bit_depth == 0 || bit_depth > 32 {
            return Err(AudioError::InvalidFormat(format!(
                "unsupported bit depth {bit_depth}"
            )));
        }
        Ok(Self {
            samples,
            sample_rate,
            channels,
            bit_depth,
        })
    }

    /// Creates 16-bit mono PcmAudio from i16 samples.
    pub fn from_i16_samples(samples: &[i16], sample_rate: u32) -> Self {
        let samples = samples.iter().map(|&s| s as f64 / 32768.0).collect();
        Self {
            samples,
            sample_rate,
            channels: 1,
            bit_depth: 16,
        }
    }

    /// Creates a mono silence buffer of the given duration.
    pub fn silence(duration_seconds: f64, sample_rate: u32) -> Self {
        let n = (duration_seconds * sample_rate as f64).round() as usize;
        Self {
            samples: vec![0.0; n],
            sample_rate,
            channels: 1,
            bit_depth: 16,
        }
    }

    /// Returns the interleaved samples.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn bit_depth(&self) -> u16 {
        self.bit_depth
    }

    /// Number of sample frames (samples per channel).
    pub fn num_frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Duration of the audio in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.num_frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Downmixes to mono by averaging channels. Mono input is returned
    /// unchanged.
    pub fn downmix_to_mono(&self) -> PcmAudio {
        if self.channels == 1 {
            return self.clone();
        }
        let ch = self.channels as usize;
        let mono: Vec<f64> = self
            .samples
            .chunks_exact(ch)
            .map(|frame| frame.iter().sum::<f64>() / ch as f64)
            .collect();
        PcmAudio {
            samples: mono,
            sample_rate: self.sample_rate,
            channels: 1,
            bit_depth: self.bit_depth,
        }
    }

    /// Returns a copy of the frame range `[start, end)`, clamped to the
    /// buffer. Mono-agnostic: ranges are in frames, not raw samples.
    pub fn slice_frames(&self, start: usize, end: usize) -> PcmAudio {
        let ch = self.channels as usize;
        let total = self.num_frames();
        let start = start.min(total);
        let end = end.clamp(start, total);
        PcmAudio {
            samples: self.samples[start * ch..end * ch].to_vec(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            bit_depth: self.bit_depth,
        }
    }

    /// Appends another buffer's samples. Formats must match.
    pub fn concat(&mut self, other: &PcmAudio) -> Result<(), AudioError> {
        if other.sample_rate != self.sample_rate || other.channels != self.channels {
            return Err(AudioError::InvalidFormat(format!(
                "cannot concat {}Hz/{}ch into {}Hz/{}ch",
                other.sample_rate, other.channels, self.sample_rate, self.channels
            )));
        }
        self.samples.extend_from_slice(&other.samples);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_i16_normalizes() {
        let pcm = PcmAudio::from_i16_samples(&[0, 16384, -32768], 16000);
        assert_eq!(pcm.samples()[0], 0.0);
        assert!((pcm.samples()[1] - 0.5).abs() < 1e-9);
        assert!((pcm.samples()[2] + 1.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_degenerate_format() {
        assert!(PcmAudio::new(vec![0.0], 0, 1, 16).is_err());
        assert!(PcmAudio::new(vec![0.0], 16000, 0, 16).is_err());
        assert!(PcmAudio::new(vec![0.0], 16000, 1, 0).is_err());
    }

    #[test]
    fn duration_counts_frames_not_samples() {
        // 2 channels, 16000 interleaved samples = 8000 frames = 0.5s.
        let pcm = PcmAudio::new(vec![0.0; 16000], 16000, 2, 16).unwrap();
        assert_eq!(pcm.num_frames(), 8000);
        assert!((pcm.duration_seconds() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn downmix_averages_channels() {
        // L=0.5, R=-0.5 everywhere -> mono 0.0; L=1.0, R=0.0 -> 0.5.
        let pcm = PcmAudio::new(vec![0.5, -0.5, 1.0, 0.0], 16000, 2, 16).unwrap();
        let mono = pcm.downmix_to_mono();
        assert_eq!(mono.channels(), 1);
        assert_eq!(mono.samples(), &[0.0, 0.5]);
    }

    #[test]
    fn slice_clamps_to_buffer() {
        let pcm = PcmAudio::from_i16_samples(&[1, 2, 3, 4], 16000);
        let s = pcm.slice_frames(2, 100);
        assert_eq!(s.num_frames(), 2);
        let s = pcm.slice_frames(10, 20);
        assert!(s.is_empty());
    }

    #[test]
    fn concat_rejects_format_mismatch() {
        let mut a = PcmAudio::from_i16_samples(&[1, 2], 16000);
        let b = PcmAudio::from_i16_samples(&[3], 8000);
        assert!(a.concat(&b).is_err());
        let c = PcmAudio::from_i16_samples(&[3], 16000);
        a.concat(&c).unwrap();
        assert_eq!(a.num_frames(), 3);
    }
}
