//! MFCC speaker embedding extraction.
//!
//! Fixed, hand-engineered feature pipeline (no learned model):
//!
//! 1. Downmix to mono, resample to 16kHz
//! 2. Pre-emphasis 0.97
//! 3. 25ms Hamming frames, 10ms shift
//! 4. 512-point FFT power spectrum
//! 5. 40-channel triangular mel filterbank, 80-7600 Hz, natural log
//! 6. Orthonormal DCT-II, first 20 coefficients
//! 7. Delta and delta-delta (regression window of 2 frames per side)
//! 8. Per-feature mean and std across frames, L2-normalized
//!
//! All arithmetic is f64 and fully deterministic: identical input bytes
//! produce identical embeddings.

use std::f64::consts::PI;

use ownvoice_audio::{resample, PcmAudio};

use crate::embedding::{l2_normalize, Embedding};
use crate::error::VoiceprintError;

/// Configures MFCC extraction.
///
/// Defaults produce the 120-dimensional embedding used for speaker
/// verification: 20 cepstral coefficients plus their first and second
/// derivatives, summarized by mean and standard deviation.
#[derive(Debug, Clone)]
pub struct MfccConfig {
    /// Analysis sample rate in Hz (default: 16000). Input at other rates
    /// is resampled.
    pub sample_rate: u32,
    /// Frame length in samples (default: 400 = 25ms @ 16kHz).
    pub frame_length: usize,
    /// Frame shift in samples (default: 160 = 10ms @ 16kHz).
    pub frame_shift: usize,
    /// FFT size; frames are zero-padded up to this (default: 512).
    pub fft_size: usize,
    /// Number of mel filterbank channels (default: 40).
    pub num_mels: usize,
    /// Low cutoff frequency for mel bins in Hz (default: 80).
    pub low_freq: f64,
    /// High cutoff frequency in Hz (default: 7600).
    pub high_freq: f64,
    /// Pre-emphasis coefficient (default: 0.97).
    pub pre_emphasis: f64,
    /// Cepstral coefficients kept per frame (default: 20).
    pub num_ceps: usize,
    /// Regression window half-width for delta features (default: 2).
    pub delta_window: usize,
    /// Hard cap on input duration in seconds (default: 900). A single
    /// oversized upload must not consume unbounded CPU.
    pub max_duration_seconds: f64,
}

impl Default for MfccConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_length: 400, // 25ms @ 16kHz
            frame_shift: 160,  // 10ms @ 16kHz
            fft_size: 512,
            num_mels: 40,
            low_freq: 80.0,
            high_freq: 7600.0,
            pre_emphasis: 0.97,
            num_ceps: 20,
            delta_window: 2,
            max_duration_seconds: 900.0,
        }
    }
}

/// Extracts speaker embeddings from decoded PCM audio.
///
/// Pure and deterministic; safe for concurrent use from multiple chunk
/// workers. The mel filterbank and window are precomputed once per
/// extractor.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    cfg: MfccConfig,
    window: Vec<f64>,
    filterbank: Vec<Vec<f64>>,
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self::with_config(MfccConfig::default())
    }

    pub fn with_config(cfg: MfccConfig) -> Self {
        let window = hamming_window(cfg.frame_length);
        let filterbank = mel_filterbank(
            cfg.num_mels,
            cfg.fft_size,
            cfg.sample_rate as usize,
            cfg.low_freq,
            cfg.high_freq,
        );
        Self {
            cfg,
            window,
            filterbank,
        }
    }

    pub fn config(&self) -> &MfccConfig {
        &self.cfg
    }

    /// Embedding dimensionality: mean + std of (ceps + delta + delta-delta).
    pub fn dimension(&self) -> usize {
        self.cfg.num_ceps * 3 * 2
    }

    /// Computes a speaker embedding from PCM audio.
    ///
    /// Multi-channel input is downmixed, non-16kHz input resampled.
    /// Fails with `InsufficientAudio` when the signal is shorter than one
    /// analysis window and `AudioTooLong` beyond the configured cap.
    pub fn extract(&self, pcm: &PcmAudio) -> Result<Embedding, VoiceprintError> {
        let duration = pcm.duration_seconds();
        if duration > self.cfg.max_duration_seconds {
            return Err(VoiceprintError::AudioTooLong {
                got_seconds: duration,
                max_seconds: self.cfg.max_duration_seconds,
            });
        }

        let mono = pcm.downmix_to_mono();
        let mono = if mono.sample_rate() != self.cfg.sample_rate {
            if mono.is_empty() {
                return Err(VoiceprintError::InsufficientAudio {
                    min_samples: self.cfg.frame_length,
                    got_samples: 0,
                });
            }
            resample(&mono, self.cfg.sample_rate)?
        } else {
            mono
        };

        let samples = mono.samples();
        if samples.len() < self.cfg.frame_length {
            return Err(VoiceprintError::InsufficientAudio {
                min_samples: self.cfg.frame_length,
                got_samples: samples.len(),
            });
        }

        let emphasized = self.pre_emphasize(samples);
        let mfcc = self.mfcc_frames(&emphasized);
        let features = append_deltas(&mfcc, self.cfg.delta_window);

        let mut embedding = summarize(&features);
        l2_normalize(&mut embedding);
        Ok(Embedding::new(embedding))
    }

    /// y[n] = x[n] - 0.97 * x[n-1]; y[0] = x[0].
    fn pre_emphasize(&self, samples: &[f64]) -> Vec<f64> {
        let mut out = Vec::with_capacity(samples.len());
        out.push(samples[0]);
        for i in 1..samples.len() {
            out.push(samples[i] - self.cfg.pre_emphasis * samples[i - 1]);
        }
        out
    }

    /// Per-frame MFCC: window, FFT power spectrum, log-mel, DCT.
    fn mfcc_frames(&self, samples: &[f64]) -> Vec<Vec<f64>> {
        let cfg = &self.cfg;
        let num_frames = (samples.len() - cfg.frame_length) / cfg.frame_shift + 1;
        let half_fft = cfg.fft_size / 2 + 1;

        let mut frames = Vec::with_capacity(num_frames);
        let mut fft_buf = vec![(0.0f64, 0.0f64); cfg.fft_size];
        let mut power_spec = vec![0.0f64; half_fft];
        let mut log_mel = vec![0.0f64; cfg.num_mels];

        for f in 0..num_frames {
            let offset = f * cfg.frame_shift;

            // Window and zero-pad to FFT size.
            for v in &mut fft_buf {
                *v = (0.0, 0.0);
            }
            for i in 0..cfg.frame_length {
                fft_buf[i] = (samples[offset + i] * self.window[i], 0.0);
            }

            fft(&mut fft_buf);

            for (k, p) in power_spec.iter_mut().enumerate() {
                let (re, im) = fft_buf[k];
                *p = re * re + im * im;
            }

            // Mel filterbank energies, natural log floored at machine
            // epsilon to avoid log(0) on silent frames.
            for (m, filter) in self.filterbank.iter().enumerate() {
                let mut energy = 0.0;
                for (k, &w) in filter.iter().enumerate() {
                    energy += w * power_spec[k];
                }
                log_mel[m] = energy.max(f64::EPSILON).ln();
            }

            frames.push(dct_ortho(&log_mel, cfg.num_ceps));
        }
        frames
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Orthonormal type-II DCT, keeping the first `num_ceps` coefficients.
fn dct_ortho(input: &[f64], num_ceps: usize) -> Vec<f64> {
    let n = input.len();
    let scale0 = (1.0 / n as f64).sqrt();
    let scale = (2.0 / n as f64).sqrt();

    (0..num_ceps.min(n))
        .map(|k| {
            let sum: f64 = input
                .iter()
                .enumerate()
                .map(|(i, &x)| x * (PI * k as f64 * (2 * i + 1) as f64 / (2 * n) as f64).cos())
                .sum();
            sum * if k == 0 { scale0 } else { scale }
        })
        .collect()
}

/// Appends delta and delta-delta features to each frame.
///
/// Deltas use symmetric regression over `window` frames on each side with
/// clamped frame indices at the sequence edges:
/// `d[t] = sum_n n*(c[t+n] - c[t-n]) / (2 * sum_n n^2)`.
fn append_deltas(frames: &[Vec<f64>], window: usize) -> Vec<Vec<f64>> {
    let deltas = compute_deltas(frames, window);
    let delta_deltas = compute_deltas(&deltas, window);

    frames
        .iter()
        .zip(deltas.iter())
        .zip(delta_deltas.iter())
        .map(|((c, d), dd)| {
            let mut row = Vec::with_capacity(c.len() * 3);
            row.extend_from_slice(c);
            row.extend_from_slice(d);
            row.extend_from_slice(dd);
            row
        })
        .collect()
}

fn compute_deltas(frames: &[Vec<f64>], window: usize) -> Vec<Vec<f64>> {
    let t_max = frames.len();
    let dim = frames[0].len();
    let denom: f64 = 2.0 * (1..=window).map(|n| (n * n) as f64).sum::<f64>();

    (0..t_max)
        .map(|t| {
            (0..dim)
                .map(|i| {
                    let mut num = 0.0;
                    for n in 1..=window {
                        let ahead = (t + n).min(t_max - 1);
                        let behind = t.saturating_sub(n);
                        num += n as f64 * (frames[ahead][i] - frames[behind][i]);
                    }
                    num / denom
                })
                .collect()
        })
        .collect()
}

/// Per-feature mean then per-feature population standard deviation,
/// concatenated.
fn summarize(frames: &[Vec<f64>]) -> Vec<f64> {
    let t = frames.len() as f64;
    let dim = frames[0].len();

    let mut mean = vec![0.0f64; dim];
    for frame in frames {
        for (m, v) in mean.iter_mut().zip(frame) {
            *m += v;
        }
    }
    for m in &mut mean {
        *m /= t;
    }

    let mut std = vec![0.0f64; dim];
    for frame in frames {
        for ((s, v), m) in std.iter_mut().zip(frame).zip(&mean) {
            let d = v - m;
            *s += d * d;
        }
    }
    for s in &mut std {
        *s = (*s / t).sqrt();
    }

    let mut out = mean;
    out.extend(std);
    out
}

fn hamming_window(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}

fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10.0_f64.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filterbank weights, `[num_mels][fft_size/2 + 1]`.
fn mel_filterbank(
    num_mels: usize,
    fft_size: usize,
    sample_rate: usize,
    low_freq: f64,
    high_freq: f64,
) -> Vec<Vec<f64>> {
    let half_fft = fft_size / 2 + 1;
    let mel_low = hz_to_mel(low_freq);
    let mel_high = hz_to_mel(high_freq);

    // num_mels + 2 equally spaced points on the mel scale.
    let bin_indices: Vec<usize> = (0..num_mels + 2)
        .map(|i| {
            let mel = mel_low + i as f64 * (mel_high - mel_low) / (num_mels + 1) as f64;
            let hz = mel_to_hz(mel);
            let bin = (hz * fft_size as f64 / sample_rate as f64).floor() as isize;
            bin.clamp(0, half_fft as isize - 1) as usize
        })
        .collect();

    let mut fb = Vec::with_capacity(num_mels);
    for m in 0..num_mels {
        let mut filter = vec![0.0f64; half_fft];
        let left = bin_indices[m];
        let center = bin_indices[m + 1];
        let right = bin_indices[m + 2];

        if center > left {
            for k in left..=center {
                filter[k] = (k - left) as f64 / (center - left) as f64;
            }
        }
        if right > center {
            for k in center..=right {
                filter[k] = (right - k) as f64 / (right - center) as f64;
            }
        }
        fb.push(filter);
    }
    fb
}

/// In-place Cooley-Tukey FFT over (real, imag) pairs.
/// Input length must be a power of 2.
fn fft(x: &mut [(f64, f64)]) {
    let n = x.len();
    if n <= 1 {
        return;
    }

    // Bit-reversal permutation.
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j ^= bit;
        if i < j {
            x.swap(i, j);
        }
    }

    // Butterfly passes.
    let mut size = 2;
    while size <= n {
        let half = size / 2;
        let angle = -2.0 * PI / size as f64;
        let wn = (angle.cos(), angle.sin());
        let mut start = 0;
        while start < n {
            let mut w = (1.0, 0.0);
            for k in 0..half {
                let u = x[start + k];
                let t_re = w.0 * x[start + k + half].0 - w.1 * x[start + k + half].1;
                let t_im = w.0 * x[start + k + half].1 + w.1 * x[start + k + half].0;
                x[start + k] = (u.0 + t_re, u.1 + t_im);
                x[start + k + half] = (u.0 - t_re, u.1 - t_im);
                let new_w = (w.0 * wn.0 - w.1 * wn.1, w.0 * wn.1 + w.1 * wn.0);
                w = new_w;
            }
            start += size;
        }
        size <<= 1;
    }
}
