//! Rule-based audio quality gating.
//!
//! Enrollment samples become long-lived voice embeddings, so poor audio is
//! rejected up front with actionable reasons instead of producing a weak
//! voiceprint. All checks are evaluated independently and every failing
//! reason is reported; nothing short-circuits.

use serde::{Deserialize, Serialize};

use crate::pcm::PcmAudio;

/// Rejection reason codes, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    TooShort,
    TooSilent,
    TooQuiet,
    TooMuchClipping,
    InvalidSampleRate,
    InvalidChannels,
    LoadError,
}

/// Validation outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityStatus {
    Pass,
    Fail,
}

/// Measured quality metrics, reported alongside the status so callers can
/// show users what was wrong.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    #[serde(rename = "durationSeconds")]
    pub duration_seconds: f64,
    #[serde(rename = "silenceRatio")]
    pub silence_ratio: f64,
    /// RMS amplitude on the 16-bit-equivalent integer scale.
    #[serde(rename = "rms")]
    pub rms: f64,
    #[serde(rename = "clippingRatio")]
    pub clipping_ratio: f64,
    #[serde(rename = "sampleRate")]
    pub sample_rate: u32,
    #[serde(rename = "channels")]
    pub channels: u16,
    #[serde(rename = "bitDepth")]
    pub bit_depth: u16,
}

/// Structured quality validation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    #[serde(rename = "status")]
    pub status: QualityStatus,
    #[serde(rename = "reasons")]
    pub reasons: Vec<RejectionReason>,
    #[serde(rename = "metrics")]
    pub metrics: QualityMetrics,
    #[serde(rename = "message")]
    pub message: String,
}

impl QualityReport {
    /// Report for input that could not be decoded at all. The decode layer
    /// sits outside this crate; it uses this constructor so undecodable
    /// uploads surface as a normal FAIL report rather than an error.
    pub fn load_error(detail: &str) -> Self {
        Self {
            status: QualityStatus::Fail,
            reasons: vec![RejectionReason::LoadError],
            metrics: QualityMetrics::default(),
            message: format!("Error analyzing audio: {detail}"),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == QualityStatus::Pass
    }
}

/// Thresholds for [`validate`].
#[derive(Debug, Clone)]
pub struct QualityChecks {
    /// Minimum duration in seconds (default: 4.0).
    pub min_duration_seconds: f64,
    /// Maximum tolerated silence ratio (default: 0.30).
    pub max_silence_ratio: f64,
    /// Minimum RMS on the 16-bit scale (default: 500.0).
    pub min_rms: f64,
    /// Maximum tolerated clipping ratio (default: 0.05).
    pub max_clipping_ratio: f64,
    /// Expected sample rate in Hz (default: 16000).
    pub expected_sample_rate: u32,
    /// Tolerated deviation from the expected rate (default: 1000).
    pub sample_rate_tolerance: u32,
    /// Amplitude below this dBFS level counts as silence (default: -50.0).
    pub silence_threshold_db: f64,
    /// Minimum silent run length in milliseconds; shorter gaps are treated
    /// as speech pauses, not silence (default: 100).
    pub min_silence_run_ms: u32,
}

impl Default for QualityChecks {
    fn default() -> Self {
        Self {
            min_duration_seconds: 4.0,
            max_silence_ratio: 0.30,
            min_rms: 500.0,
            max_clipping_ratio: 0.05,
            expected_sample_rate: 16000,
            sample_rate_tolerance: 1000,
            silence_threshold_db: -50.0,
            min_silence_run_ms: 100,
        }
    }
}

impl QualityChecks {
    /// Stricter preset for enrollment-grade audio (8s minimum).
    pub fn enrollment() -> Self {
        Self {
            min_duration_seconds: 8.0,
            ..Self::default()
        }
    }
}

/// Validates audio quality with rule-based checks.
///
/// Never fails for well-formed input; an empty buffer yields a
/// `LoadError` report. `status` is `Pass` iff `reasons` is empty, and the
/// message concatenates one templated sentence per triggered reason in
/// fixed reason-code order.
pub fn validate(pcm: &PcmAudio, checks: &QualityChecks) -> QualityReport {
    if pcm.is_empty() {
        return QualityReport::load_error("no samples");
    }

    let metrics = QualityMetrics {
        duration_seconds: pcm.duration_seconds(),
        silence_ratio: silence_ratio(pcm, checks),
        rms: rms_16bit(pcm),
        clipping_ratio: clipping_ratio(pcm),
        sample_rate: pcm.sample_rate(),
        channels: pcm.channels(),
        bit_depth: pcm.bit_depth(),
    };

    let mut reasons = Vec::new();
    if metrics.duration_seconds < checks.min_duration_seconds {
        reasons.push(RejectionReason::TooShort);
    }
    if metrics.silence_ratio > checks.max_silence_ratio {
        reasons.push(RejectionReason::TooSilent);
    }
    if metrics.rms < checks.min_rms {
        reasons.push(RejectionReason::TooQuiet);
    }
    if metrics.clipping_ratio > checks.max_clipping_ratio {
        reasons.push(RejectionReason::TooMuchClipping);
    }
    let rate_delta = metrics.sample_rate.abs_diff(checks.expected_sample_rate);
    if rate_delta > checks.sample_rate_tolerance {
        reasons.push(RejectionReason::InvalidSampleRate);
    }
    if metrics.channels != 1 {
        reasons.push(RejectionReason::InvalidChannels);
    }

    let (status, message) = if reasons.is_empty() {
        (QualityStatus::Pass, "Audio quality is good!".to_string())
    } else {
        (QualityStatus::Fail, build_message(&reasons, &metrics, checks))
    };

    QualityReport {
        status,
        reasons,
        metrics,
        message,
    }
}

/// Fraction of the recording made of silent runs at least
/// `min_silence_run_ms` long, using an amplitude threshold in dBFS.
/// Shorter quiet gaps are normal speech pauses and do not count.
fn silence_ratio(pcm: &PcmAudio, checks: &QualityChecks) -> f64 {
    let samples = pcm.samples();
    if samples.is_empty() {
        return 1.0;
    }
    let threshold = 10f64.powf(checks.silence_threshold_db / 20.0);
    let frames_per_ch = pcm.channels() as usize;
    let min_run = (checks.min_silence_run_ms as usize * pcm.sample_rate() as usize / 1000)
        .max(1)
        * frames_per_ch;

    let mut silent_total = 0usize;
    let mut run = 0usize;
    for &s in samples {
        if s.abs() < threshold {
            run += 1;
        } else {
            if run >= min_run {
                silent_total += run;
            }
            run = 0;
        }
    }
    if run >= min_run {
        silent_total += run;
    }

    (silent_total as f64 / samples.len() as f64).clamp(0.0, 1.0)
}

/// RMS amplitude on the 16-bit-equivalent scale, so the 500.0 loudness
/// floor means the same thing regardless of source bit depth.
fn rms_16bit(pcm: &PcmAudio) -> f64 {
    let samples = pcm.samples();
    let mean_sq = samples.iter().map(|s| s * s).sum::<f64>() / samples.len() as f64;
    mean_sq.sqrt() * 32768.0
}

/// Fraction of samples at or beyond the representable magnitude for the
/// source bit depth.
fn clipping_ratio(pcm: &PcmAudio) -> f64 {
    let max_int = (1i64 << (pcm.bit_depth() - 1)) as f64;
    let threshold = (max_int - 1.0) / max_int;
    let clipped = pcm
        .samples()
        .iter()
        .filter(|s| s.abs() >= threshold)
        .count();
    clipped as f64 / pcm.samples().len() as f64
}

fn build_message(
    reasons: &[RejectionReason],
    metrics: &QualityMetrics,
    checks: &QualityChecks,
) -> String {
    let mut parts = Vec::with_capacity(reasons.len());
    for reason in reasons {
        match reason {
            RejectionReason::TooShort => parts.push(format!(
                "Recording too short ({:.1}s). Please record for at least {}s.",
                metrics.duration_seconds, checks.min_duration_seconds
            )),
            RejectionReason::TooSilent => parts.push(format!(
                "Too much silence detected ({:.0}%). Please speak more clearly.",
                metrics.silence_ratio * 100.0
            )),
            RejectionReason::TooQuiet => {
                parts.push("Voice too quiet. Please speak louder or hold the phone closer.".into())
            }
            RejectionReason::TooMuchClipping => parts.push(format!(
                "Audio is distorted ({:.1}% clipping). Please speak at a normal volume.",
                metrics.clipping_ratio * 100.0
            )),
            RejectionReason::InvalidSampleRate => parts.push(format!(
                "Invalid audio format (sample rate: {}Hz). Expected 16kHz.",
                metrics.sample_rate
            )),
            RejectionReason::InvalidChannels => parts.push(format!(
                "Invalid audio format ({} channels). Expected mono (1 channel).",
                metrics.channels
            )),
            RejectionReason::LoadError => {
                parts.push("Could not analyze audio file. Please try recording again.".into())
            }
        }
    }
    parts.join(" ")
}
