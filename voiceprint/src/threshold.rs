//! Decision thresholds: per-environment configs, similarity observation
//! recording, and distribution summaries for recalibration.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ThresholdError;
use crate::store::{ThresholdBackend, GLOBAL_SCOPE};
use crate::verify::InternalState;

/// Fallback owner-acceptance threshold when nothing is calibrated.
pub const DEFAULT_OWNER_THRESHOLD: f64 = 0.75;

/// Fallback lower bound of the uncertain band.
pub const DEFAULT_UNCERTAIN_THRESHOLD: f64 = 0.6;

/// How many of the most recent observations feed a distribution summary.
pub const OBSERVATION_WINDOW: usize = 1000;

const OWNER_ENV_VAR: &str = "VERIFICATION_OWNER_THRESHOLD";
const UNCERTAIN_ENV_VAR: &str = "VERIFICATION_UNCERTAIN_THRESHOLD";

/// The active decision thresholds for one deployment environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(rename = "environment")]
    pub environment: String,

    /// Similarity at or above which a probe is accepted as the owner.
    #[serde(rename = "ownerThreshold")]
    pub owner_threshold: f64,

    /// Lower bound of the uncertain band; below it the probe is another
    /// speaker.
    #[serde(rename = "uncertainThreshold")]
    pub uncertain_threshold: f64,

    #[serde(rename = "calibratedAt")]
    pub calibrated_at: DateTime<Utc>,

    /// Snapshot of the observed similarity distribution at calibration
    /// time, if one was computed.
    #[serde(
        rename = "similarityDistribution",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub similarity_distribution: Option<SimilarityDistribution>,

    #[serde(rename = "notes", default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ThresholdConfig {
    /// The built-in defaults for an environment.
    pub fn defaults(environment: &str) -> Self {
        Self {
            environment: environment.to_string(),
            owner_threshold: DEFAULT_OWNER_THRESHOLD,
            uncertain_threshold: DEFAULT_UNCERTAIN_THRESHOLD,
            calibrated_at: Utc::now(),
            similarity_distribution: None,
            notes: None,
        }
    }

    /// Checks the threshold invariants: both in [0, 1] and owner not
    /// below uncertain.
    pub fn validate(&self) -> Result<(), ThresholdError> {
        if !(0.0..=1.0).contains(&self.owner_threshold) {
            return Err(ThresholdError::InvalidConfig(format!(
                "owner threshold {} outside [0, 1]",
                self.owner_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.uncertain_threshold) {
            return Err(ThresholdError::InvalidConfig(format!(
                "uncertain threshold {} outside [0, 1]",
                self.uncertain_threshold
            )));
        }
        if self.owner_threshold < self.uncertain_threshold {
            return Err(ThresholdError::ThresholdOrder {
                owner: self.owner_threshold,
                uncertain: self.uncertain_threshold,
            });
        }
        Ok(())
    }
}

/// Summary statistics over a window of similarity observations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityDistribution {
    #[serde(rename = "mean")]
    pub mean: f64,
    #[serde(rename = "std")]
    pub std: f64,
    #[serde(rename = "min")]
    pub min: f64,
    #[serde(rename = "max")]
    pub max: f64,
    /// Keyed `p25`, `p50`, `p75`, `p95`.
    #[serde(rename = "percentiles")]
    pub percentiles: BTreeMap<String, f64>,
    #[serde(rename = "sampleCount")]
    pub sample_count: usize,
}

impl SimilarityDistribution {
    /// A wide, conservative prior used when no observations exist yet.
    /// Calibrating from it reproduces the built-in default thresholds
    /// rather than inventing tight bounds from nothing.
    pub fn conservative_default() -> Self {
        let mut percentiles = BTreeMap::new();
        percentiles.insert("p25".to_string(), 0.35);
        percentiles.insert("p50".to_string(), 0.5);
        percentiles.insert("p75".to_string(), 0.7);
        percentiles.insert("p95".to_string(), 0.9);
        Self {
            mean: 0.5,
            std: 0.2,
            min: 0.0,
            max: 1.0,
            percentiles,
            sample_count: 0,
        }
    }

    /// Computes the summary of a non-empty sample. Returns the
    /// conservative default for an empty one.
    pub fn from_samples(similarities: &[f64]) -> Self {
        if similarities.is_empty() {
            return Self::conservative_default();
        }
        let n = similarities.len() as f64;
        let mean = similarities.iter().sum::<f64>() / n;
        let var = similarities.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / n;

        let mut sorted = similarities.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let mut percentiles = BTreeMap::new();
        for p in [25.0, 50.0, 75.0, 95.0] {
            percentiles.insert(format!("p{}", p as u32), percentile(&sorted, p));
        }
        Self {
            mean,
            std: var.sqrt(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            percentiles,
            sample_count: similarities.len(),
        }
    }
}

/// Linear-interpolation percentile over a sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let pos = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = pos - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

/// One verification outcome, recorded for later recalibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityObservation {
    /// The decision-driving max similarity of the verification.
    #[serde(rename = "similarity")]
    pub similarity: f64,

    #[serde(rename = "internalState")]
    pub internal_state: InternalState,

    #[serde(rename = "environment")]
    pub environment: String,

    /// Claimed identity, when the caller supplied one.
    #[serde(rename = "identity", default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,

    #[serde(rename = "recordedAt")]
    pub recorded_at: DateTime<Utc>,
}

/// Resolves, persists, and recalibrates decision thresholds.
///
/// Resolution never fails and never blocks a verification: a broken
/// backend degrades to environment variables or built-in defaults with a
/// warning. Observation recording is fire-and-forget for the same
/// reason.
pub struct ThresholdStore {
    backend: Arc<dyn ThresholdBackend>,
}

impl ThresholdStore {
    pub fn new(backend: Arc<dyn ThresholdBackend>) -> Self {
        Self { backend }
    }

    /// Returns the active config for an environment.
    ///
    /// Precedence: persisted config, then `VERIFICATION_OWNER_THRESHOLD`
    /// / `VERIFICATION_UNCERTAIN_THRESHOLD` (optionally suffixed with
    /// `_<ENVIRONMENT>`), then the built-in defaults. Each threshold
    /// falls back independently when only one variable is set.
    pub fn resolve(&self, environment: &str) -> ThresholdConfig {
        match self.backend.load_config(environment) {
            Ok(Some(config)) => return config,
            Ok(None) => {}
            Err(e) => {
                warn!(environment, error = %e, "threshold config load failed, using fallbacks");
            }
        }

        let owner = env_threshold(OWNER_ENV_VAR, environment);
        let uncertain = env_threshold(UNCERTAIN_ENV_VAR, environment);
        let from_env = owner.is_some() || uncertain.is_some();

        let config = ThresholdConfig {
            environment: environment.to_string(),
            owner_threshold: owner.unwrap_or(DEFAULT_OWNER_THRESHOLD),
            uncertain_threshold: uncertain.unwrap_or(DEFAULT_UNCERTAIN_THRESHOLD),
            calibrated_at: Utc::now(),
            similarity_distribution: None,
            notes: from_env.then(|| "resolved from environment variables".to_string()),
        };
        debug!(
            environment,
            owner = config.owner_threshold,
            uncertain = config.uncertain_threshold,
            from_env,
            "no persisted threshold config"
        );
        config
    }

    /// Validates and persists a config, replacing any previous one for
    /// its environment.
    pub fn update(&self, config: ThresholdConfig) -> Result<(), ThresholdError> {
        config.validate()?;
        self.backend.store_config(&config)
    }

    /// Records a similarity observation in the global stream and, when
    /// an identity is given, in that identity's stream.
    ///
    /// Failures are logged and swallowed: losing an observation must
    /// never fail the verification that produced it.
    pub fn record_observation(
        &self,
        similarity: f64,
        internal_state: InternalState,
        environment: &str,
        identity: Option<&str>,
    ) {
        let observation = SimilarityObservation {
            similarity,
            internal_state,
            environment: environment.to_string(),
            identity: identity.map(str::to_string),
            recorded_at: Utc::now(),
        };

        if let Err(e) = self.backend.append_observation(GLOBAL_SCOPE, &observation) {
            warn!(environment, error = %e, "dropping similarity observation");
            return;
        }
        if let Some(id) = identity {
            if let Err(e) = self.backend.append_observation(id, &observation) {
                warn!(environment, identity = id, error = %e, "dropping scoped observation");
            }
        }
    }

    /// Summarizes the most recent [`OBSERVATION_WINDOW`] observations for
    /// a scope. A broken backend or an empty window yields the
    /// conservative default distribution.
    pub fn compute_distribution(
        &self,
        environment: &str,
        identity: Option<&str>,
    ) -> SimilarityDistribution {
        let scope = identity.unwrap_or(GLOBAL_SCOPE);
        let observations =
            match self
                .backend
                .recent_observations(scope, environment, OBSERVATION_WINDOW)
            {
                Ok(obs) => obs,
                Err(e) => {
                    warn!(environment, scope, error = %e, "observation read failed");
                    return SimilarityDistribution::conservative_default();
                }
            };
        let similarities: Vec<f64> = observations.iter().map(|o| o.similarity).collect();
        SimilarityDistribution::from_samples(&similarities)
    }
}

fn env_threshold(base: &str, environment: &str) -> Option<f64> {
    let scoped = format!("{base}_{}", environment.to_uppercase());
    for name in [scoped.as_str(), base] {
        if let Ok(raw) = std::env::var(name) {
            match raw.trim().parse::<f64>() {
                Ok(v) => return Some(v),
                Err(_) => {
                    warn!(var = name, value = %raw, "unparseable threshold variable ignored");
                }
            }
        }
    }
    None
}
