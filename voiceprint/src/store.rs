//! Threshold store backends.
//!
//! The store persists two kinds of records: the active threshold config
//! per environment, and an append-only stream of similarity observations
//! used for offline recalibration. Backends are injected through
//! [`ThresholdBackend`]; tests use [`MemoryBackend`], deployments
//! [`RedbBackend`].

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};

use crate::error::ThresholdError;
use crate::threshold::{SimilarityObservation, ThresholdConfig};

/// Scope name for the cross-identity observation stream.
pub const GLOBAL_SCOPE: &str = "_global";

/// Storage backend for threshold configs and similarity observations.
///
/// Every method is atomic per call: a reader sees either the old or the
/// new config, never a partial write, and an abandoned caller cannot
/// leave a half-appended observation behind.
pub trait ThresholdBackend: Send + Sync {
    /// Loads the active config for an environment, if one was calibrated.
    fn load_config(&self, environment: &str) -> Result<Option<ThresholdConfig>, ThresholdError>;

    /// Atomically replaces the active config for the config's environment.
    fn store_config(&self, config: &ThresholdConfig) -> Result<(), ThresholdError>;

    /// Appends an observation to a scope (an identity, or
    /// [`GLOBAL_SCOPE`]).
    fn append_observation(
        &self,
        scope: &str,
        observation: &SimilarityObservation,
    ) -> Result<(), ThresholdError>;

    /// Returns up to `limit` of the most recent observations in a scope
    /// for one environment, newest first.
    fn recent_observations(
        &self,
        scope: &str,
        environment: &str,
        limit: usize,
    ) -> Result<Vec<SimilarityObservation>, ThresholdError>;
}

/// Observations kept per scope before the oldest are discarded.
const MEMORY_SCOPE_CAPACITY: usize = 10_000;

/// In-memory backend for tests and single-process deployments.
///
/// Configs live behind a read-mostly lock: `resolve` readers are never
/// blocked behind an in-progress calibration write for longer than the
/// map insert itself.
#[derive(Default)]
pub struct MemoryBackend {
    configs: RwLock<HashMap<String, ThresholdConfig>>,
    observations: RwLock<HashMap<String, Vec<SimilarityObservation>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ThresholdBackend for MemoryBackend {
    fn load_config(&self, environment: &str) -> Result<Option<ThresholdConfig>, ThresholdError> {
        Ok(self.configs.read().get(environment).cloned())
    }

    fn store_config(&self, config: &ThresholdConfig) -> Result<(), ThresholdError> {
        self.configs
            .write()
            .insert(config.environment.clone(), config.clone());
        Ok(())
    }

    fn append_observation(
        &self,
        scope: &str,
        observation: &SimilarityObservation,
    ) -> Result<(), ThresholdError> {
        let mut map = self.observations.write();
        let stream = map.entry(scope.to_string()).or_default();
        stream.push(observation.clone());
        if stream.len() > MEMORY_SCOPE_CAPACITY {
            let excess = stream.len() - MEMORY_SCOPE_CAPACITY;
            stream.drain(..excess);
        }
        Ok(())
    }

    fn recent_observations(
        &self,
        scope: &str,
        environment: &str,
        limit: usize,
    ) -> Result<Vec<SimilarityObservation>, ThresholdError> {
        let map = self.observations.read();
        let Some(stream) = map.get(scope) else {
            return Ok(Vec::new());
        };
        Ok(stream
            .iter()
            .rev()
            .filter(|o| o.environment == environment)
            .take(limit)
            .cloned()
            .collect())
    }
}

const CONFIGS: TableDefinition<&str, &[u8]> = TableDefinition::new("threshold_configs");
const OBSERVATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("similarity_observations");
const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("observation_sequences");

/// Persistent backend on redb.
///
/// Observations are keyed `"{scope}/{seq:020}"` so a prefix range scan
/// yields them in append order; the per-scope sequence counter is bumped
/// in the same write transaction as the insert.
pub struct RedbBackend {
    db: Database,
}

impl RedbBackend {
    /// Opens or creates a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ThresholdError> {
        let db = Database::create(path).map_err(|e| ThresholdError::Backend(e.to_string()))?;

        let tx = db
            .begin_write()
            .map_err(|e| ThresholdError::Backend(e.to_string()))?;
        {
            tx.open_table(CONFIGS)
                .map_err(|e| ThresholdError::Backend(e.to_string()))?;
            tx.open_table(OBSERVATIONS)
                .map_err(|e| ThresholdError::Backend(e.to_string()))?;
            tx.open_table(SEQUENCES)
                .map_err(|e| ThresholdError::Backend(e.to_string()))?;
        }
        tx.commit()
            .map_err(|e| ThresholdError::Backend(e.to_string()))?;

        Ok(Self { db })
    }

    fn observation_key(scope: &str, seq: u64) -> String {
        format!("{scope}/{seq:020}")
    }
}

impl ThresholdBackend for RedbBackend {
    fn load_config(&self, environment: &str) -> Result<Option<ThresholdConfig>, ThresholdError> {
        let tx = self
            .db
            .begin_read()
            .map_err(|e| ThresholdError::Backend(e.to_string()))?;
        let table = tx
            .open_table(CONFIGS)
            .map_err(|e| ThresholdError::Backend(e.to_string()))?;

        match table
            .get(environment)
            .map_err(|e| ThresholdError::Backend(e.to_string()))?
        {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn store_config(&self, config: &ThresholdConfig) -> Result<(), ThresholdError> {
        let encoded = serde_json::to_vec(config)?;
        let tx = self
            .db
            .begin_write()
            .map_err(|e| ThresholdError::Backend(e.to_string()))?;
        {
            let mut table = tx
                .open_table(CONFIGS)
                .map_err(|e| ThresholdError::Backend(e.to_string()))?;
            table
                .insert(config.environment.as_str(), encoded.as_slice())
                .map_err(|e| ThresholdError::Backend(e.to_string()))?;
        }
        tx.commit()
            .map_err(|e| ThresholdError::Backend(e.to_string()))?;
        Ok(())
    }

    fn append_observation(
        &self,
        scope: &str,
        observation: &SimilarityObservation,
    ) -> Result<(), ThresholdError> {
        let encoded = serde_json::to_vec(observation)?;
        let tx = self
            .db
            .begin_write()
            .map_err(|e| ThresholdError::Backend(e.to_string()))?;
        {
            let mut seqs = tx
                .open_table(SEQUENCES)
                .map_err(|e| ThresholdError::Backend(e.to_string()))?;
            let seq = seqs
                .get(scope)
                .map_err(|e| ThresholdError::Backend(e.to_string()))?
                .map(|v| v.value())
                .unwrap_or(0);
            seqs.insert(scope, seq + 1)
                .map_err(|e| ThresholdError::Backend(e.to_string()))?;

            let mut table = tx
                .open_table(OBSERVATIONS)
                .map_err(|e| ThresholdError::Backend(e.to_string()))?;
            table
                .insert(
                    Self::observation_key(scope, seq).as_str(),
                    encoded.as_slice(),
                )
                .map_err(|e| ThresholdError::Backend(e.to_string()))?;
        }
        tx.commit()
            .map_err(|e| ThresholdError::Backend(e.to_string()))?;
        Ok(())
    }

    fn recent_observations(
        &self,
        scope: &str,
        environment: &str,
        limit: usize,
    ) -> Result<Vec<SimilarityObservation>, ThresholdError> {
        let tx = self
            .db
            .begin_read()
            .map_err(|e| ThresholdError::Backend(e.to_string()))?;
        let table = tx
            .open_table(OBSERVATIONS)
            .map_err(|e| ThresholdError::Backend(e.to_string()))?;

        // Keys sort lexicographically; the zero-padded sequence keeps the
        // prefix range in append order.
        let start = format!("{scope}/");
        let end = format!("{scope}0"); // '0' is the byte after '/'
        let range = table
            .range(start.as_str()..end.as_str())
            .map_err(|e| ThresholdError::Backend(e.to_string()))?;

        let mut out = Vec::new();
        for entry in range.rev() {
            let (_, value) = entry.map_err(|e| ThresholdError::Backend(e.to_string()))?;
            let obs: SimilarityObservation = serde_json::from_slice(value.value())?;
            if obs.environment == environment {
                out.push(obs);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }
}
