//! Session-owned key registry
//!
//! Dataset keys and result keys live in one registry per session, injected
//! into the importer and the reduction engine. Dataset keys are single use:
//! a key stays taken after a failed import. The result namespace must be
//! zero-reset before every reduction, and the reset hands out a
//! `ResultScope` that later resets invalidate.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::{HarnessError, Result};
use crate::import::DatasetMetadata;
use crate::reduce::Scalar;

/// Name of one slot in the result namespace
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResultKey(String);

impl ResultKey {
    /// Slot holding the result for column position `column`
    pub fn column(column: usize) -> Self {
        ResultKey(format!("Result{}", column))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A source file or folder registered for one import
///
/// Not `Clone`: importing consumes it, and importing the same file again
/// needs a fresh `stage` call.
#[derive(Debug)]
pub struct StagedSource {
    namespace: String,
    id: u64,
    path: PathBuf,
    files: Vec<PathBuf>,
}

impl StagedSource {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Files to parse, in name order for folders
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

/// Proof that the result namespace was reset, valid until the next reset
#[derive(Debug)]
pub struct ResultScope {
    generation: u64,
}

impl ResultScope {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// An in-flight import holding its key
#[derive(Debug)]
pub struct Reservation {
    key: String,
    qualified: String,
    files: Vec<PathBuf>,
}

impl Reservation {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Session-qualified name used on the nodes
    pub fn qualified(&self) -> &str {
        &self.qualified
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

#[derive(Debug, Clone)]
enum DatasetState {
    Importing,
    Ready(Arc<DatasetMetadata>),
    Poisoned(String),
    Dropped,
}

#[derive(Debug, Default)]
struct RegistryState {
    next_stage: u64,
    pending: HashSet<u64>,
    datasets: HashMap<String, DatasetState>,
    results: BTreeMap<ResultKey, Scalar>,
    generation: u64,
}

#[derive(Debug)]
pub struct KeyRegistry {
    namespace: String,
    state: Mutex<RegistryState>,
}

impl KeyRegistry {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Node-side name of a dataset key
    pub fn qualified(&self, key: &str) -> String {
        format!("{}/{}", self.namespace, key)
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // The state is plain data; a panic elsewhere cannot leave it torn
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `folder/file` for import
    pub fn stage(&self, folder: &Path, file: &str) -> Result<StagedSource> {
        let path = folder.join(file);
        if !path.exists() {
            return Err(HarnessError::SourceNotFound { path });
        }
        let files = if path.is_dir() {
            let mut files = Vec::new();
            for entry in std::fs::read_dir(&path).map_err(|e| HarnessError::io(&path, e))? {
                let entry = entry.map_err(|e| HarnessError::io(&path, e))?;
                let hidden = entry.file_name().to_string_lossy().starts_with('.');
                if entry.path().is_file() && !hidden {
                    files.push(entry.path());
                }
            }
            files.sort();
            if files.is_empty() {
                return Err(HarnessError::SourceNotFound { path });
            }
            files
        } else {
            vec![path.clone()]
        };

        let mut state = self.lock();
        let id = state.next_stage;
        state.next_stage += 1;
        state.pending.insert(id);
        debug!("Staged {} ({} files) as source {}", path.display(), files.len(), id);
        Ok(StagedSource {
            namespace: self.namespace.clone(),
            id,
            path,
            files,
        })
    }

    /// Claim `key` for an import of `source`, consuming the source
    pub fn reserve(&self, key: &str, source: StagedSource) -> Result<Reservation> {
        let mut state = self.lock();
        if state.datasets.contains_key(key) {
            return Err(HarnessError::DuplicateKey {
                key: key.to_string(),
            });
        }
        if source.namespace != self.namespace || !state.pending.remove(&source.id) {
            return Err(HarnessError::internal(format!(
                "staged source {} is not pending in this registry",
                source.path.display()
            )));
        }
        state
            .datasets
            .insert(key.to_string(), DatasetState::Importing);
        Ok(Reservation {
            key: key.to_string(),
            qualified: self.qualified(key),
            files: source.files,
        })
    }

    pub fn commit(
        &self,
        reservation: Reservation,
        metadata: DatasetMetadata,
    ) -> Arc<DatasetMetadata> {
        let metadata = Arc::new(metadata);
        self.lock()
            .datasets
            .insert(reservation.key, DatasetState::Ready(metadata.clone()));
        metadata
    }

    /// Leave `key` unusable after a failed import
    pub fn poison(&self, reservation: Reservation, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Dataset key '{}' poisoned: {}", reservation.key, reason);
        self.lock()
            .datasets
            .insert(reservation.key, DatasetState::Poisoned(reason));
    }

    /// Metadata of a ready dataset
    pub fn dataset(&self, key: &str) -> Result<Arc<DatasetMetadata>> {
        let state = self.lock();
        let unusable = |state: &str| HarnessError::UnknownDataset {
            key: key.to_string(),
            state: state.to_string(),
        };
        match state.datasets.get(key) {
            Some(DatasetState::Ready(metadata)) => Ok(metadata.clone()),
            Some(DatasetState::Importing) => Err(unusable("import in progress")),
            Some(DatasetState::Poisoned(reason)) => {
                Err(unusable(&format!("a failed import left it undefined ({})", reason)))
            }
            Some(DatasetState::Dropped) => Err(unusable("dropped from the cluster")),
            None => Err(unusable("never imported")),
        }
    }

    pub fn mark_dropped(&self, key: &str) {
        if let Some(state) = self.lock().datasets.get_mut(key) {
            *state = DatasetState::Dropped;
        }
    }

    /// Keys of datasets currently ready, sorted
    pub fn ready_keys(&self) -> Vec<String> {
        let state = self.lock();
        let mut keys: Vec<String> = state
            .datasets
            .iter()
            .filter(|(_, s)| matches!(s, DatasetState::Ready(_)))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Clear the result namespace and store `Result0 = 0`
    pub fn zero_reset(&self) -> ResultScope {
        let mut state = self.lock();
        state.results.clear();
        state.results.insert(ResultKey::column(0), Scalar::zero());
        state.generation += 1;
        debug!("Result namespace reset (generation {})", state.generation);
        ResultScope {
            generation: state.generation,
        }
    }

    pub fn check_scope(&self, scope: &ResultScope) -> Result<()> {
        let current = self.lock().generation;
        if scope.generation != current {
            return Err(HarnessError::StaleResultScope {
                issued: scope.generation,
                current,
            });
        }
        Ok(())
    }

    pub fn write_result(&self, scope: &ResultScope, column: usize, value: Scalar) -> Result<()> {
        let mut state = self.lock();
        if scope.generation != state.generation {
            return Err(HarnessError::StaleResultScope {
                issued: scope.generation,
                current: state.generation,
            });
        }
        state.results.insert(ResultKey::column(column), value);
        Ok(())
    }

    /// Read back results for `columns` in ascending order
    pub fn read_results(&self, scope: &ResultScope, columns: Range<usize>) -> Result<Vec<Scalar>> {
        let state = self.lock();
        if scope.generation != state.generation {
            return Err(HarnessError::StaleResultScope {
                issued: scope.generation,
                current: state.generation,
            });
        }
        columns
            .map(|column| {
                let key = ResultKey::column(column);
                state
                    .results
                    .get(&key)
                    .copied()
                    .ok_or_else(|| HarnessError::internal(format!("no value stored under {}", key)))
            })
            .collect()
    }

    /// Current value stored under `key`, if any
    pub fn result(&self, key: &ResultKey) -> Option<Scalar> {
        self.lock().results.get(key).copied()
    }

    pub fn result_count(&self) -> usize {
        self.lock().results.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn metadata(key: &str) -> DatasetMetadata {
        DatasetMetadata {
            key: key.to_string(),
            row_count: 1,
            column_count: 1,
            parse_time_ms: 0,
            partitions: Vec::new(),
        }
    }

    fn folder_with(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for file in files {
            std::fs::write(dir.path().join(file), "1\n").unwrap();
        }
        dir
    }

    #[test]
    fn test_stage_missing_source() {
        let registry = KeyRegistry::new("s");
        let dir = folder_with(&[]);
        let err = registry.stage(dir.path(), "missing.csv").unwrap_err();
        assert!(matches!(err, HarnessError::SourceNotFound { .. }));
    }

    #[test]
    fn test_stage_folder_lists_files_in_order() {
        let registry = KeyRegistry::new("s");
        let dir = folder_with(&[]);
        let sub = dir.path().join("parts");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("b.csv"), "1\n").unwrap();
        std::fs::write(sub.join("a.csv"), "1\n").unwrap();
        std::fs::write(sub.join(".hidden"), "x\n").unwrap();
        let source = registry.stage(dir.path(), "parts").unwrap();
        let names: Vec<_> = source
            .files()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);
    }

    #[test]
    fn test_duplicate_and_poisoned_keys() {
        let registry = KeyRegistry::new("s");
        let dir = folder_with(&["d.csv"]);

        let reservation = registry
            .reserve("cA", registry.stage(dir.path(), "d.csv").unwrap())
            .unwrap();
        assert_eq!(reservation.qualified(), "s/cA");
        registry.commit(reservation, metadata("cA"));
        assert!(registry.dataset("cA").is_ok());

        let again = registry.stage(dir.path(), "d.csv").unwrap();
        assert!(matches!(
            registry.reserve("cA", again),
            Err(HarnessError::DuplicateKey { .. })
        ));

        let reservation = registry
            .reserve("cB", registry.stage(dir.path(), "d.csv").unwrap())
            .unwrap();
        registry.poison(reservation, "node 1 crashed");
        let err = registry.dataset("cB").unwrap_err();
        assert!(err.to_string().contains("undefined"));
        let retry = registry.stage(dir.path(), "d.csv").unwrap();
        assert!(matches!(
            registry.reserve("cB", retry),
            Err(HarnessError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn test_source_from_another_registry_rejected() {
        let dir = folder_with(&["d.csv"]);
        let other = KeyRegistry::new("other");
        let source = other.stage(dir.path(), "d.csv").unwrap();
        let registry = KeyRegistry::new("s");
        let _own = registry.stage(dir.path(), "d.csv").unwrap();
        assert!(registry.reserve("cA", source).is_err());
        assert!(registry.dataset("cA").is_err());
    }

    #[test]
    fn test_zero_reset_invalidates_older_scopes() {
        let registry = KeyRegistry::new("s");
        let first = registry.zero_reset();
        assert_eq!(registry.result(&ResultKey::column(0)), Some(Scalar::zero()));
        registry.write_result(&first, 3, Scalar::from_int(9)).unwrap();

        let second = registry.zero_reset();
        assert_eq!(registry.result_count(), 1);
        assert!(matches!(
            registry.check_scope(&first),
            Err(HarnessError::StaleResultScope { issued: 1, current: 2 })
        ));
        assert!(registry.write_result(&first, 3, Scalar::zero()).is_err());
        registry.write_result(&second, 1, Scalar::from_int(5)).unwrap();
        assert_eq!(
            registry.read_results(&second, 0..2).unwrap(),
            vec![Scalar::zero(), Scalar::from_int(5)]
        );
    }
}
