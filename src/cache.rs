// Explicit caches for the two expensive steps: loading the CSV and fitting
// a model. Each is owned by its caller; nothing here is process-global.
use crate::error::Result;
use crate::loader::{load_observations, Dataset, LoadReport};
use crate::model::TrainedForecast;
use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// A small map from input parameters to a computed value.
#[derive(Debug)]
pub struct KeyedCache<K, V> {
    entries: HashMap<K, Arc<V>>,
}

impl<K: Eq + Hash, V> Default for KeyedCache<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V> KeyedCache<K, V> {
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries.get(key).cloned()
    }

    /// Return the cached value for `key`, computing it on a miss. Failed
    /// computations are not cached.
    pub fn get_or_try_insert_with<F>(&mut self, key: K, compute: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Result<V>,
    {
        if let Some(v) = self.entries.get(&key) {
            return Ok(Arc::clone(v));
        }
        let value = Arc::new(compute()?);
        self.entries.insert(key, Arc::clone(&value));
        Ok(value)
    }

    pub fn retain(&mut self, keep: impl Fn(&K) -> bool) {
        self.entries.retain(|k, _| keep(k));
    }

    pub fn invalidate(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileFingerprint {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileFingerprint {
    fn of(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

/// A loaded dataset and the generation it was loaded in. The generation
/// changes every time any file is (re)loaded.
#[derive(Debug, Clone)]
pub struct LoadedDataset {
    pub dataset: Arc<Dataset>,
    pub report: LoadReport,
    pub generation: u64,
}

#[derive(Debug)]
struct DatasetEntry {
    fingerprint: FileFingerprint,
    loaded: LoadedDataset,
}

/// Datasets keyed by path, reloaded when the file's size or modification
/// time changes.
#[derive(Debug, Default)]
pub struct DatasetCache {
    entries: HashMap<PathBuf, DatasetEntry>,
    generation: u64,
}

impl DatasetCache {
    pub fn get_or_load(&mut self, path: &Path) -> Result<LoadedDataset> {
        let fingerprint = FileFingerprint::of(path)?;
        if let Some(entry) = self.entries.get(path) {
            if entry.fingerprint == fingerprint {
                log::debug!("Dataset cache hit for {}", path.display());
                return Ok(entry.loaded.clone());
            }
            log::info!("{} changed on disk, reloading", path.display());
        }

        let (dataset, report) = load_observations(path)?;
        self.generation += 1;
        let loaded = LoadedDataset {
            dataset: Arc::new(dataset),
            report,
            generation: self.generation,
        };
        self.entries.insert(
            path.to_path_buf(),
            DatasetEntry {
                fingerprint,
                loaded: loaded.clone(),
            },
        );
        Ok(loaded)
    }

    pub fn invalidate(&mut self, path: &Path) {
        self.entries.remove(path);
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Identity of a fitted model: where, how flexible, and on which load of
/// the data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub location: String,
    changepoint_prior_scale_bits: u64,
    pub generation: u64,
}

impl ModelKey {
    pub fn new(location: &str, changepoint_prior_scale: f64, generation: u64) -> Self {
        Self {
            location: location.to_string(),
            changepoint_prior_scale_bits: changepoint_prior_scale.to_bits(),
            generation,
        }
    }
}

pub type ModelCache = KeyedCache<ModelKey, TrainedForecast>;

impl ModelCache {
    /// Drop every model fitted on an older load of the data.
    pub fn evict_stale(&mut self, generation: u64) {
        self.retain(|k| k.generation == generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DashboardError;
    use std::io::Write;

    #[test]
    fn keyed_cache_computes_once() {
        let mut cache: KeyedCache<&str, u32> = KeyedCache::default();
        let mut calls = 0;
        for _ in 0..3 {
            let v = cache
                .get_or_try_insert_with("a", || {
                    calls += 1;
                    Ok(7)
                })
                .unwrap();
            assert_eq!(*v, 7);
        }
        assert_eq!(calls, 1);
        cache.invalidate();
        assert!(cache.is_empty());
    }

    #[test]
    fn keyed_cache_does_not_store_failures() {
        let mut cache: KeyedCache<u8, u8> = KeyedCache::default();
        let err = cache.get_or_try_insert_with(1, || Err(DashboardError::backend("boom")));
        assert!(err.is_err());
        assert!(cache.get(&1).is_none());
    }

    #[test]
    fn model_keys_distinguish_scale_and_generation() {
        assert_eq!(ModelKey::new("India", 0.05, 1), ModelKey::new("India", 0.05, 1));
        assert_ne!(ModelKey::new("India", 0.05, 1), ModelKey::new("India", 0.5, 1));
        assert_ne!(ModelKey::new("India", 0.05, 1), ModelKey::new("India", 0.05, 2));
    }

    #[test]
    fn dataset_cache_reloads_when_file_changes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "location,date,total_cases").unwrap();
        writeln!(file, "Peru,2021-01-01,1").unwrap();
        file.flush().unwrap();

        let mut cache = DatasetCache::default();
        let first = cache.get_or_load(file.path()).unwrap();
        let again = cache.get_or_load(file.path()).unwrap();
        assert_eq!(first.generation, again.generation);
        assert!(Arc::ptr_eq(&first.dataset, &again.dataset));

        // Appending changes the length, which is enough to detect.
        writeln!(file, "Peru,2021-01-02,2").unwrap();
        file.flush().unwrap();
        let reloaded = cache.get_or_load(file.path()).unwrap();
        assert_eq!(reloaded.dataset.row_count(), 2);
        assert!(reloaded.generation > first.generation);

        cache.invalidate(file.path());
        let fresh = cache.get_or_load(file.path()).unwrap();
        assert!(fresh.generation > reloaded.generation);
    }
}
