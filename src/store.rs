//! Persistence of per-variant results, keyed by variant tag.
//!
//! A stored variant is never recomputed, which makes a sweep resumable. The JSON store keeps its files under a
//! directory named after the configuration fingerprint, so results computed with different settings never mix.
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::sweep::VariantResults;

/// The number of hex digits of the configuration fingerprint naming the store directory.
pub const FINGERPRINT_PREFIX_LEN: usize = 16;

/// A write-once collection of variant results.
pub trait ResultStore: Sync {
    /// Returns true if the results of the variant are stored.
    fn contains(&self, tag: &str) -> bool;

    /// Returns the stored results of the variant.
    fn load(&self, tag: &str) -> Result<VariantResults, AnalysisError>;

    /// Store the results of a variant, replacing any previous ones.
    fn save(&self, results: &VariantResults) -> Result<(), AnalysisError>;
}

/// A store keeping one JSON file per variant, at `<root>/<fingerprint prefix>/<tag>.json`.
#[derive(Debug, Clone)]
pub struct JsonResultStore {
    dir: PathBuf,
}

impl JsonResultStore {
    /// Open (or create) the store of the configuration under the root directory.
    /// The configuration itself is saved alongside the results.
    pub fn new<P: AsRef<Path>>(root: P, config: &AnalysisConfig) -> Result<Self, AnalysisError> {
        let fingerprint = config.fingerprint()?;
        let dir = root.as_ref().join(&fingerprint[..FINGERPRINT_PREFIX_LEN]);
        fs::create_dir_all(&dir).map_err(|e| AnalysisError::IOError(e.to_string()))?;

        let config_path = dir.join("config.json");
        if !config_path.exists() {
            config.save_to(&config_path)?;
        }
        log::debug!("Result store opened at {}", dir.display());
        Ok(JsonResultStore { dir })
    }

    /// Returns the directory holding the results.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of the result file of the variant.
    pub fn path(&self, tag: &str) -> PathBuf {
        self.dir.join(format!("{}.json", tag))
    }
}

impl ResultStore for JsonResultStore {
    fn contains(&self, tag: &str) -> bool {
        self.path(tag).is_file()
    }

    fn load(&self, tag: &str) -> Result<VariantResults, AnalysisError> {
        let file = File::open(self.path(tag)).map_err(|e| AnalysisError::IOError(e.to_string()))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| AnalysisError::IOError(e.to_string()))
    }

    fn save(&self, results: &VariantResults) -> Result<(), AnalysisError> {
        // Written aside then renamed, so that an interrupted write never looks like stored results
        let tmp_path = self.dir.join(format!("{}.json.tmp", results.tag));
        let file = File::create(&tmp_path).map_err(|e| AnalysisError::IOError(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, results)
            .map_err(|e| AnalysisError::IOError(e.to_string()))?;
        writer.flush().map_err(|e| AnalysisError::IOError(e.to_string()))?;
        drop(writer);
        fs::rename(&tmp_path, self.path(&results.tag)).map_err(|e| AnalysisError::IOError(e.to_string()))
    }
}

/// An in-memory store.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    results: Mutex<BTreeMap<String, VariantResults>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored variants.
    pub fn len(&self) -> usize {
        self.results.lock().map(|results| results.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultStore for MemoryResultStore {
    fn contains(&self, tag: &str) -> bool {
        self.results
            .lock()
            .map(|results| results.contains_key(tag))
            .unwrap_or(false)
    }

    fn load(&self, tag: &str) -> Result<VariantResults, AnalysisError> {
        let results = self
            .results
            .lock()
            .map_err(|e| AnalysisError::IOError(e.to_string()))?;
        results
            .get(tag)
            .cloned()
            .ok_or_else(|| AnalysisError::IOError(format!("No stored results for variant {}", tag)))
    }

    fn save(&self, results: &VariantResults) -> Result<(), AnalysisError> {
        let mut stored = self
            .results
            .lock()
            .map_err(|e| AnalysisError::IOError(e.to_string()))?;
        stored.insert(results.tag.clone(), results.clone());
        Ok(())
    }
}
