use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use tempfile::Builder;
use tracing::{info, warn};

use crate::domain::ResolutionResult;
use crate::error::KiraError;

pub type CacheMap = BTreeMap<String, ResolutionResult>;

/// Flat JSON file of accession → result, read once and rewritten in full.
///
/// There is no locking: one process owns a cache file at a time.
#[derive(Debug, Clone)]
pub struct CacheStore {
    path: Utf8PathBuf,
    entries: CacheMap,
}

impl CacheStore {
    /// Loads `path`; a missing or unreadable file starts an empty cache.
    pub fn load(path: impl Into<Utf8PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(path.as_std_path()) {
            Ok(content) => match serde_json::from_str::<CacheMap>(&content) {
                Ok(entries) => {
                    info!(path = %path, count = entries.len(), "loaded cache");
                    entries
                }
                Err(err) => {
                    warn!(path = %path, error = %err, "cache file is corrupt; starting empty");
                    CacheMap::new()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => CacheMap::new(),
            Err(err) => {
                warn!(path = %path, error = %err, "cache file unreadable; starting empty");
                CacheMap::new()
            }
        };
        Self { path, entries }
    }

    /// `~/.cache/kira-accession-resolver/cache.json`
    pub fn default_path() -> Result<Utf8PathBuf, KiraError> {
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.home_dir()
                        .join(".cache")
                        .join("kira-accession-resolver")
                        .join("cache.json"),
                )
                .ok()
            })
            .ok_or_else(|| KiraError::Cache("unable to resolve cache directory".to_string()))
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn get(&self, accession: &str) -> Option<&ResolutionResult> {
        self.entries.get(accession)
    }

    pub fn entries(&self) -> &CacheMap {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unions `new_results` into the loaded entries (new wins) and rewrites the file.
    pub fn merge_and_save(&mut self, new_results: &CacheMap) -> Result<(), KiraError> {
        for (accession, result) in new_results {
            self.entries.insert(accession.clone(), result.clone());
        }
        self.save()
    }

    fn save(&self) -> Result<(), KiraError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
            _ => Utf8PathBuf::from("."),
        };
        fs::create_dir_all(parent.as_std_path()).map_err(|err| KiraError::Cache(err.to_string()))?;

        let content = serde_json::to_vec_pretty(&self.entries)
            .map_err(|err| KiraError::Cache(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("kira-resolver-cache")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| KiraError::Cache(err.to_string()))?;
        temp.write_all(&content)
            .map_err(|err| KiraError::Cache(err.to_string()))?;
        temp.write_all(b"\n")
            .map_err(|err| KiraError::Cache(err.to_string()))?;
        temp.persist(self.path.as_std_path())
            .map_err(|err| KiraError::Cache(err.to_string()))?;
        info!(path = %self.path, count = self.entries.len(), "saved cache");
        Ok(())
    }
}
