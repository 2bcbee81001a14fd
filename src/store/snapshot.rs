//! Serialized dense-index snapshot
//!
//! The durable backend persists its searchable structure as a single
//! file holding the dimension, a key list, and the vectors in the same
//! order. Keys travel with the vectors so lookups resolve by key, never
//! by row offset; rows can therefore be replaced and removed without
//! drifting out of step with the metadata store.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Key-parallel dense vector index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseIndex {
    dimension: usize,
    keys: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

impl DenseIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            keys: Vec::new(),
            vectors: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }

    /// Insert or replace the vector stored for `key`
    pub fn upsert(&mut self, key: &str, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        match self.keys.iter().position(|k| k == key) {
            Some(i) => self.vectors[i] = vector,
            None => {
                self.keys.push(key.to_string());
                self.vectors.push(vector);
            }
        }
        Ok(())
    }

    /// Remove the entry for `key`; both parallel lists shrink together
    pub fn remove(&mut self, key: &str) -> bool {
        match self.keys.iter().position(|k| k == key) {
            Some(i) => {
                self.keys.remove(i);
                self.vectors.remove(i);
                true
            }
            None => false,
        }
    }

    /// Iterate `(key, vector)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.keys
            .iter()
            .map(String::as_str)
            .zip(self.vectors.iter().map(Vec::as_slice))
    }

    /// Load a snapshot from disk; `Ok(None)` when no file exists yet
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let index: DenseIndex = serde_json::from_str(&content)
            .map_err(|e| Error::Snapshot(format!("Corrupt snapshot {}: {}", path.display(), e)))?;
        if index.keys.len() != index.vectors.len() {
            return Err(Error::Snapshot(format!(
                "Corrupt snapshot {}: {} keys vs {} vectors",
                path.display(),
                index.keys.len(),
                index.vectors.len()
            )));
        }
        debug!("Loaded index snapshot: {} entries", index.len());
        Ok(Some(index))
    }

    /// Serialize the whole index to disk. The write goes to a temp file
    /// first and is renamed into place, so readers never see a torn file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string(self)?;
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        debug!("Saved index snapshot: {} entries", self.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut index = DenseIndex::new(2);
        index.upsert("A", vec![1.0, 0.0]).unwrap();
        index.upsert("B", vec![0.0, 1.0]).unwrap();
        index.upsert("A", vec![0.5, 0.5]).unwrap();

        assert_eq!(index.len(), 2);
        let entries: Vec<_> = index.iter().collect();
        assert_eq!(entries[0], ("A", &[0.5, 0.5][..]));
    }

    #[test]
    fn test_remove_keeps_lists_parallel() {
        let mut index = DenseIndex::new(2);
        index.upsert("A", vec![1.0, 0.0]).unwrap();
        index.upsert("B", vec![0.0, 1.0]).unwrap();
        index.upsert("C", vec![0.7, 0.7]).unwrap();

        assert!(index.remove("B"));
        assert!(!index.remove("B"));
        assert_eq!(index.len(), 2);
        let entries: Vec<_> = index.iter().collect();
        assert_eq!(entries[0].0, "A");
        assert_eq!(entries[1], ("C", &[0.7, 0.7][..]));
    }

    #[test]
    fn test_dimension_enforced() {
        let mut index = DenseIndex::new(3);
        assert!(index.upsert("A", vec![1.0]).is_err());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.json");

        let mut index = DenseIndex::new(2);
        index.upsert("A", vec![0.6, 0.8]).unwrap();
        index.save(&path).unwrap();

        let loaded = DenseIndex::load(&path).unwrap().unwrap();
        assert_eq!(loaded.dimension(), 2);
        assert_eq!(loaded.len(), 1);
        let entries: Vec<_> = loaded.iter().collect();
        assert_eq!(entries[0], ("A", &[0.6, 0.8][..]));
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let tmp = TempDir::new().unwrap();
        assert!(DenseIndex::load(&tmp.path().join("nope.json"))
            .unwrap()
            .is_none());
    }
}
