//! Transient in-process similarity index
//!
//! Owns the canonical record map and derives a dense embedding matrix
//! from it. Any mutation marks the matrix stale; the rebuild happens
//! lazily under the write lock at the next search, so a search can never
//! observe a partially rebuilt matrix.

use super::{
    sort_hits, validate_record_dimension, validate_search_args, IssueRecord, Neighbor,
    SimilarityIndex,
};
use crate::embed::normalize_embedding;
use crate::error::Result;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tracing::debug;

struct MemoryState {
    records: HashMap<String, IssueRecord>,
    /// Row i of `matrix` holds the embedding of `keys[i]`. The two are
    /// rebuilt together and never updated independently.
    keys: Vec<String>,
    matrix: Vec<f32>,
    dirty: bool,
}

impl MemoryState {
    fn rebuild(&mut self, dimension: usize) {
        // Keys are materialized in sorted order so the matrix layout is
        // deterministic across rebuilds.
        let mut keys: Vec<String> = self.records.keys().cloned().collect();
        keys.sort();

        let mut matrix = Vec::with_capacity(keys.len() * dimension);
        for key in &keys {
            matrix.extend_from_slice(&self.records[key].embedding);
        }

        debug!("Rebuilt dense matrix: {} rows", keys.len());
        self.keys = keys;
        self.matrix = matrix;
        self.dirty = false;
    }
}

/// In-memory similarity index with exact cosine search
pub struct MemoryIndex {
    dimension: usize,
    state: RwLock<MemoryState>,
}

impl MemoryIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            state: RwLock::new(MemoryState {
                records: HashMap::new(),
                keys: Vec::new(),
                matrix: Vec::new(),
                dirty: true,
            }),
        }
    }

    /// Populate the index from previously stored records, e.g. metadata
    /// loaded at startup. Invalid-dimension records are rejected.
    pub fn hydrate(&self, records: Vec<IssueRecord>) -> Result<usize> {
        let mut count = 0;
        for record in records {
            validate_record_dimension(self.dimension, &record)?;
            let mut state = self.state.write().expect("index lock poisoned");
            state.records.insert(record.issue_key.clone(), record);
            state.dirty = true;
            count += 1;
        }
        Ok(count)
    }

    /// Issue counts per epic key
    pub fn epic_counts(&self) -> HashMap<String, usize> {
        let state = self.state.read().expect("index lock poisoned");
        let mut counts = HashMap::new();
        for record in state.records.values() {
            if let Some(epic) = &record.epic_key {
                *counts.entry(epic.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Usage counts per label
    pub fn label_counts(&self) -> HashMap<String, usize> {
        let state = self.state.read().expect("index lock poisoned");
        let mut counts = HashMap::new();
        for record in state.records.values() {
            for label in &record.labels {
                *counts.entry(label.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Usage counts per component
    pub fn component_counts(&self) -> HashMap<String, usize> {
        let state = self.state.read().expect("index lock poisoned");
        let mut counts = HashMap::new();
        for record in state.records.values() {
            for component in &record.components {
                *counts.entry(component.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// All records referencing an epic
    pub fn records_in_epic(&self, epic_key: &str) -> Vec<IssueRecord> {
        let state = self.state.read().expect("index lock poisoned");
        state
            .records
            .values()
            .filter(|r| r.epic_key.as_deref() == Some(epic_key))
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl SimilarityIndex for MemoryIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, mut record: IssueRecord) -> Result<()> {
        validate_record_dimension(self.dimension, &record)?;
        record.embedding = normalize_embedding(&record.embedding);
        record.updated_at = Utc::now().to_rfc3339();

        let mut state = self.state.write().expect("index lock poisoned");
        state.records.insert(record.issue_key.clone(), record);
        state.dirty = true;
        Ok(())
    }

    async fn get(&self, issue_key: &str) -> Result<Option<IssueRecord>> {
        let state = self.state.read().expect("index lock poisoned");
        Ok(state.records.get(issue_key).cloned())
    }

    async fn delete(&self, issue_key: &str) -> Result<bool> {
        let mut state = self.state.write().expect("index lock poisoned");
        let existed = state.records.remove(issue_key).is_some();
        if existed {
            state.dirty = true;
        }
        Ok(existed)
    }

    async fn all(&self) -> Result<Vec<IssueRecord>> {
        let state = self.state.read().expect("index lock poisoned");
        Ok(state.records.values().cloned().collect())
    }

    async fn count(&self) -> Result<usize> {
        let state = self.state.read().expect("index lock poisoned");
        Ok(state.records.len())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        exclude: &HashSet<String>,
    ) -> Result<Vec<Neighbor>> {
        validate_search_args(self.dimension, query, k)?;

        // Write lock: the stale check and rebuild must be atomic with
        // the scan.
        let mut state = self.state.write().expect("index lock poisoned");
        if state.dirty {
            state.rebuild(self.dimension);
        }

        if state.keys.is_empty() {
            return Ok(Vec::new());
        }

        let query = normalize_embedding(query);

        let mut hits: Vec<(String, f32)> = Vec::with_capacity(state.keys.len());
        for (i, key) in state.keys.iter().enumerate() {
            if exclude.contains(key) {
                continue;
            }
            let row = &state.matrix[i * self.dimension..(i + 1) * self.dimension];
            let score: f32 = row.iter().zip(query.iter()).map(|(a, b)| a * b).sum();
            hits.push((key.clone(), score));
        }

        sort_hits(&mut hits);
        hits.truncate(k);

        Ok(hits
            .into_iter()
            .map(|(key, score)| Neighbor {
                record: state.records[&key].clone(),
                score,
            })
            .collect())
    }
}
