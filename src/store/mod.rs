//! Similarity index over ticket records
//!
//! Two backends implement the same contract:
//! - [`MemoryIndex`]: in-process record store with a lazily rebuilt dense
//!   matrix, exact cosine search
//! - [`DurableIndex`]: sqlite-backed metadata plus an on-disk snapshot of
//!   the dense index, squared-L2 search
//!
//! Scores are comparable within one backend only; both orderings increase
//! with closeness.

mod durable;
mod memory;
mod snapshot;

pub use durable::DurableIndex;
pub use memory::MemoryIndex;
pub use snapshot::DenseIndex;

use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// An indexed ticket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRecord {
    pub issue_key: String,
    pub project_key: String,
    pub summary: String,
    pub description: Option<String>,
    pub preprocessed_text: String,
    pub content_hash: String,
    pub embedding: Vec<f32>,
    pub epic_key: Option<String>,
    pub labels: Vec<String>,
    pub components: Vec<String>,
    pub issue_type: Option<String>,
    pub status: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl IssueRecord {
    /// Build a record from its core fields. The project key is derived
    /// from the issue key prefix; timestamps are set to now and the
    /// content hash computed from the preprocessed text.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        issue_key: String,
        summary: String,
        description: Option<String>,
        preprocessed_text: String,
        embedding: Vec<f32>,
        epic_key: Option<String>,
        labels: Vec<String>,
        components: Vec<String>,
        issue_type: Option<String>,
        status: Option<String>,
    ) -> Self {
        let now = Utc::now().to_rfc3339();
        let project_key = project_key_of(&issue_key);
        let content_hash = crate::text::content_hash(&preprocessed_text);
        Self {
            issue_key,
            project_key,
            summary,
            description,
            preprocessed_text,
            content_hash,
            embedding,
            epic_key,
            labels,
            components,
            issue_type,
            status,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// Derive the project key from an issue key (`PROJ-123` -> `PROJ`)
pub fn project_key_of(issue_key: &str) -> String {
    issue_key
        .split_once('-')
        .map(|(prefix, _)| prefix)
        .unwrap_or(issue_key)
        .to_string()
}

/// A search hit: a stored record paired with its similarity to the query
#[derive(Debug, Clone, Serialize)]
pub struct Neighbor {
    pub record: IssueRecord,
    pub score: f32,
}

/// Contract shared by the index backends.
///
/// `search` returns neighbors sorted by non-increasing score; exact ties
/// are broken by `issue_key` ascending, so result order is deterministic
/// regardless of insertion order.
#[async_trait::async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Embedding dimension every stored and queried vector must match
    fn dimension(&self) -> usize;

    /// Insert or fully replace the record at its issue key
    async fn upsert(&self, record: IssueRecord) -> Result<()>;

    /// Fetch a record by key
    async fn get(&self, issue_key: &str) -> Result<Option<IssueRecord>>;

    /// Remove a record; returns whether it existed
    async fn delete(&self, issue_key: &str) -> Result<bool>;

    /// Snapshot of all stored records
    async fn all(&self) -> Result<Vec<IssueRecord>>;

    /// Number of stored records
    async fn count(&self) -> Result<usize>;

    /// Nearest neighbors of `query`, at most `k`, skipping `exclude` keys
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        exclude: &HashSet<String>,
    ) -> Result<Vec<Neighbor>>;
}

/// Validate search arguments shared by both backends
pub(crate) fn validate_search_args(dimension: usize, query: &[f32], k: usize) -> Result<()> {
    if k < 1 {
        return Err(Error::InvalidArgument(format!(
            "k must be at least 1, got {}",
            k
        )));
    }
    if query.len() != dimension {
        return Err(Error::DimensionMismatch {
            expected: dimension,
            actual: query.len(),
        });
    }
    Ok(())
}

/// Validate a record's embedding against the index dimension
pub(crate) fn validate_record_dimension(dimension: usize, record: &IssueRecord) -> Result<()> {
    if record.embedding.len() != dimension {
        return Err(Error::DimensionMismatch {
            expected: dimension,
            actual: record.embedding.len(),
        });
    }
    Ok(())
}

/// Sort scored hits by score descending, ties by key ascending
pub(crate) fn sort_hits(hits: &mut [(String, f32)]) {
    hits.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::IssueRecord;

    /// Minimal record for index tests
    pub fn record(key: &str, embedding: Vec<f32>) -> IssueRecord {
        IssueRecord::new(
            key.to_string(),
            format!("summary for {}", key),
            None,
            format!("text for {}", key),
            embedding,
            None,
            Vec::new(),
            Vec::new(),
            None,
            None,
        )
    }

    /// Record with suggestion-relevant metadata
    pub fn record_with_meta(
        key: &str,
        embedding: Vec<f32>,
        epic: Option<&str>,
        labels: &[&str],
        components: &[&str],
    ) -> IssueRecord {
        let mut rec = record(key, embedding);
        rec.epic_key = epic.map(String::from);
        rec.labels = labels.iter().map(|s| s.to_string()).collect();
        rec.components = components.iter().map(|s| s.to_string()).collect();
        rec
    }
}
