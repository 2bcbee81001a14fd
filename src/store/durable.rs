//! Durable similarity index
//!
//! Metadata (including the serialized embedding) lives in sqlite; the
//! searchable dense structure is persisted as a snapshot file. Writes go
//! metadata-first, then the in-process index, then the snapshot file
//! (write-through), so the snapshot is never ahead of the metadata
//! store. A crash between the two writes leaves the snapshot at most one
//! entry behind; reopening reconciles the gap from the metadata blobs.
//!
//! Search results resolve to metadata rows by key, never by row offset,
//! so deletes and in-place updates cannot shift results onto the wrong
//! ticket.

use super::{
    sort_hits, validate_record_dimension, validate_search_args, DenseIndex, IssueRecord, Neighbor,
    SimilarityIndex,
};
use crate::embed::normalize_embedding;
use crate::error::{Error, Result};
use crate::meta::IssueDb;
use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub struct DurableIndex {
    db: IssueDb,
    dimension: usize,
    snapshot_path: PathBuf,
    /// Guards the metadata-then-snapshot write pair as one critical
    /// section per write; searches share the read side.
    dense: RwLock<DenseIndex>,
}

impl DurableIndex {
    /// Open the index: load the snapshot if present, otherwise start
    /// empty, then backfill any metadata rows the snapshot is missing.
    pub async fn open(db: IssueDb, dimension: usize, snapshot_path: PathBuf) -> Result<Self> {
        let dense = match DenseIndex::load(&snapshot_path)? {
            Some(loaded) => {
                if loaded.dimension() != dimension {
                    return Err(Error::Snapshot(format!(
                        "Snapshot dimension {} does not match configured dimension {}",
                        loaded.dimension(),
                        dimension
                    )));
                }
                loaded
            }
            None => DenseIndex::new(dimension),
        };

        let index = Self {
            db,
            dimension,
            snapshot_path,
            dense: RwLock::new(dense),
        };
        index.reconcile().await?;
        Ok(index)
    }

    /// Backfill snapshot entries from metadata rows, and drop snapshot
    /// entries whose metadata row is gone. Covers the crash window
    /// between the metadata write and the snapshot write.
    async fn reconcile(&self) -> Result<()> {
        let records = self.db.all_issues().await?;
        let mut dense = self.dense.write().await;

        let mut changed = false;
        let known: HashSet<&str> = records.iter().map(|r| r.issue_key.as_str()).collect();

        let stale: Vec<String> = dense
            .iter()
            .map(|(key, _)| key.to_string())
            .filter(|key| !known.contains(key.as_str()))
            .collect();
        for key in stale {
            dense.remove(&key);
            changed = true;
        }

        for record in records {
            if !dense.contains(&record.issue_key) {
                validate_record_dimension(self.dimension, &record)?;
                dense.upsert(&record.issue_key, record.embedding)?;
                changed = true;
            }
        }

        if changed {
            info!(
                "Reconciled index snapshot with metadata: {} entries",
                dense.len()
            );
            dense.save(&self.snapshot_path)?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SimilarityIndex for DurableIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, mut record: IssueRecord) -> Result<()> {
        validate_record_dimension(self.dimension, &record)?;
        record.embedding = normalize_embedding(&record.embedding);
        record.updated_at = Utc::now().to_rfc3339();

        let mut dense = self.dense.write().await;
        // Metadata first: the snapshot must never get ahead of it.
        self.db.upsert_issue(&record).await?;
        dense.upsert(&record.issue_key, record.embedding.clone())?;
        dense.save(&self.snapshot_path)?;
        debug!("Indexed {}", record.issue_key);
        Ok(())
    }

    async fn get(&self, issue_key: &str) -> Result<Option<IssueRecord>> {
        self.db.get_issue(issue_key).await
    }

    async fn delete(&self, issue_key: &str) -> Result<bool> {
        let mut dense = self.dense.write().await;
        let existed = self.db.delete_issue(issue_key).await?;
        if dense.remove(issue_key) || existed {
            dense.save(&self.snapshot_path)?;
        }
        Ok(existed)
    }

    async fn all(&self) -> Result<Vec<IssueRecord>> {
        self.db.all_issues().await
    }

    async fn count(&self) -> Result<usize> {
        self.db.count_issues().await
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        exclude: &HashSet<String>,
    ) -> Result<Vec<Neighbor>> {
        validate_search_args(self.dimension, query, k)?;

        let query = normalize_embedding(query);

        let mut hits: Vec<(String, f32)> = {
            let dense = self.dense.read().await;
            dense
                .iter()
                .filter(|(key, _)| !exclude.contains(*key))
                .map(|(key, vector)| {
                    let distance: f32 = vector
                        .iter()
                        .zip(query.iter())
                        .map(|(a, b)| (a - b) * (a - b))
                        .sum();
                    // Squared-L2 mapped to a similarity-like score; not
                    // numerically comparable with the cosine backend.
                    (key.to_string(), 1.0 / (1.0 + distance))
                })
                .collect()
        };

        sort_hits(&mut hits);
        hits.truncate(k);

        let mut neighbors = Vec::with_capacity(hits.len());
        for (key, score) in hits {
            match self.db.get_issue(&key).await? {
                Some(record) => neighbors.push(Neighbor { record, score }),
                // Metadata row vanished between scan and fetch; skip
                // rather than fabricate a hit.
                None => debug!("No metadata row for indexed key {}", key),
            }
        }
        Ok(neighbors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::record;
    use tempfile::TempDir;

    async fn open_index(tmp: &TempDir, dimension: usize) -> DurableIndex {
        let db = IssueDb::new(&tmp.path().join("test.db")).await.unwrap();
        DurableIndex::open(db, dimension, tmp.path().join("index.json"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_empty_search() {
        let tmp = TempDir::new().unwrap();
        let index = open_index(&tmp, 2).await;
        let hits = index.search(&[1.0, 0.0], 5, &HashSet::new()).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_search_orders_by_closeness() {
        let tmp = TempDir::new().unwrap();
        let index = open_index(&tmp, 2).await;

        index.upsert(record("PROJ-1", vec![1.0, 0.0])).await.unwrap();
        index.upsert(record("PROJ-2", vec![0.0, 1.0])).await.unwrap();
        index.upsert(record("PROJ-3", vec![0.9, 0.1])).await.unwrap();

        let hits = index.search(&[1.0, 0.0], 2, &HashSet::new()).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.issue_key, "PROJ-1");
        assert_eq!(hits[1].record.issue_key, "PROJ-3");
        assert!(hits[0].score > hits[1].score);
        // Identical vectors map to distance 0, score 1
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_exclude_keys() {
        let tmp = TempDir::new().unwrap();
        let index = open_index(&tmp, 2).await;

        index.upsert(record("PROJ-1", vec![1.0, 0.0])).await.unwrap();
        index.upsert(record("PROJ-2", vec![0.9, 0.1])).await.unwrap();

        let exclude: HashSet<String> = ["PROJ-1".to_string()].into();
        let hits = index.search(&[1.0, 0.0], 5, &exclude).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.issue_key, "PROJ-2");
    }

    #[tokio::test]
    async fn test_restart_preserves_index() {
        let tmp = TempDir::new().unwrap();
        {
            let index = open_index(&tmp, 2).await;
            index.upsert(record("PROJ-1", vec![1.0, 0.0])).await.unwrap();
            index.upsert(record("PROJ-2", vec![0.0, 1.0])).await.unwrap();
        }

        let reopened = open_index(&tmp, 2).await;
        assert_eq!(reopened.count().await.unwrap(), 2);
        let hits = reopened
            .search(&[1.0, 0.0], 1, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(hits[0].record.issue_key, "PROJ-1");
    }

    #[tokio::test]
    async fn test_delete_survives_restart() {
        let tmp = TempDir::new().unwrap();
        {
            let index = open_index(&tmp, 2).await;
            index.upsert(record("PROJ-1", vec![1.0, 0.0])).await.unwrap();
            index.upsert(record("PROJ-2", vec![0.0, 1.0])).await.unwrap();
            assert!(index.delete("PROJ-1").await.unwrap());
        }

        let reopened = open_index(&tmp, 2).await;
        let hits = reopened
            .search(&[1.0, 0.0], 5, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.issue_key, "PROJ-2");
    }

    #[tokio::test]
    async fn test_reupsert_does_not_duplicate() {
        let tmp = TempDir::new().unwrap();
        let index = open_index(&tmp, 2).await;

        index.upsert(record("PROJ-1", vec![1.0, 0.0])).await.unwrap();
        index.upsert(record("PROJ-1", vec![0.0, 1.0])).await.unwrap();

        let hits = index
            .search(&[0.0, 1.0], 10, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_reconcile_backfills_missing_snapshot_entry() {
        let tmp = TempDir::new().unwrap();
        let db = IssueDb::new(&tmp.path().join("test.db")).await.unwrap();

        // Simulate a crash after the metadata write: row exists, the
        // snapshot never saw it.
        let mut rec = record("PROJ-1", vec![1.0, 0.0]);
        rec.embedding = normalize_embedding(&rec.embedding);
        db.upsert_issue(&rec).await.unwrap();

        let index = DurableIndex::open(db, 2, tmp.path().join("index.json"))
            .await
            .unwrap();
        let hits = index.search(&[1.0, 0.0], 5, &HashSet::new()).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.issue_key, "PROJ-1");
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let tmp = TempDir::new().unwrap();
        let index = open_index(&tmp, 3).await;
        assert!(index.upsert(record("PROJ-1", vec![1.0, 0.0])).await.is_err());
        assert!(index
            .search(&[1.0, 0.0], 1, &HashSet::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_snapshot_dimension_mismatch_on_open() {
        let tmp = TempDir::new().unwrap();
        {
            let index = open_index(&tmp, 2).await;
            index.upsert(record("PROJ-1", vec![1.0, 0.0])).await.unwrap();
        }

        let db = IssueDb::new(&tmp.path().join("test.db")).await.unwrap();
        let err = DurableIndex::open(db, 5, tmp.path().join("index.json")).await;
        assert!(matches!(err, Err(Error::Snapshot(_))));
    }
}
