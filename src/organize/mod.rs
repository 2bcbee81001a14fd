//! Organization pipeline
//!
//! Composes the tracker client, preprocessing, embedding, the similarity
//! index, the suggestion aggregator, and the event ledger to answer
//! "organize this ticket". All collaborators are injected at
//! construction; commands and tests build their own instances.

use crate::config::SuggestConfig;
use crate::embed::{embed_one, Embedder};
use crate::error::{Error, Result};
use crate::meta::EventLedger;
use crate::store::{IssueRecord, Neighbor, SimilarityIndex};
use crate::suggest::{suggest_components, suggest_epic, suggest_labels, EpicSuggestion};
use crate::text;
use crate::tracker::{IssueFieldUpdate, RawIssue, TrackerClient};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A similar issue in an organization result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarIssue {
    pub issue_key: String,
    pub summary: String,
    pub similarity_score: f32,
    pub epic_key: Option<String>,
    pub labels: Vec<String>,
    pub components: Vec<String>,
}

impl From<&Neighbor> for SimilarIssue {
    fn from(neighbor: &Neighbor) -> Self {
        Self {
            issue_key: neighbor.record.issue_key.clone(),
            summary: neighbor.record.summary.clone(),
            similarity_score: neighbor.score,
            epic_key: neighbor.record.epic_key.clone(),
            labels: neighbor.record.labels.clone(),
            components: neighbor.record.components.clone(),
        }
    }
}

/// Result of organizing one ticket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationResult {
    pub issue_key: String,
    pub similar_issues: Vec<SimilarIssue>,
    pub suggested_epic: EpicSuggestion,
    pub suggested_labels: Vec<String>,
    pub suggested_components: Vec<String>,
}

/// Outcome of one indexed ticket
#[derive(Debug, Clone)]
pub struct IndexedIssue {
    pub record: IssueRecord,
    /// True when the text was unchanged and the stored embedding was
    /// reused instead of calling the embedding backend
    pub reused_embedding: bool,
}

/// Bulk sync statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStats {
    pub fetched: usize,
    pub indexed: usize,
    pub reused: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Outcome of an external event delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOutcome {
    /// Event was handled and recorded in the ledger
    Processed,
    /// Event id was already in the ledger; nothing done
    Duplicate,
    /// Event type is not one this pipeline reacts to
    Ignored,
}

impl std::fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventOutcome::Processed => write!(f, "processed"),
            EventOutcome::Duplicate => write!(f, "duplicate"),
            EventOutcome::Ignored => write!(f, "ignored"),
        }
    }
}

/// Ranked similar issues for a ticket already present in `index`.
/// Unknown keys are a `NotFound`, not an empty result.
pub async fn search_similar_in_index(
    index: &dyn SimilarityIndex,
    issue_key: &str,
    limit: usize,
) -> Result<Vec<SimilarIssue>> {
    let record = index
        .get(issue_key)
        .await?
        .ok_or_else(|| Error::IssueNotFound(issue_key.to_string()))?;

    let exclude: HashSet<String> = [issue_key.to_string()].into();
    let neighbors = index.search(&record.embedding, limit, &exclude).await?;
    Ok(neighbors.iter().map(SimilarIssue::from).collect())
}

/// The organizer service
pub struct Organizer {
    tracker: TrackerClient,
    embedder: Box<dyn Embedder>,
    index: Arc<dyn SimilarityIndex>,
    ledger: EventLedger,
    suggest: SuggestConfig,
}

impl Organizer {
    pub fn new(
        tracker: TrackerClient,
        embedder: Box<dyn Embedder>,
        index: Arc<dyn SimilarityIndex>,
        ledger: EventLedger,
        suggest: SuggestConfig,
    ) -> Self {
        Self {
            tracker,
            embedder,
            index,
            ledger,
            suggest,
        }
    }

    /// Index a raw tracker issue: preprocess, embed, upsert.
    ///
    /// When the preprocessed text is unchanged since the last indexing,
    /// the stored embedding is reused and only metadata is refreshed.
    pub async fn index_raw_issue(&self, raw: &RawIssue) -> Result<IndexedIssue> {
        let description = raw.description_text();
        let preprocessed = text::issue_text(&raw.fields.summary, &description);
        let hash = text::content_hash(&preprocessed);

        let existing = self.index.get(&raw.key).await?;
        let reused = matches!(&existing, Some(prev) if prev.content_hash == hash);

        let embedding = if let (true, Some(prev)) = (reused, &existing) {
            debug!("Text unchanged for {}, reusing embedding", raw.key);
            prev.embedding.clone()
        } else {
            embed_one(self.embedder.as_ref(), &preprocessed).await?
        };

        let mut record = IssueRecord::new(
            raw.key.clone(),
            raw.fields.summary.clone(),
            (!description.is_empty()).then_some(description),
            preprocessed,
            embedding,
            raw.epic_key(),
            raw.fields.labels.clone(),
            raw.component_names(),
            raw.issue_type_name(),
            raw.status_name(),
        );
        if let Some(prev) = existing {
            record.created_at = prev.created_at;
        }

        self.index.upsert(record.clone()).await?;
        Ok(IndexedIssue {
            record,
            reused_embedding: reused,
        })
    }

    /// Organize one ticket: fetch, index, find neighbors, suggest
    pub async fn organize(&self, issue_key: &str, top_k: usize) -> Result<OrganizationResult> {
        info!("Organizing {}", issue_key);

        let raw = self.tracker.get_issue(issue_key).await?;
        let indexed = self.index_raw_issue(&raw).await?;

        let exclude: HashSet<String> = [issue_key.to_string()].into();
        let neighbors = self
            .index
            .search(&indexed.record.embedding, top_k, &exclude)
            .await?;

        Ok(self.build_result(issue_key, &neighbors))
    }

    fn build_result(&self, issue_key: &str, neighbors: &[Neighbor]) -> OrganizationResult {
        OrganizationResult {
            issue_key: issue_key.to_string(),
            similar_issues: neighbors.iter().map(SimilarIssue::from).collect(),
            suggested_epic: suggest_epic(neighbors),
            suggested_labels: suggest_labels(neighbors, self.suggest.max_labels),
            suggested_components: suggest_components(neighbors, self.suggest.max_components),
        }
    }

    /// Ranked similar issues for an already-indexed ticket
    pub async fn search_similar(&self, issue_key: &str, limit: usize) -> Result<Vec<SimilarIssue>> {
        search_similar_in_index(self.index.as_ref(), issue_key, limit).await
    }

    /// Bulk-index issues from the tracker
    pub async fn sync(&self, max_issues: usize, jql: Option<&str>) -> Result<SyncStats> {
        let response = match jql {
            Some(jql) => self.tracker.search_issues(jql, max_issues).await?,
            None => self.tracker.search_project_recent(max_issues).await?,
        };

        let mut stats = SyncStats {
            fetched: response.issues.len(),
            ..Default::default()
        };

        let bar = crate::progress::add_progress_bar(response.issues.len() as u64);
        for raw in &response.issues {
            match self.index_raw_issue(raw).await {
                Ok(indexed) if indexed.reused_embedding => stats.reused += 1,
                Ok(_) => stats.indexed += 1,
                Err(e) => {
                    let message = format!("{}: {}", raw.key, e);
                    warn!(%message, "Failed to index issue");
                    stats.failed += 1;
                    stats.errors.push(message);
                }
            }
            bar.inc(1);
        }
        bar.finish_and_clear();

        info!(
            "Sync complete: {} indexed, {} reused, {} failed",
            stats.indexed, stats.reused, stats.failed
        );
        Ok(stats)
    }

    /// Handle an externally delivered change notification.
    ///
    /// Delivery is at-least-once; the ledger makes it effectively-once.
    /// The ledger entry is written only after the work succeeded, so a
    /// crash mid-processing lets the redelivery retry instead of being
    /// skipped forever.
    pub async fn handle_event(
        &self,
        event_id: &str,
        event_type: &str,
        issue_key: &str,
    ) -> Result<EventOutcome> {
        if self.ledger.is_processed(event_id).await? {
            debug!("Event {} already processed", event_id);
            return Ok(EventOutcome::Duplicate);
        }

        match event_type {
            "issue_created" | "issue_updated" => {
                let raw = self.tracker.get_issue(issue_key).await?;
                self.index_raw_issue(&raw).await?;
            }
            "issue_deleted" => {
                self.index.delete(issue_key).await?;
            }
            other => {
                debug!("Ignoring event type {}", other);
                return Ok(EventOutcome::Ignored);
            }
        }

        self.ledger
            .mark_processed(event_id, issue_key, event_type)
            .await?;
        Ok(EventOutcome::Processed)
    }

    /// Write accepted suggestions back to the tracker: suggested labels
    /// and components are merged into the existing ones, and the epic
    /// reasoning is left as a comment.
    pub async fn apply_suggestions(
        &self,
        issue_key: &str,
        result: &OrganizationResult,
    ) -> Result<()> {
        let record = self
            .index
            .get(issue_key)
            .await?
            .ok_or_else(|| Error::IssueNotFound(issue_key.to_string()))?;

        let mut labels = record.labels.clone();
        for label in &result.suggested_labels {
            if !labels.contains(label) {
                labels.push(label.clone());
            }
        }
        let mut components = record.components.clone();
        for component in &result.suggested_components {
            if !components.contains(component) {
                components.push(component.clone());
            }
        }

        let update = IssueFieldUpdate::with_labels(labels).components(&components);
        self.tracker.update_issue_fields(issue_key, &update).await?;

        if result.suggested_epic.epic_key.is_some() {
            let comment = format!(
                "triage suggests epic {}: {}",
                result.suggested_epic.epic_key.as_deref().unwrap_or("-"),
                result.suggested_epic.reasoning
            );
            self.tracker.add_comment(issue_key, &comment).await?;
        }

        info!("Applied suggestions to {}", issue_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SuggestConfig, TrackerConfig};
    use crate::meta::IssueDb;
    use crate::store::MemoryIndex;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FakeEmbedder {
        dimension: usize,
        vector: Vec<f32>,
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            self.calls
                .fetch_add(texts.len(), std::sync::atomic::Ordering::SeqCst);
            Ok(texts.iter().map(|_| self.vector.clone()).collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn model_name(&self) -> &str {
            "fake"
        }
    }

    async fn test_organizer(
        server: &MockServer,
        tmp: &TempDir,
        vector: Vec<f32>,
    ) -> (Organizer, Arc<MemoryIndex>, Arc<std::sync::atomic::AtomicUsize>) {
        let tracker_config = TrackerConfig {
            base_url: server.uri(),
            email: "dev@example.com".to_string(),
            api_token_env: "TEST_TOKEN".to_string(),
            project_key: "PROJ".to_string(),
            timeout_secs: 5,
        };
        let tracker = TrackerClient::new(&tracker_config, Some("secret".to_string())).unwrap();
        let db = IssueDb::new(&tmp.path().join("test.db")).await.unwrap();
        let index = Arc::new(MemoryIndex::new(vector.len()));
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let embedder = FakeEmbedder {
            dimension: vector.len(),
            vector,
            calls: calls.clone(),
        };
        let organizer = Organizer::new(
            tracker,
            Box::new(embedder),
            index.clone(),
            db.event_ledger(),
            SuggestConfig::default(),
        );
        (organizer, index, calls)
    }

    fn mock_issue(key: &str, summary: &str) -> serde_json::Value {
        json!({
            "key": key,
            "fields": {
                "summary": summary,
                "description": "details",
                "labels": ["bug"],
                "components": [{"name": "api"}]
            }
        })
    }

    #[tokio::test]
    async fn test_organize_returns_neighbors_and_suggestions() {
        let server = MockServer::start().await;
        let tmp = TempDir::new().unwrap();
        let (organizer, index, _) = test_organizer(&server, &tmp, vec![1.0, 0.0]).await;

        // Seed a close neighbor that carries an epic
        let mut seeded = crate::store::test_support::record("PROJ-9", vec![1.0, 0.0]);
        seeded.epic_key = Some("PROJ-100".to_string());
        seeded.labels = vec!["bug".to_string()];
        index.upsert(seeded).await.unwrap();

        Mock::given(method("GET"))
            .and(path("/rest/api/3/issue/PROJ-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_issue("PROJ-1", "Login")))
            .mount(&server)
            .await;

        let result = organizer.organize("PROJ-1", 5).await.unwrap();
        assert_eq!(result.issue_key, "PROJ-1");
        assert_eq!(result.similar_issues.len(), 1);
        assert_eq!(result.similar_issues[0].issue_key, "PROJ-9");
        assert_eq!(result.suggested_epic.epic_key.as_deref(), Some("PROJ-100"));
        assert_eq!(result.suggested_labels, vec!["bug"]);

        // The organized ticket itself was indexed but excluded from results
        assert_eq!(index.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_search_similar_unknown_key() {
        let server = MockServer::start().await;
        let tmp = TempDir::new().unwrap();
        let (organizer, _, _) = test_organizer(&server, &tmp, vec![1.0, 0.0]).await;

        let err = organizer.search_similar("PROJ-404", 5).await;
        assert!(matches!(err, Err(Error::IssueNotFound(_))));
    }

    #[tokio::test]
    async fn test_reindex_unchanged_text_skips_embedding() {
        let server = MockServer::start().await;
        let tmp = TempDir::new().unwrap();
        let (organizer, _, embed_calls) = test_organizer(&server, &tmp, vec![1.0, 0.0]).await;

        Mock::given(method("GET"))
            .and(path("/rest/api/3/issue/PROJ-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_issue("PROJ-1", "Login")))
            .mount(&server)
            .await;

        let raw = organizer.tracker.get_issue("PROJ-1").await.unwrap();
        let first = organizer.index_raw_issue(&raw).await.unwrap();
        assert!(!first.reused_embedding);
        let second = organizer.index_raw_issue(&raw).await.unwrap();
        assert!(second.reused_embedding);

        // Only the first indexing paid for an embedding call
        assert_eq!(embed_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handle_event_idempotent() {
        let server = MockServer::start().await;
        let tmp = TempDir::new().unwrap();
        let (organizer, index, _) = test_organizer(&server, &tmp, vec![1.0, 0.0]).await;

        Mock::given(method("GET"))
            .and(path("/rest/api/3/issue/PROJ-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_issue("PROJ-1", "Login")))
            .expect(1)
            .mount(&server)
            .await;

        let first = organizer
            .handle_event("evt-1", "issue_updated", "PROJ-1")
            .await
            .unwrap();
        assert_eq!(first, EventOutcome::Processed);
        assert_eq!(index.count().await.unwrap(), 1);

        // Redelivery: no tracker call (expect(1) above), no error
        let second = organizer
            .handle_event("evt-1", "issue_updated", "PROJ-1")
            .await
            .unwrap();
        assert_eq!(second, EventOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_failed_event_not_marked_processed() {
        let server = MockServer::start().await;
        let tmp = TempDir::new().unwrap();
        let (organizer, _, _) = test_organizer(&server, &tmp, vec![1.0, 0.0]).await;

        Mock::given(method("GET"))
            .and(path("/rest/api/3/issue/PROJ-1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert!(organizer
            .handle_event("evt-1", "issue_updated", "PROJ-1")
            .await
            .is_err());

        // Redelivery after the failure is retried, not skipped
        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/issue/PROJ-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_issue("PROJ-1", "Login")))
            .mount(&server)
            .await;

        let outcome = organizer
            .handle_event("evt-1", "issue_updated", "PROJ-1")
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Processed);
    }

    #[tokio::test]
    async fn test_delete_event() {
        let server = MockServer::start().await;
        let tmp = TempDir::new().unwrap();
        let (organizer, index, _) = test_organizer(&server, &tmp, vec![1.0, 0.0]).await;

        index
            .upsert(crate::store::test_support::record("PROJ-1", vec![1.0, 0.0]))
            .await
            .unwrap();

        let outcome = organizer
            .handle_event("evt-2", "issue_deleted", "PROJ-1")
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Processed);
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_event_type_ignored() {
        let server = MockServer::start().await;
        let tmp = TempDir::new().unwrap();
        let (organizer, _, _) = test_organizer(&server, &tmp, vec![1.0, 0.0]).await;

        let outcome = organizer
            .handle_event("evt-3", "comment_added", "PROJ-1")
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_sync_indexes_batch() {
        let server = MockServer::start().await;
        let tmp = TempDir::new().unwrap();
        let (organizer, index, _) = test_organizer(&server, &tmp, vec![1.0, 0.0]).await;

        Mock::given(method("GET"))
            .and(path("/rest/api/3/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issues": [
                    mock_issue("PROJ-1", "Login fails"),
                    mock_issue("PROJ-2", "Checkout crash")
                ],
                "total": 2
            })))
            .mount(&server)
            .await;

        let stats = organizer.sync(50, None).await.unwrap();
        assert_eq!(stats.fetched, 2);
        assert_eq!(stats.indexed, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(index.count().await.unwrap(), 2);
    }
}
