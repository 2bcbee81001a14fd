//! Issue inspection commands

use crate::error::{Error, Result};
use crate::store::{IssueRecord, SimilarityIndex};
use serde::Serialize;

/// A summarized issue row for listing
#[derive(Debug, Clone, Serialize)]
pub struct IssueSummary {
    pub issue_key: String,
    pub summary: String,
    pub epic_key: Option<String>,
    pub labels: Vec<String>,
    pub components: Vec<String>,
    pub updated_at: String,
}

impl From<&IssueRecord> for IssueSummary {
    fn from(record: &IssueRecord) -> Self {
        Self {
            issue_key: record.issue_key.clone(),
            summary: record.summary.clone(),
            epic_key: record.epic_key.clone(),
            labels: record.labels.clone(),
            components: record.components.clone(),
            updated_at: record.updated_at.clone(),
        }
    }
}

/// List indexed issues, most recently updated first
pub async fn cmd_list_issues(
    index: &dyn SimilarityIndex,
    limit: usize,
) -> Result<Vec<IssueSummary>> {
    let mut records = index.all().await?;
    records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    records.truncate(limit);
    Ok(records.iter().map(IssueSummary::from).collect())
}

/// Show one indexed issue
pub async fn cmd_show_issue(index: &dyn SimilarityIndex, issue_key: &str) -> Result<IssueRecord> {
    index
        .get(issue_key)
        .await?
        .ok_or_else(|| Error::IssueNotFound(issue_key.to_string()))
}

/// Remove an issue from the index
pub async fn cmd_remove_issue(index: &dyn SimilarityIndex, issue_key: &str) -> Result<()> {
    if !index.delete(issue_key).await? {
        return Err(Error::IssueNotFound(issue_key.to_string()));
    }
    Ok(())
}

/// Print an issue listing to console
pub fn print_issue_list(issues: &[IssueSummary]) {
    if issues.is_empty() {
        println!("No issues indexed. Run 'triage sync' first.");
        return;
    }

    println!("\nIndexed issues ({}):\n", issues.len());
    for issue in issues {
        let epic = issue.epic_key.as_deref().unwrap_or("-");
        println!("  {}  epic: {}  {}", issue.issue_key, epic, issue.summary);
    }
}

/// Print one issue to console
pub fn print_issue(record: &IssueRecord) {
    println!("\n{} — {}", record.issue_key, record.summary);
    println!("  Project: {}", record.project_key);
    if let Some(epic) = &record.epic_key {
        println!("  Epic: {}", epic);
    }
    if let Some(issue_type) = &record.issue_type {
        println!("  Type: {}", issue_type);
    }
    if let Some(status) = &record.status {
        println!("  Status: {}", status);
    }
    if !record.labels.is_empty() {
        println!("  Labels: {}", record.labels.join(", "));
    }
    if !record.components.is_empty() {
        println!("  Components: {}", record.components.join(", "));
    }
    println!("  Updated: {}", record.updated_at);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::record;
    use crate::store::MemoryIndex;

    #[tokio::test]
    async fn test_list_show_remove() {
        let index = MemoryIndex::new(2);
        index.upsert(record("PROJ-1", vec![1.0, 0.0])).await.unwrap();
        index.upsert(record("PROJ-2", vec![0.0, 1.0])).await.unwrap();

        let listed = cmd_list_issues(&index, 10).await.unwrap();
        assert_eq!(listed.len(), 2);

        let shown = cmd_show_issue(&index, "PROJ-1").await.unwrap();
        assert_eq!(shown.issue_key, "PROJ-1");

        cmd_remove_issue(&index, "PROJ-1").await.unwrap();
        let err = cmd_remove_issue(&index, "PROJ-1").await;
        assert!(matches!(err, Err(Error::IssueNotFound(_))));
    }
}
