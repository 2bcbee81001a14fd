//! Status command implementation

use crate::config::Config;
use crate::error::Result;
use crate::meta::IssueDb;
use crate::store::SimilarityIndex;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub snapshot_path: String,
    pub snapshot_exists: bool,
    pub index_backend: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub tracker_base_url: String,
    pub project_key: String,
    pub indexed_issues: usize,
    pub processed_events: usize,
}

/// Get system status
pub async fn cmd_status(
    config: &Config,
    db: &IssueDb,
    index: &dyn SimilarityIndex,
) -> Result<StatusInfo> {
    info!("Getting status");

    let indexed_issues = index.count().await?;
    let processed_events = db.event_ledger().processed_count().await?;

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        snapshot_path: config.paths.snapshot_file.display().to_string(),
        snapshot_exists: config.paths.snapshot_file.exists(),
        index_backend: config.index.backend.clone(),
        embedding_model: config.embedding.model.clone(),
        embedding_dimension: config.embedding.resolved_dimension(),
        tracker_base_url: config.tracker.base_url.clone(),
        project_key: config.tracker.project_key.clone(),
        indexed_issues,
        processed_events,
    })
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\ntriage status\n");
    println!("  Config: {}", status.config_path);
    println!("  Database: {}", status.db_path);
    println!(
        "  Index backend: {} (snapshot: {})",
        status.index_backend,
        if status.snapshot_exists {
            status.snapshot_path.as_str()
        } else {
            "not written yet"
        }
    );
    println!(
        "  Embedding model: {} ({} dims)",
        status.embedding_model, status.embedding_dimension
    );
    if status.tracker_base_url.is_empty() {
        println!("  Tracker: not configured");
    } else {
        println!(
            "  Tracker: {} (project {})",
            status.tracker_base_url, status.project_key
        );
    }
    println!("  Indexed issues: {}", status.indexed_issues);
    println!("  Processed events: {}", status.processed_events);
}
