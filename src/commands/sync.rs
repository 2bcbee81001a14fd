//! Sync command implementation

use crate::error::Result;
use crate::organize::{Organizer, SyncStats};
use tracing::info;

/// Sync options
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Maximum issues to fetch
    pub max_issues: Option<usize>,
    /// Custom JQL filter instead of project-recent
    pub jql: Option<String>,
}

/// Bulk-index recent issues from the tracker
pub async fn cmd_sync(
    organizer: &Organizer,
    default_max: usize,
    options: SyncOptions,
) -> Result<SyncStats> {
    let max_issues = options.max_issues.unwrap_or(default_max);
    info!("Syncing up to {} issues", max_issues);
    organizer.sync(max_issues, options.jql.as_deref()).await
}

/// Print sync statistics to console
pub fn print_sync_stats(stats: &SyncStats) {
    println!("\n✓ Sync complete");
    println!("  Issues fetched: {}", stats.fetched);
    println!("  Newly embedded: {}", stats.indexed);
    println!("  Unchanged (embedding reused): {}", stats.reused);
    if stats.failed > 0 {
        println!("  Failed: {}", stats.failed);
        for error in &stats.errors {
            println!("    - {}", error);
        }
    }
}
