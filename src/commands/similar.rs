//! Similar command implementation

use crate::error::Result;
use crate::organize::{search_similar_in_index, SimilarIssue};
use crate::store::SimilarityIndex;

/// Find issues similar to an already-indexed ticket
pub async fn cmd_similar(
    index: &dyn SimilarityIndex,
    issue_key: &str,
    limit: usize,
) -> Result<Vec<SimilarIssue>> {
    search_similar_in_index(index, issue_key, limit).await
}

/// Print similar issues to console
pub fn print_similar(issue_key: &str, similar: &[SimilarIssue]) {
    println!("\n🔍 Issues similar to {}:\n", issue_key);

    if similar.is_empty() {
        println!("No similar issues found.");
        return;
    }

    for (i, issue) in similar.iter().enumerate() {
        println!(
            "{}. [score: {:.3}] {} — {}",
            i + 1,
            issue.similarity_score,
            issue.issue_key,
            issue.summary
        );
        if !issue.labels.is_empty() {
            println!("   Labels: {}", issue.labels.join(", "));
        }
    }
}
