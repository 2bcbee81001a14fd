//! Organize command implementation

use crate::error::Result;
use crate::organize::{OrganizationResult, Organizer};
use tracing::info;

/// Organize options
#[derive(Debug, Clone, Default)]
pub struct OrganizeOptions {
    /// Number of similar issues to consider
    pub top_k: Option<usize>,
    /// Write accepted suggestions back to the tracker
    pub apply: bool,
}

/// Organize a single ticket and optionally apply the suggestions
pub async fn cmd_organize(
    organizer: &Organizer,
    issue_key: &str,
    default_top_k: usize,
    options: OrganizeOptions,
) -> Result<OrganizationResult> {
    let top_k = options.top_k.unwrap_or(default_top_k);
    let result = organizer.organize(issue_key, top_k).await?;

    if options.apply {
        info!("Applying suggestions to {}", issue_key);
        organizer.apply_suggestions(issue_key, &result).await?;
    }

    Ok(result)
}

/// Print an organization result to console
pub fn print_organization(result: &OrganizationResult) {
    println!("\n🧭 {}\n", result.issue_key);

    if result.similar_issues.is_empty() {
        println!("No similar issues indexed yet.");
    } else {
        println!("Similar issues:");
        for (i, similar) in result.similar_issues.iter().enumerate() {
            println!(
                "{}. [score: {:.3}] {} — {}",
                i + 1,
                similar.similarity_score,
                similar.issue_key,
                similar.summary
            );
            if let Some(epic) = &similar.epic_key {
                println!("   Epic: {}", epic);
            }
        }
    }

    println!();
    match &result.suggested_epic.epic_key {
        Some(epic) => println!(
            "Suggested epic: {} (confidence {:.2})",
            epic, result.suggested_epic.confidence
        ),
        None => println!("Suggested epic: none"),
    }
    println!("  {}", result.suggested_epic.reasoning);

    if !result.suggested_labels.is_empty() {
        println!("Suggested labels: {}", result.suggested_labels.join(", "));
    }
    if !result.suggested_components.is_empty() {
        println!(
            "Suggested components: {}",
            result.suggested_components.join(", ")
        );
    }
}
