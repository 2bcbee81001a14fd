//! Suggestion aggregation over ranked neighbors
//!
//! Pure weighted voting: each neighbor votes for its epic, labels, and
//! components with its similarity score as the weight. No I/O, and no
//! failure mode; thin or empty neighborhoods degrade to explicit
//! "no suggestion" results.

use crate::store::Neighbor;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Weighted vote accumulator preserving first-seen order.
///
/// Entries keep the order in which their key was first encountered, and
/// the ranking sort is stable, so equal weights resolve to whichever key
/// a closer neighbor voted for first.
#[derive(Debug, Default)]
struct WeightedVotes {
    entries: Vec<(String, f32)>,
}

impl WeightedVotes {
    fn add(&mut self, key: &str, weight: f32) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, total)) => *total += weight,
            None => self.entries.push((key.to_string(), weight)),
        }
    }

    fn total(&self) -> f32 {
        self.entries.iter().map(|(_, w)| w).sum()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys with their weights, heaviest first; ties keep first-seen order
    fn ranked(mut self) -> Vec<(String, f32)> {
        self.entries
            .sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        self.entries
    }
}

/// Epic suggestion with an explanation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpicSuggestion {
    pub epic_key: Option<String>,
    pub confidence: f32,
    pub reasoning: String,
}

impl EpicSuggestion {
    fn none(reasoning: &str) -> Self {
        Self {
            epic_key: None,
            confidence: 0.0,
            reasoning: reasoning.to_string(),
        }
    }
}

/// Suggest a parent epic from the epics of similar issues.
///
/// Each neighbor carrying an epic votes for it with its similarity
/// score; the winner's confidence is its share of all epic-carrying
/// votes (not of all neighbors).
pub fn suggest_epic(neighbors: &[Neighbor]) -> EpicSuggestion {
    if neighbors.is_empty() {
        return EpicSuggestion::none("No similar issues found.");
    }

    let mut votes = WeightedVotes::default();
    for neighbor in neighbors {
        if let Some(epic) = &neighbor.record.epic_key {
            votes.add(epic, neighbor.score);
        }
    }

    if votes.is_empty() {
        return EpicSuggestion::none("No similar issues with assigned epics found.");
    }

    let total = votes.total();
    let Some((epic_key, winning_sum)) = votes.ranked().into_iter().next() else {
        return EpicSuggestion::none("No similar issues with assigned epics found.");
    };

    let confidence = if total > 0.0 { winning_sum / total } else { 0.0 };

    let sharing = neighbors
        .iter()
        .filter(|n| n.record.epic_key.as_deref() == Some(epic_key.as_str()))
        .count();
    let reasoning = format!(
        "{}/{} similar issues belong to this epic. Confidence: {:.2}",
        sharing,
        neighbors.len(),
        confidence
    );

    EpicSuggestion {
        epic_key: Some(epic_key),
        confidence,
        reasoning,
    }
}

/// Suggest labels from the labels of similar issues, heaviest first.
/// A neighbor with several labels votes for each at full weight.
pub fn suggest_labels(neighbors: &[Neighbor], top_k: usize) -> Vec<String> {
    let mut votes = WeightedVotes::default();
    for neighbor in neighbors {
        for label in &neighbor.record.labels {
            votes.add(label, neighbor.score);
        }
    }
    votes
        .ranked()
        .into_iter()
        .take(top_k)
        .map(|(label, _)| label)
        .collect()
}

/// Suggest components from the components of similar issues
pub fn suggest_components(neighbors: &[Neighbor], top_k: usize) -> Vec<String> {
    let mut votes = WeightedVotes::default();
    for neighbor in neighbors {
        for component in &neighbor.record.components {
            votes.add(component, neighbor.score);
        }
    }
    votes
        .ranked()
        .into_iter()
        .take(top_k)
        .map(|(component, _)| component)
        .collect()
}
