//! Event intake command implementation
//!
//! The CLI entry point for externally delivered change notifications
//! (e.g. forwarded tracker webhooks). Intake is idempotent per event id.

use crate::error::Result;
use crate::organize::{EventOutcome, Organizer};
use serde::Serialize;
use tracing::info;

/// Event handling result for display
#[derive(Debug, Clone, Serialize)]
pub struct EventResult {
    pub event_id: String,
    pub event_type: String,
    pub issue_key: String,
    pub outcome: EventOutcome,
}

/// Handle one change notification
pub async fn cmd_event(
    organizer: &Organizer,
    event_id: &str,
    event_type: &str,
    issue_key: &str,
) -> Result<EventResult> {
    info!("Handling event {} ({})", event_id, event_type);
    let outcome = organizer.handle_event(event_id, event_type, issue_key).await?;
    Ok(EventResult {
        event_id: event_id.to_string(),
        event_type: event_type.to_string(),
        issue_key: issue_key.to_string(),
        outcome,
    })
}

/// Print an event result to console
pub fn print_event_result(result: &EventResult) {
    match result.outcome {
        EventOutcome::Processed => {
            println!("✓ Event {} processed ({})", result.event_id, result.issue_key)
        }
        EventOutcome::Duplicate => {
            println!("Event {} already processed, skipped", result.event_id)
        }
        EventOutcome::Ignored => println!(
            "Event type '{}' is not handled, ignored",
            result.event_type
        ),
    }
}
