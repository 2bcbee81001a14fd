//! SQLite schema definition

/// SQL schema for the metadata database
pub const SCHEMA_SQL: &str = r#"
-- Issues: indexed ticket metadata, one row per issue key
CREATE TABLE IF NOT EXISTS issues (
    issue_key TEXT PRIMARY KEY,
    project_key TEXT NOT NULL,
    summary TEXT NOT NULL,
    description TEXT,
    preprocessed_text TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    embedding BLOB NOT NULL,
    epic_key TEXT,
    labels_json TEXT NOT NULL DEFAULT '[]',
    components_json TEXT NOT NULL DEFAULT '[]',
    issue_type TEXT,
    status TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Processed events: idempotency ledger for external change notifications
CREATE TABLE IF NOT EXISTS processed_events (
    event_id TEXT PRIMARY KEY,
    issue_key TEXT NOT NULL,
    event_type TEXT NOT NULL,
    processed_at TEXT NOT NULL
);

-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_issues_project ON issues(project_key);
CREATE INDEX IF NOT EXISTS idx_issues_epic ON issues(epic_key);
CREATE INDEX IF NOT EXISTS idx_events_issue ON processed_events(issue_key);
"#;
