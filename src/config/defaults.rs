//! Default values for configuration

/// Default tracker base URL (empty; must be configured)
pub fn default_tracker_base_url() -> String {
    std::env::var("TRIAGE_TRACKER_URL").unwrap_or_default()
}

/// Default tracker account email
pub fn default_tracker_email() -> String {
    std::env::var("TRIAGE_TRACKER_EMAIL").unwrap_or_default()
}

/// Default environment variable name for the tracker API token
pub fn default_tracker_api_token_env() -> String {
    "TRIAGE_TRACKER_TOKEN".to_string()
}

/// Default project key
pub fn default_tracker_project_key() -> String {
    std::env::var("TRIAGE_PROJECT_KEY").unwrap_or_default()
}

/// Default tracker request timeout in seconds
pub fn default_tracker_timeout() -> u64 {
    30
}

/// Default embedding model
pub fn default_embedding_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

/// Default embedding dimension (all-MiniLM-L6-v2)
pub fn default_embedding_dimension() -> usize {
    384
}

/// Default batch size for embedding
pub fn default_embedding_batch_size() -> usize {
    32
}

/// Default embedding backend URL
pub fn default_embedding_backend_url() -> String {
    std::env::var("TRIAGE_EMBEDDING_BACKEND_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:7997".to_string())
}

/// Default index backend
pub fn default_index_backend() -> String {
    "durable".to_string()
}

/// Default number of similar issues considered for suggestions
pub fn default_suggest_neighbors() -> usize {
    5
}

/// Default maximum suggested labels
pub fn default_suggest_max_labels() -> usize {
    3
}

/// Default maximum suggested components
pub fn default_suggest_max_components() -> usize {
    2
}

/// Default maximum issues per sync run
pub fn default_sync_max_issues() -> usize {
    100
}
