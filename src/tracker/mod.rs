//! Issue tracker REST client
//!
//! Talks to a Jira-style REST API (v3): issue fetch, JQL search, field
//! updates, and comments. The pipeline consumes raw issues from here and
//! never parses tracker payloads anywhere else.

use crate::config::TrackerConfig;
use crate::error::{Error, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// A raw issue as returned by the tracker
#[derive(Debug, Clone, Deserialize)]
pub struct RawIssue {
    pub key: String,
    #[serde(default)]
    pub fields: RawFields,
}

/// Issue fields the organizer consumes
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFields {
    #[serde(default)]
    pub summary: String,
    /// Plain string, or an Atlassian Document Format tree
    #[serde(default)]
    pub description: Option<Value>,
    /// Parent reference; carries the epic key when present
    #[serde(default)]
    pub parent: Option<RawIssueRef>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub components: Vec<RawNamed>,
    #[serde(default, rename = "issuetype")]
    pub issue_type: Option<RawNamed>,
    #[serde(default)]
    pub status: Option<RawNamed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawIssueRef {
    pub key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawNamed {
    #[serde(default)]
    pub name: Option<String>,
}

impl RawIssue {
    /// Description as plain text, flattening ADF trees when present
    pub fn description_text(&self) -> String {
        match &self.fields.description {
            Some(Value::String(s)) => s.clone(),
            Some(adf @ Value::Object(_)) => crate::text::extract_text_from_adf(adf),
            _ => String::new(),
        }
    }

    /// Epic key from the parent reference, if any
    pub fn epic_key(&self) -> Option<String> {
        self.fields.parent.as_ref().map(|p| p.key.clone())
    }

    /// Component names, skipping unnamed entries
    pub fn component_names(&self) -> Vec<String> {
        self.fields
            .components
            .iter()
            .filter_map(|c| c.name.clone())
            .collect()
    }

    pub fn issue_type_name(&self) -> Option<String> {
        self.fields.issue_type.as_ref().and_then(|t| t.name.clone())
    }

    pub fn status_name(&self) -> Option<String> {
        self.fields.status.as_ref().and_then(|s| s.name.clone())
    }
}

/// Search response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub issues: Vec<RawIssue>,
    #[serde(default)]
    pub total: u64,
}

/// Fields accepted by `update_issue_fields`
#[derive(Debug, Clone, Default, Serialize)]
pub struct IssueFieldUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<Value>>,
}

impl IssueFieldUpdate {
    pub fn with_labels(labels: Vec<String>) -> Self {
        Self {
            labels: Some(labels),
            ..Default::default()
        }
    }

    pub fn components(mut self, names: &[String]) -> Self {
        self.components = Some(names.iter().map(|n| json!({ "name": n })).collect());
        self
    }
}

/// Tracker REST client
pub struct TrackerClient {
    client: Client,
    base_url: Url,
    email: String,
    api_token: String,
    project_key: String,
}

impl TrackerClient {
    pub fn new(config: &TrackerConfig, api_token: Option<String>) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(Error::Config(
                "tracker.base_url is not configured".to_string(),
            ));
        }
        let api_token = api_token.ok_or_else(|| {
            Error::Config(format!(
                "Tracker API token not set; export {}",
                config.api_token_env
            ))
        })?;

        let base_url = Url::parse(config.base_url.trim_end_matches('/'))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            email: config.email.clone(),
            api_token,
            project_key: config.project_key.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.set_path(path);
        Ok(url)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Tracker(format!("{}: {}", status, body)))
    }

    /// Search for issues using JQL
    pub async fn search_issues(&self, jql: &str, max_results: usize) -> Result<SearchResponse> {
        debug!("Searching tracker: {}", jql);
        let url = self.endpoint("/rest/api/3/search")?;
        let response = self
            .client
            .get(url)
            .basic_auth(&self.email, Some(&self.api_token))
            .query(&[("jql", jql.to_string()), ("maxResults", max_results.to_string())])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Get a single issue by key
    pub async fn get_issue(&self, issue_key: &str) -> Result<RawIssue> {
        debug!("Fetching issue {}", issue_key);
        let url = self.endpoint(&format!("/rest/api/3/issue/{}", issue_key))?;
        let response = self
            .client
            .get(url)
            .basic_auth(&self.email, Some(&self.api_token))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::IssueNotFound(issue_key.to_string()));
        }
        Ok(Self::check(response).await?.json().await?)
    }

    /// Update fields on an issue
    pub async fn update_issue_fields(
        &self,
        issue_key: &str,
        fields: &IssueFieldUpdate,
    ) -> Result<()> {
        let url = self.endpoint(&format!("/rest/api/3/issue/{}", issue_key))?;
        let response = self
            .client
            .put(url)
            .basic_auth(&self.email, Some(&self.api_token))
            .json(&json!({ "fields": fields }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Add a comment to an issue
    pub async fn add_comment(&self, issue_key: &str, body: &str) -> Result<()> {
        let url = self.endpoint(&format!("/rest/api/3/issue/{}/comment", issue_key))?;
        let response = self
            .client
            .post(url)
            .basic_auth(&self.email, Some(&self.api_token))
            .json(&json!({ "body": body }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Search for recent issues in the configured project
    pub async fn search_project_recent(&self, max_results: usize) -> Result<SearchResponse> {
        let jql = format!(
            "project = \"{}\" ORDER BY created DESC",
            self.project_key
        );
        self.search_issues(&jql, max_results).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{basic_auth, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(url: &str) -> TrackerConfig {
        TrackerConfig {
            base_url: url.to_string(),
            email: "dev@example.com".to_string(),
            api_token_env: "TEST_TOKEN".to_string(),
            project_key: "PROJ".to_string(),
            timeout_secs: 5,
        }
    }

    fn test_client(url: &str) -> TrackerClient {
        TrackerClient::new(&test_config(url), Some("secret".to_string())).unwrap()
    }

    #[test]
    fn test_missing_token_rejected() {
        let err = TrackerClient::new(&test_config("http://localhost"), None);
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_get_issue_parses_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/issue/PROJ-1"))
            .and(basic_auth("dev@example.com", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "key": "PROJ-1",
                "fields": {
                    "summary": "Login fails",
                    "description": "500 on submit",
                    "parent": {"key": "PROJ-100"},
                    "labels": ["bug"],
                    "components": [{"name": "auth"}],
                    "issuetype": {"name": "Bug"},
                    "status": {"name": "Open"}
                }
            })))
            .mount(&server)
            .await;

        let issue = test_client(&server.uri()).get_issue("PROJ-1").await.unwrap();
        assert_eq!(issue.key, "PROJ-1");
        assert_eq!(issue.fields.summary, "Login fails");
        assert_eq!(issue.description_text(), "500 on submit");
        assert_eq!(issue.epic_key().as_deref(), Some("PROJ-100"));
        assert_eq!(issue.component_names(), vec!["auth"]);
        assert_eq!(issue.issue_type_name().as_deref(), Some("Bug"));
        assert_eq!(issue.status_name().as_deref(), Some("Open"));
    }

    #[tokio::test]
    async fn test_get_issue_adf_description() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/issue/PROJ-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "key": "PROJ-2",
                "fields": {
                    "summary": "Checkout crash",
                    "description": {
                        "type": "doc",
                        "content": [
                            {"type": "paragraph", "content": [
                                {"type": "text", "text": "NPE in cart"}
                            ]}
                        ]
                    }
                }
            })))
            .mount(&server)
            .await;

        let issue = test_client(&server.uri()).get_issue("PROJ-2").await.unwrap();
        assert_eq!(issue.description_text(), "NPE in cart");
    }

    #[tokio::test]
    async fn test_get_issue_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/issue/PROJ-404"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = test_client(&server.uri()).get_issue("PROJ-404").await;
        assert!(matches!(err, Err(Error::IssueNotFound(key)) if key == "PROJ-404"));
    }

    #[tokio::test]
    async fn test_search_sends_jql() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/search"))
            .and(query_param("jql", "project = \"PROJ\" ORDER BY created DESC"))
            .and(query_param("maxResults", "25"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issues": [{"key": "PROJ-1", "fields": {"summary": "One"}}],
                "total": 1
            })))
            .mount(&server)
            .await;

        let result = test_client(&server.uri())
            .search_project_recent(25)
            .await
            .unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.issues[0].key, "PROJ-1");
    }

    #[tokio::test]
    async fn test_update_fields_payload() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/rest/api/3/issue/PROJ-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let update = IssueFieldUpdate::with_labels(vec!["bug".to_string()])
            .components(&["auth".to_string()]);
        test_client(&server.uri())
            .update_issue_fields("PROJ-1", &update)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_server_error_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/api/3/issue/PROJ-1/comment"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = test_client(&server.uri())
            .add_comment("PROJ-1", "hello")
            .await;
        assert!(matches!(err, Err(Error::Tracker(msg)) if msg.contains("500")));
    }
}
