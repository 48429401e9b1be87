//! GitHub REST API client.
//!
//! Provides the search, listing and pull request calls the sync engine needs,
//! with token authentication and `Link`-header pagination.

use crate::error::AppError;
use crate::models::{Account, GitHubUser, Label, Milestone};
use crate::services::issue_source::{IssueSource, IssueSourceFactory, SearchPage, SortOrder};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;

/// GitHub API client configuration.
#[derive(Debug, Clone)]
pub struct GitHubClientConfig {
    /// Base URL of the REST API (e.g., `https://api.github.com`).
    pub api_base_url: String,

    /// Personal access token for authentication.
    pub token: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GitHubClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.github.com".to_string(),
            token: String::new(),
            timeout_secs: 30,
        }
    }
}

/// GitHub API client.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: Client,
    config: GitHubClientConfig,
}

/// Issue or pull request as returned by `/search/issues`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubIssue {
    pub id: i64,
    pub number: i64,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub comments: i64,
    /// API URL, e.g. `https://api.github.com/repos/owner/name/issues/1`.
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub user: GitHubUser,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub assignees: Vec<GitHubUser>,
    pub milestone: Option<GitHubMilestone>,
    /// Present only on pull requests.
    pub pull_request: Option<serde_json::Value>,
}

impl GitHubIssue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

/// Milestone from API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubMilestone {
    pub id: i64,
    pub number: i64,
    pub title: String,
    pub description: Option<String>,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl From<&GitHubMilestone> for Milestone {
    fn from(m: &GitHubMilestone) -> Self {
        Self {
            id: m.id,
            number: m.number,
            title: m.title.clone(),
            description: m.description.clone().unwrap_or_default(),
            state: m.state.clone(),
            created_at: m.created_at.timestamp(),
            updated_at: m.updated_at.timestamp(),
            closed_at: m.closed_at.map(|t| t.timestamp()),
        }
    }
}

/// Organization reference nested in a team.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubOrganization {
    pub login: String,
}

/// Team from `/user/teams`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubTeam {
    pub id: i64,
    pub slug: String,
    pub organization: GitHubOrganization,
}

/// Repository from `/user/subscriptions`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRepository {
    pub id: i64,
    /// `owner/name`.
    pub full_name: String,
}

/// Pull request from `/repos/{owner}/{name}/pulls/{number}`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubPullRequest {
    pub id: i64,
    pub number: i64,
    #[serde(default)]
    pub merged: bool,
}

#[derive(Debug, Deserialize)]
struct SearchIssuesResponse {
    total_count: u64,
    items: Vec<GitHubIssue>,
}

/// Extract the `rel="next"` URL from a `Link` header value.
fn parse_next_link(link: &str) -> Option<String> {
    link.split(',').find_map(|part| {
        let mut sections = part.split(';');
        let url = sections.next()?.trim();
        let is_next = sections.any(|s| s.trim() == r#"rel="next""#);
        if is_next {
            Some(url.trim_start_matches('<').trim_end_matches('>').to_string())
        } else {
            None
        }
    })
}

impl GitHubClient {
    /// Create a new GitHub client.
    pub fn new(config: GitHubClientConfig) -> Result<Self, AppError> {
        let mut headers = header::HeaderMap::new();

        let mut auth_value = header::HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| AppError::authentication("Invalid token format"))?;
        auth_value.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth_value);
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("issue-mirror/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
        endpoint: &str,
    ) -> Result<T, AppError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        if status == StatusCode::UNAUTHORIZED {
            return Err(AppError::authentication_expired(
                "GitHub token expired or revoked",
            ));
        }

        let status_code = status.as_u16();
        let body = response.text().await.unwrap_or_default();
        let body_message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from));

        let message = match (status, &body_message) {
            (StatusCode::FORBIDDEN, Some(msg)) | (StatusCode::TOO_MANY_REQUESTS, Some(msg)) => {
                format!("Rate limit exceeded: {}", msg)
            }
            (StatusCode::FORBIDDEN, None) | (StatusCode::TOO_MANY_REQUESTS, None) => {
                "Rate limit exceeded".to_string()
            }
            (StatusCode::UNPROCESSABLE_ENTITY, Some(msg)) => format!("Invalid query: {}", msg),
            (StatusCode::NOT_FOUND, _) => "Resource not found".to_string(),
            (_, Some(msg)) => msg.clone(),
            _ => format!("Request failed ({}): {}", status_code, body),
        };

        Err(AppError::github_api_full(message, status_code, endpoint))
    }

    /// Fetch every page of a list endpoint by following `Link: rel="next"`.
    async fn get_all_pages<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Vec<T>, AppError> {
        let mut all_data = Vec::new();
        let mut next_url = Some(format!("{}?per_page=100", self.api_url(endpoint)));

        while let Some(url) = next_url {
            let response = self.client.get(&url).send().await?;
            next_url = response
                .headers()
                .get(header::LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_next_link);

            let data = self.handle_response::<Vec<T>>(response, endpoint).await?;
            all_data.extend(data);
        }

        Ok(all_data)
    }
}

#[async_trait]
impl IssueSource for GitHubClient {
    async fn search_issues(
        &self,
        query: &str,
        order: SortOrder,
        page: u32,
        per_page: u32,
    ) -> Result<SearchPage, AppError> {
        let endpoint = "/search/issues";
        let response = self
            .client
            .get(self.api_url(endpoint))
            .query(&[
                ("q", query.to_string()),
                ("sort", "updated".to_string()),
                ("order", order.to_string()),
                ("page", page.to_string()),
                ("per_page", per_page.to_string()),
            ])
            .send()
            .await?;

        let result: SearchIssuesResponse = self.handle_response(response, endpoint).await?;
        Ok(SearchPage {
            total_count: result.total_count,
            items: result.items,
        })
    }

    async fn list_teams(&self) -> Result<Vec<GitHubTeam>, AppError> {
        self.get_all_pages("/user/teams").await
    }

    async fn list_watched_repos(&self) -> Result<Vec<GitHubRepository>, AppError> {
        self.get_all_pages("/user/subscriptions").await
    }

    async fn get_pull_request(
        &self,
        owner: &str,
        name: &str,
        number: i64,
    ) -> Result<GitHubPullRequest, AppError> {
        let endpoint = format!("/repos/{}/{}/pulls/{}", owner, name, number);
        let response = self.client.get(self.api_url(&endpoint)).send().await?;
        self.handle_response(response, &endpoint).await
    }
}

/// Production factory: one [`GitHubClient`] per account.
#[derive(Debug, Clone)]
pub struct GitHubClientFactory {
    pub timeout_secs: u64,
}

impl IssueSourceFactory for GitHubClientFactory {
    fn source_for(&self, account: &Account) -> Result<Arc<dyn IssueSource>, AppError> {
        let client = GitHubClient::new(GitHubClientConfig {
            api_base_url: account.api_url_base.clone(),
            token: account.access_token.clone(),
            timeout_secs: self.timeout_secs,
        })?;
        Ok(Arc::new(client))
    }
}
