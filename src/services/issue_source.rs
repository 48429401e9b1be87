//! The remote issue-search capability consumed by the sync engine.
//!
//! [`IssueSource`] is the seam between the engine and GitHub: production code
//! uses [`GitHubClient`](super::github_client::GitHubClient), tests plug in
//! scripted sources.

use crate::error::AppError;
use crate::models::Account;
use crate::services::github_client::{
    GitHubIssue, GitHubPullRequest, GitHubRepository, GitHubTeam,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Sort direction for `sort=updated` searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl std::fmt::Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Asc => write!(f, "asc"),
            Self::Desc => write!(f, "desc"),
        }
    }
}

/// One page of search results.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub total_count: u64,
    pub items: Vec<GitHubIssue>,
}

/// Remote search and listing calls, scoped to one credential.
#[async_trait]
pub trait IssueSource: Send + Sync {
    /// Search issues matching `query`, sorted by update time.
    async fn search_issues(
        &self,
        query: &str,
        order: SortOrder,
        page: u32,
        per_page: u32,
    ) -> Result<SearchPage, AppError>;

    /// Every team the credential belongs to (all pages).
    async fn list_teams(&self) -> Result<Vec<GitHubTeam>, AppError>;

    /// Every repository the credential watches (all pages).
    async fn list_watched_repos(&self) -> Result<Vec<GitHubRepository>, AppError>;

    /// Fetch a single pull request.
    async fn get_pull_request(
        &self,
        owner: &str,
        name: &str,
        number: i64,
    ) -> Result<GitHubPullRequest, AppError>;
}

/// Builds one [`IssueSource`] per account.
pub trait IssueSourceFactory: Send + Sync {
    fn source_for(&self, account: &Account) -> Result<Arc<dyn IssueSource>, AppError>;
}
