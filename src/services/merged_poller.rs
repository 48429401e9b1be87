//! Background determination of pull request merged state.
//!
//! Search results do not say whether a closed pull request was merged. One
//! poller per account picks a single undetermined pull request per interval
//! and asks the pulls endpoint.

use crate::config::SyncConfig;
use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::issue;
use crate::services::issue_source::IssueSource;
use chrono::{Duration, Utc};
use std::sync::Arc;

#[derive(Clone)]
pub struct MergedPoller {
    pool: DbPool,
    source: Arc<dyn IssueSource>,
    account_id: i64,
    interval: std::time::Duration,
    lookback: Duration,
}

impl MergedPoller {
    pub fn new(pool: DbPool, source: Arc<dyn IssueSource>, account_id: i64, config: &SyncConfig) -> Self {
        Self {
            pool,
            source,
            account_id,
            interval: config.merged_poll_interval(),
            lookback: Duration::days(config.merged_lookback_days),
        }
    }

    /// Poll forever. Only returns on error.
    pub async fn run(&self) -> Result<(), AppError> {
        loop {
            tokio::time::sleep(self.interval).await;
            self.poll_once().await?;
        }
    }

    /// Determine one pull request. Returns its issue ID, if there was a candidate.
    pub async fn poll_once(&self) -> Result<Option<i64>, AppError> {
        let since = (Utc::now() - self.lookback).timestamp();
        let Some(candidate) =
            issue::select_undetermined_pull_request(&self.pool, self.account_id, since).await?
        else {
            return Ok(None);
        };

        let pull = self
            .source
            .get_pull_request(&candidate.repo_owner, &candidate.repo_name, candidate.number)
            .await?;

        issue::update_merged(&self.pool, candidate.id, pull.merged).await?;
        log::debug!(
            "[merged] {}/{}#{} merged={}",
            candidate.repo_owner,
            candidate.repo_name,
            candidate.number,
            pull.merged
        );

        Ok(Some(candidate.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::MergedState;
    use crate::services::github_client::{GitHubPullRequest, GitHubRepository, GitHubTeam};
    use crate::services::issue_source::{SearchPage, SortOrder};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Answers every pull request lookup with `merged`, recording the path.
    struct PullSource {
        merged: bool,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl IssueSource for PullSource {
        async fn search_issues(
            &self,
            _query: &str,
            _order: SortOrder,
            _page: u32,
            _per_page: u32,
        ) -> Result<SearchPage, AppError> {
            Ok(SearchPage::default())
        }

        async fn list_teams(&self) -> Result<Vec<GitHubTeam>, AppError> {
            Ok(Vec::new())
        }

        async fn list_watched_repos(&self) -> Result<Vec<GitHubRepository>, AppError> {
            Ok(Vec::new())
        }

        async fn get_pull_request(
            &self,
            owner: &str,
            name: &str,
            number: i64,
        ) -> Result<GitHubPullRequest, AppError> {
            self.requested
                .lock()
                .unwrap()
                .push(format!("{}/{}#{}", owner, name, number));
            Ok(GitHubPullRequest {
                id: 900,
                number,
                merged: self.merged,
            })
        }
    }

    async fn setup_test_db() -> DbPool {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        std::mem::forget(dir);
        let pool = db::initialize(&db_path).await.unwrap();

        let recent = Utc::now().timestamp() - 3600;
        let old = Utc::now().timestamp() - 30 * 86400;
        sqlx::raw_sql(&format!(
            "INSERT INTO accounts (id, display_name, url_base, api_url_base, access_token)
             VALUES (1, 'a', 'https://github.com', 'https://api.github.com', 't'),
                    (2, 'b', 'https://github.com', 'https://api.github.com', 't');
             INSERT INTO channels (id, account_id, display_name) VALUES (1, 1, 'one'), (2, 2, 'two');
             INSERT INTO queries (id, query) VALUES (1, 'repo:foo/bar');
             INSERT INTO github_users (id, login, avatar_url) VALUES (1, 'octocat', '');
             INSERT INTO issues (id, number, title, state, locked, comments, repo_owner, repo_name,
                                 user_id, is_pull_request, created_at, updated_at, closed_at)
             VALUES (10, 7, 'Closed PR', 'closed', 0, 0,
                     'foo', 'bar', 1, 1, {recent}, {recent}, {recent}),
                    (11, 8, 'Open PR', 'open', 0, 0,
                     'foo', 'bar', 1, 1, {recent}, {recent}, NULL),
                    (12, 9, 'Old PR', 'closed', 0, 0,
                     'foo', 'bar', 1, 1, {old}, {old}, {old});
             INSERT INTO channel_issues (channel_id, issue_id, query_id) VALUES (1, 10, 1), (1, 11, 1), (1, 12, 1);",
            recent = recent,
            old = old,
        ))
        .execute(&pool)
        .await
        .unwrap();

        pool
    }

    fn poller(pool: &DbPool, account_id: i64, merged: bool) -> (MergedPoller, Arc<PullSource>) {
        let source = Arc::new(PullSource {
            merged,
            requested: Mutex::new(Vec::new()),
        });
        let poller = MergedPoller::new(pool.clone(), source.clone(), account_id, &SyncConfig::default());
        (poller, source)
    }

    async fn merged_state(pool: &DbPool, id: i64) -> MergedState {
        let mut conn = pool.acquire().await.unwrap();
        issue::get_issue(&mut conn, id)
            .await
            .unwrap()
            .unwrap()
            .merged_state()
    }

    #[tokio::test]
    async fn test_poll_determines_recent_closed_pull_request() {
        let pool = setup_test_db().await;
        let (poller, source) = poller(&pool, 1, true);

        assert_eq!(poller.poll_once().await.unwrap(), Some(10));
        assert_eq!(*source.requested.lock().unwrap(), vec!["foo/bar#7".to_string()]);
        assert_eq!(merged_state(&pool, 10).await, MergedState::Merged);

        // Open and out-of-window pull requests are left alone
        assert_eq!(poller.poll_once().await.unwrap(), None);
        assert_eq!(merged_state(&pool, 11).await, MergedState::Unknown);
        assert_eq!(merged_state(&pool, 12).await, MergedState::Unknown);
    }

    #[tokio::test]
    async fn test_unmerged_is_stored_as_determined() {
        let pool = setup_test_db().await;
        let (poller, _) = poller(&pool, 1, false);

        poller.poll_once().await.unwrap();
        assert_eq!(merged_state(&pool, 10).await, MergedState::NotMerged);
    }

    #[tokio::test]
    async fn test_other_accounts_pull_requests_are_ignored() {
        let pool = setup_test_db().await;
        let (poller, source) = poller(&pool, 2, true);

        assert_eq!(poller.poll_once().await.unwrap(), None);
        assert!(source.requested.lock().unwrap().is_empty());
    }
}
