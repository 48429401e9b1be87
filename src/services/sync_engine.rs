//! The sync engine: planning, supervised workers and the query facade.
//!
//! [`SyncEngine`] owns every shared piece of the mirror (store, rate limiter,
//! merger, notifier, alert sink) and is constructed once by the host. Starting
//! it plans every channel up front; if any channel cannot be planned nothing
//! is spawned. After that each outbound query and each account's merged
//! poller runs under the supervisor until the handle is shut down.

use crate::config::SyncConfig;
use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::{account, channel, unread_count, UnreadCount};
use crate::services::alert::AlertSink;
use crate::services::issue_source::{IssueSource, IssueSourceFactory};
use crate::services::merged_poller::MergedPoller;
use crate::services::merger::Merger;
use crate::services::query_planner::{ActualQuery, QueryPlanner};
use crate::services::rate_limiter::RateLimiter;
use crate::services::supervisor::{RestartPolicy, Supervisor};
use crate::services::sync_worker::SyncWorker;
use crate::services::unread_notifier::UnreadCountNotifier;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle to a started engine.
pub struct SyncHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    queries: Vec<ActualQuery>,
}

impl SyncHandle {
    /// The outbound queries the engine is syncing.
    pub fn queries(&self) -> &[ActualQuery] {
        &self.queries
    }

    /// Cancel every worker and wait for the supervisors to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                log::warn!("[sync] Supervisor task ended abnormally: {}", e);
            }
        }
        log::info!("[sync] Sync engine stopped");
    }
}

pub struct SyncEngine {
    pool: DbPool,
    config: SyncConfig,
    limiter: RateLimiter,
    notifier: Arc<UnreadCountNotifier>,
    merger: Merger,
    alert: Arc<dyn AlertSink>,
    factory: Arc<dyn IssueSourceFactory>,
}

impl SyncEngine {
    pub fn new(
        pool: DbPool,
        config: SyncConfig,
        alert: Arc<dyn AlertSink>,
        factory: Arc<dyn IssueSourceFactory>,
    ) -> Self {
        let notifier = Arc::new(UnreadCountNotifier::new());
        let merger = Merger::new(pool.clone(), notifier.clone(), &config);
        let limiter = RateLimiter::new(config.rate_limit_concurrency, config.rate_limit_cooldown());

        Self {
            pool,
            config,
            limiter,
            notifier,
            merger,
            alert,
            factory,
        }
    }

    /// Plan every channel and spawn the supervised workers.
    pub async fn start(&self, cancel: CancellationToken) -> Result<SyncHandle, AppError> {
        let accounts = account::list_accounts(&self.pool).await?;
        let mut sources: HashMap<i64, Arc<dyn IssueSource>> = HashMap::new();
        for account in &accounts {
            sources.insert(account.id, self.factory.source_for(account)?);
        }

        let planner = QueryPlanner::new(&self.config);
        let mut resolved = Vec::new();
        for channel in channel::list_channels(&self.pool).await? {
            let source = sources.get(&channel.account_id).ok_or_else(|| {
                AppError::planning_for_channel("channel has no account", channel.id)
            })?;
            resolved.push(planner.resolve_channel(&channel, source.as_ref()).await?);
        }

        let queries = planner.plan(&resolved);
        log::info!(
            "[sync] Planned {} channels into {} queries",
            resolved.len(),
            queries.len()
        );

        let supervisor = Supervisor::new(
            self.alert.clone(),
            cancel.clone(),
            RestartPolicy::from_config(&self.config),
        );
        let mut tasks = Vec::with_capacity(queries.len() + accounts.len());

        for actual in &queries {
            let source = sources.get(&actual.account_id).cloned().ok_or_else(|| {
                AppError::planning(format!("no source for account {}", actual.account_id))
            })?;
            let worker = SyncWorker::new(
                self.pool.clone(),
                source,
                self.limiter.clone(),
                self.merger.clone(),
                &self.config,
            );
            let query = Arc::new(actual.clone());

            tasks.push(supervisor.spawn(format!("sync {}", actual.query), move || {
                let worker = worker.clone();
                let query = query.clone();
                async move { worker.run(query).await }.boxed()
            }));
        }

        for account in &accounts {
            let source = sources
                .get(&account.id)
                .cloned()
                .ok_or_else(|| AppError::internal("account source missing"))?;
            let poller = MergedPoller::new(self.pool.clone(), source, account.id, &self.config);

            tasks.push(supervisor.spawn(
                format!("merged poller {}", account.display_name),
                move || {
                    let poller = poller.clone();
                    async move { poller.run().await }.boxed()
                },
            ));
        }

        Ok(SyncHandle {
            cancel,
            tasks,
            queries,
        })
    }

    /// Current unread count of every channel.
    pub async fn unread_counts_for_channels(&self) -> Result<Vec<UnreadCount>, AppError> {
        Ok(unread_count::unread_counts_for_channels(&self.pool).await?)
    }

    /// Unread counts of the channels showing any of `issue_ids`.
    pub async fn unread_counts_affected_by_issues(
        &self,
        issue_ids: &[i64],
    ) -> Result<Vec<UnreadCount>, AppError> {
        Ok(unread_count::unread_counts_affected_by_issues(&self.pool, issue_ids).await?)
    }

    /// Mark an issue read or unread and publish the new counts.
    pub async fn set_already_read(&self, issue_id: i64, already_read: bool) -> Result<(), AppError> {
        self.merger.set_already_read(issue_id, already_read).await
    }

    /// Subscribe/unsubscribe point for unread-count events.
    pub fn notifier(&self) -> Arc<UnreadCountNotifier> {
        self.notifier.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::{Account, ChannelKind, SystemKind};
    use crate::services::github_client::{GitHubPullRequest, GitHubRepository, GitHubTeam};
    use crate::services::issue_source::{SearchPage, SortOrder};
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct EmptySource;

    #[async_trait]
    impl IssueSource for EmptySource {
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
            Err(AppError::authentication("Bad credentials"))
        }

        async fn list_watched_repos(&self) -> Result<Vec<GitHubRepository>, AppError> {
            Ok(Vec::new())
        }

        async fn get_pull_request(
            &self,
            _owner: &str,
            _name: &str,
            _number: i64,
        ) -> Result<GitHubPullRequest, AppError> {
            Err(AppError::not_found("pull request"))
        }
    }

    struct EmptyFactory;

    impl IssueSourceFactory for EmptyFactory {
        fn source_for(&self, _account: &Account) -> Result<Arc<dyn IssueSource>, AppError> {
            Ok(Arc::new(EmptySource))
        }
    }

    struct SilentSink;

    #[async_trait]
    impl AlertSink for SilentSink {
        async fn send(&self, _text: &str) -> Result<(), AppError> {
            Ok(())
        }
    }

    async fn setup_engine() -> (SyncEngine, DbPool) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        std::mem::forget(dir);
        let pool = db::initialize(&db_path).await.unwrap();

        sqlx::raw_sql(
            "INSERT INTO accounts (id, display_name, url_base, api_url_base, access_token)
             VALUES (1, 'a', 'https://github.com', 'https://api.github.com', 't');",
        )
        .execute(&pool)
        .await
        .unwrap();

        let engine = SyncEngine::new(
            pool.clone(),
            SyncConfig::default(),
            Arc::new(SilentSink),
            Arc::new(EmptyFactory),
        );
        (engine, pool)
    }

    #[tokio::test]
    async fn test_start_plans_and_shuts_down() {
        let (engine, pool) = setup_engine().await;
        channel::insert_channel(
            &pool,
            1,
            "mine",
            &ChannelKind::Static(vec!["repo:foo/bar".to_string(), "is:open author:me".to_string()]),
        )
        .await
        .unwrap();

        let handle = engine.start(CancellationToken::new()).await.unwrap();
        let texts: Vec<&str> = handle.queries().iter().map(|q| q.query.as_str()).collect();
        assert_eq!(texts.len(), 2);
        assert!(texts.contains(&"repo:foo/bar"));
        assert!(texts.contains(&"is:open author:me"));

        tokio::time::timeout(std::time::Duration::from_secs(5), handle.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_planning_failure_aborts_start() {
        let (engine, pool) = setup_engine().await;
        channel::insert_channel(&pool, 1, "teams", &ChannelKind::System(SystemKind::Teams))
            .await
            .unwrap();

        let result = engine.start(CancellationToken::new()).await;
        assert!(matches!(result, Err(AppError::Authentication { .. })));
    }

    #[tokio::test]
    async fn test_set_already_read_missing_issue() {
        let (engine, _pool) = setup_engine().await;
        let result = engine.set_already_read(404, true).await;
        assert!(matches!(result, Err(AppError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_counts_include_empty_channels() {
        let (engine, pool) = setup_engine().await;
        let id = channel::insert_channel(&pool, 1, "empty", &ChannelKind::Static(Vec::new()))
            .await
            .unwrap();

        let counts = engine.unread_counts_for_channels().await.unwrap();
        assert_eq!(counts, vec![UnreadCount { channel_id: id, count: 0 }]);
        assert!(engine.unread_counts_affected_by_issues(&[]).await.unwrap().is_empty());
    }
}
