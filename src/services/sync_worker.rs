//! Incremental bidirectional sync for one [`ActualQuery`].
//!
//! Two loops run side by side and share the query's cursor, which is derived
//! from the issues already stored for it:
//!
//! - backward: searches `updated:<=oldest`, newest first, until the history
//!   horizon is reached or a page brings nothing older;
//! - forward: searches `updated:>=newest`, oldest first, forever. The rate
//!   limiter paces it.
//!
//! Both loops re-fetch the boundary issue on every page; the merger makes that
//! harmless. A full page whose issues all share the cursor's second cannot move
//! the cursor, so the loop pages through that cluster with the same qualifier
//! until it gets past it. Any error ends both loops and is returned to the
//! supervisor, which restarts the pair from the stored cursor.

use crate::config::SyncConfig;
use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::query;
use crate::services::github_client::GitHubIssue;
use crate::services::issue_source::{IssueSource, SortOrder};
use crate::services::merger::Merger;
use crate::services::query_grammar::RepoRef;
use crate::services::query_planner::ActualQuery;
use crate::services::rate_limiter::RateLimiter;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Characters the loops append to a planned query (` updated:>=` plus a
/// second-precision UTC timestamp).
pub const CURSOR_QUALIFIER_LEN: usize = " updated:>=".len() + "YYYY-MM-DDTHH:MM:SSZ".len();

/// Format a timestamp for a search qualifier.
fn search_time(ts: i64) -> Result<String, AppError> {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .ok_or_else(|| AppError::internal(format!("timestamp {} out of range", ts)))
}

#[derive(Clone)]
pub struct SyncWorker {
    pool: DbPool,
    source: Arc<dyn IssueSource>,
    limiter: RateLimiter,
    merger: Merger,
    page_size: u32,
    history_horizon: Duration,
}

impl SyncWorker {
    pub fn new(
        pool: DbPool,
        source: Arc<dyn IssueSource>,
        limiter: RateLimiter,
        merger: Merger,
        config: &SyncConfig,
    ) -> Self {
        Self {
            pool,
            source,
            limiter,
            merger,
            page_size: config.page_size,
            history_horizon: Duration::days(config.history_horizon_days),
        }
    }

    /// Run both loops until one fails. The backward loop finishing is normal.
    pub async fn run(&self, query: Arc<ActualQuery>) -> Result<(), AppError> {
        let started = Utc::now().timestamp();
        let mut tasks = JoinSet::new();

        let worker = self.clone();
        let backward_query = query.clone();
        tasks.spawn(async move { worker.fetch_old_issues(&backward_query).await });

        let worker = self.clone();
        let forward_query = query.clone();
        tasks.spawn(async move { worker.fetch_new_issues(&forward_query, started).await });

        while let Some(joined) = tasks.join_next().await {
            let result =
                joined.map_err(|e| AppError::internal(format!("sync task aborted: {}", e)))?;
            if let Err(err) = result {
                tasks.abort_all();
                return Err(err);
            }
        }

        Ok(())
    }

    /// Fill history backwards until the horizon or until no progress is possible.
    pub async fn fetch_old_issues(&self, query: &ActualQuery) -> Result<(), AppError> {
        let horizon = (Utc::now() - self.history_horizon).timestamp();
        let mut page_oldest: Option<i64> = None;
        let mut page = 1;

        loop {
            let stored = query::oldest_updated_at(&self.pool, &query.query).await?;
            let cursor = match (stored, page_oldest) {
                (Some(a), Some(b)) => a.min(b),
                (a, b) => a.or(b).unwrap_or_else(|| Utc::now().timestamp()),
            };

            if cursor < horizon {
                log::info!("[sync] '{}' reached the history horizon", query.query);
                return Ok(());
            }

            let search = format!("{} updated:<={}", query.query, search_time(cursor)?);
            let items = self.sync_page(query, &search, SortOrder::Desc, page).await?;

            if page == 1 && items.len() <= 1 {
                log::info!("[sync] '{}' history complete", query.query);
                return Ok(());
            }

            match items.iter().map(|i| i.updated_at.timestamp()).min() {
                Some(oldest) if oldest < cursor => {
                    page_oldest = Some(oldest);
                    page = 1;
                }
                _ if items.len() < self.page_size as usize => {
                    log::info!("[sync] '{}' history complete", query.query);
                    return Ok(());
                }
                _ => {
                    page += 1;
                    log::debug!(
                        "[sync] '{}' full page at {}, paging to {}",
                        query.query,
                        cursor,
                        page
                    );
                }
            }
        }
    }

    /// Tail new updates forever, starting from `started` when nothing is stored.
    pub async fn fetch_new_issues(&self, query: &ActualQuery, started: i64) -> Result<(), AppError> {
        let mut page_newest: Option<i64> = None;
        let mut page = 1;

        loop {
            let stored = query::newest_updated_at(&self.pool, &query.query).await?;
            let cursor = match (stored, page_newest) {
                (Some(a), Some(b)) => a.max(b),
                (a, b) => a.or(b).unwrap_or(started),
            };

            let search = format!("{} updated:>={}", query.query, search_time(cursor)?);
            let items = self.sync_page(query, &search, SortOrder::Asc, page).await?;

            match items.iter().map(|i| i.updated_at.timestamp()).max() {
                Some(newest) if newest > cursor => {
                    page_newest = Some(newest);
                    page = 1;
                }
                _ if items.len() >= self.page_size as usize => {
                    page += 1;
                    log::debug!(
                        "[sync] '{}' full page at {}, paging to {}",
                        query.query,
                        cursor,
                        page
                    );
                }
                _ => page = 1,
            }
        }
    }

    /// Fetch one rate-limited page and import it for every accepting condition.
    async fn sync_page(
        &self,
        query: &ActualQuery,
        search: &str,
        order: SortOrder,
        page_number: u32,
    ) -> Result<Vec<GitHubIssue>, AppError> {
        let page = {
            let _admission = self.limiter.admit().await?;
            self.source
                .search_issues(search, order, page_number, self.page_size)
                .await?
        };

        log::debug!(
            "[sync] '{}' returned {} of {} issues",
            search,
            page.items.len(),
            page.total_count
        );

        let repos = page
            .items
            .iter()
            .map(|i| RepoRef::from_issue_url(&i.url))
            .collect::<Result<Vec<_>, _>>()?;

        let mut touched = BTreeSet::new();
        for condition in &query.conditions {
            let accepted: Vec<GitHubIssue> = page
                .items
                .iter()
                .zip(&repos)
                .filter(|(_, repo)| condition.satisfy(repo))
                .map(|(issue, _)| issue.clone())
                .collect();

            if accepted.is_empty() {
                continue;
            }

            let ids = self
                .merger
                .import_issues(&accepted, condition.channel_id, &query.query)
                .await?;
            touched.extend(ids);
        }

        if !touched.is_empty() {
            let ids: Vec<i64> = touched.into_iter().collect();
            self.merger.notify_unread_counts(&ids).await?;
        }

        Ok(page.items)
    }
}
