//! Reconciles fetched GitHub issues with the local mirror.
//!
//! Each batch is imported in a single transaction: reference data is
//! overwritten, issue rows are upserted with the read-flag rule below, label
//! and assignee sets are replaced, and the (channel, issue, query) link is
//! recorded. After commit the unread counts of the touched channels are
//! published.
//!
//! Read-flag rule:
//! - first sight: read iff the issue was last updated before the staleness
//!   threshold
//! - afterwards: stays read only while `updated_at` is unchanged

use crate::config::SyncConfig;
use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::{issue, query, reference, unread_count, Issue, Milestone};
use crate::services::github_client::GitHubIssue;
use crate::services::query_grammar::RepoRef;
use crate::services::unread_notifier::UnreadCountNotifier;
use chrono::{Duration, Utc};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Merger {
    pool: DbPool,
    notifier: Arc<UnreadCountNotifier>,
    read_staleness: Duration,
}

impl Merger {
    pub fn new(pool: DbPool, notifier: Arc<UnreadCountNotifier>, config: &SyncConfig) -> Self {
        Self {
            pool,
            notifier,
            read_staleness: Duration::days(config.read_staleness_days),
        }
    }

    /// Import `issues` into `channel_id` on behalf of `query_text`.
    ///
    /// Returns the imported issue IDs. Any failure rolls back the whole batch.
    pub async fn import_issues(
        &self,
        issues: &[GitHubIssue],
        channel_id: i64,
        query_text: &str,
    ) -> Result<Vec<i64>, AppError> {
        let mut tx = self.pool.begin().await?;

        // Writing first takes the write lock before any snapshot is read
        let query_id = query::find_or_create_query(&mut tx, query_text).await?;
        let stale_before = Utc::now() - self.read_staleness;
        let mut imported = Vec::with_capacity(issues.len());

        for fetched in issues {
            let repo = RepoRef::from_issue_url(&fetched.url)?;

            reference::upsert_user(&mut tx, &fetched.user).await?;
            for assignee in &fetched.assignees {
                reference::upsert_user(&mut tx, assignee).await?;
            }
            for label in &fetched.labels {
                reference::upsert_label(&mut tx, label).await?;
            }
            if let Some(milestone) = &fetched.milestone {
                reference::upsert_milestone(&mut tx, &Milestone::from(milestone)).await?;
            }

            let updated_at = fetched.updated_at.timestamp();
            let (already_read, merged) = match issue::get_issue(&mut tx, fetched.id).await? {
                Some(previous) => {
                    let unchanged = previous.updated_at == updated_at;
                    (
                        previous.already_read && unchanged,
                        if unchanged { previous.merged } else { None },
                    )
                }
                None => (fetched.updated_at < stale_before, None),
            };

            let row = Issue {
                id: fetched.id,
                number: fetched.number,
                title: fetched.title.clone(),
                user_id: fetched.user.id,
                repo_owner: repo.owner,
                repo_name: repo.name,
                state: fetched.state.clone(),
                locked: fetched.locked,
                comments: fetched.comments,
                created_at: fetched.created_at.timestamp(),
                updated_at,
                closed_at: fetched.closed_at.map(|t| t.timestamp()),
                is_pull_request: fetched.is_pull_request(),
                body: fetched.body.clone().unwrap_or_default(),
                already_read,
                merged,
                milestone_id: fetched.milestone.as_ref().map(|m| m.id),
            };
            issue::upsert_issue(&mut tx, &row).await?;

            let label_ids: Vec<i64> = fetched.labels.iter().map(|l| l.id).collect();
            issue::replace_labels(&mut tx, fetched.id, &label_ids).await?;
            let assignee_ids: Vec<i64> = fetched.assignees.iter().map(|u| u.id).collect();
            issue::replace_assignees(&mut tx, fetched.id, &assignee_ids).await?;

            issue::link_channel_issue(&mut tx, channel_id, fetched.id, query_id).await?;
            imported.push(fetched.id);
        }

        tx.commit().await?;

        log::debug!(
            "[merger] Imported {} issues into channel {} for '{}'",
            imported.len(),
            channel_id,
            query_text
        );

        Ok(imported)
    }

    /// Recount every channel showing one of `issue_ids` and publish the counts.
    pub async fn notify_unread_counts(&self, issue_ids: &[i64]) -> Result<(), AppError> {
        let counts = unread_count::unread_counts_affected_by_issues(&self.pool, issue_ids).await?;
        for count in counts {
            self.notifier.publish(count).await;
        }
        Ok(())
    }

    /// Set an issue's read flag, then recount and publish like a sync would.
    pub async fn set_already_read(&self, issue_id: i64, already_read: bool) -> Result<(), AppError> {
        if !issue::set_already_read(&self.pool, issue_id, already_read).await? {
            return Err(AppError::not_found_with_id("issue", issue_id.to_string()));
        }
        self.notify_unread_counts(&[issue_id]).await
    }
}
