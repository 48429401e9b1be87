//! Issue / pull request model.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

/// Merged state of a pull request, resolved asynchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergedState {
    Unknown,
    Merged,
    NotMerged,
}

impl From<Option<bool>> for MergedState {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => Self::Unknown,
            Some(true) => Self::Merged,
            Some(false) => Self::NotMerged,
        }
    }
}

impl std::fmt::Display for MergedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Merged => write!(f, "merged"),
            Self::NotMerged => write!(f, "not_merged"),
        }
    }
}

/// A mirrored GitHub issue or pull request.
///
/// Timestamps are Unix seconds. `already_read` is local UI state and is
/// never sent by the remote.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    /// GitHub issue ID (stable across syncs).
    pub id: i64,
    pub number: i64,
    pub title: String,
    /// Author (FK to github_users).
    pub user_id: i64,
    pub repo_owner: String,
    pub repo_name: String,
    pub state: String,
    pub locked: bool,
    pub comments: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub closed_at: Option<i64>,
    pub is_pull_request: bool,
    pub body: String,
    pub already_read: bool,
    /// `None` until the merged poller determines it.
    pub merged: Option<bool>,
    pub milestone_id: Option<i64>,
}

impl Issue {
    pub fn merged_state(&self) -> MergedState {
        MergedState::from(self.merged)
    }
}

/// A closed pull request whose merged state is still unknown.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct UndeterminedPullRequest {
    pub id: i64,
    pub repo_owner: String,
    pub repo_name: String,
    pub number: i64,
}

const ISSUE_COLUMNS: &str = "id, number, title, user_id, repo_owner, repo_name, state, locked, \
     comments, created_at, updated_at, closed_at, is_pull_request, body, already_read, merged, milestone_id";

/// Look up an issue by GitHub ID.
pub async fn get_issue(conn: &mut SqliteConnection, id: i64) -> Result<Option<Issue>, sqlx::Error> {
    sqlx::query_as::<_, Issue>(&format!("SELECT {} FROM issues WHERE id = ?", ISSUE_COLUMNS))
        .bind(id)
        .fetch_optional(conn)
        .await
}

/// Insert or update an issue row, writing every column from `issue`.
///
/// The caller decides `already_read` and `merged`; this only persists them.
pub async fn upsert_issue(conn: &mut SqliteConnection, issue: &Issue) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO issues (id, number, title, user_id, repo_owner, repo_name, state, locked,
             comments, created_at, updated_at, closed_at, is_pull_request, body, already_read, merged, milestone_id)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           number = excluded.number,
           title = excluded.title,
           user_id = excluded.user_id,
           repo_owner = excluded.repo_owner,
           repo_name = excluded.repo_name,
           state = excluded.state,
           locked = excluded.locked,
           comments = excluded.comments,
           created_at = excluded.created_at,
           updated_at = excluded.updated_at,
           closed_at = excluded.closed_at,
           is_pull_request = excluded.is_pull_request,
           body = excluded.body,
           already_read = excluded.already_read,
           merged = excluded.merged,
           milestone_id = excluded.milestone_id",
    )
    .bind(issue.id)
    .bind(issue.number)
    .bind(&issue.title)
    .bind(issue.user_id)
    .bind(&issue.repo_owner)
    .bind(&issue.repo_name)
    .bind(&issue.state)
    .bind(issue.locked)
    .bind(issue.comments)
    .bind(issue.created_at)
    .bind(issue.updated_at)
    .bind(issue.closed_at)
    .bind(issue.is_pull_request)
    .bind(&issue.body)
    .bind(issue.already_read)
    .bind(issue.merged)
    .bind(issue.milestone_id)
    .execute(conn)
    .await?;

    Ok(())
}

/// Replace an issue's label set.
pub async fn replace_labels(
    conn: &mut SqliteConnection,
    issue_id: i64,
    label_ids: &[i64],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM issue_labels WHERE issue_id = ?")
        .bind(issue_id)
        .execute(&mut *conn)
        .await?;

    for label_id in label_ids {
        sqlx::query("INSERT OR IGNORE INTO issue_labels (issue_id, label_id) VALUES (?, ?)")
            .bind(issue_id)
            .bind(label_id)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

/// Replace an issue's assignee set.
pub async fn replace_assignees(
    conn: &mut SqliteConnection,
    issue_id: i64,
    user_ids: &[i64],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM issue_assignees WHERE issue_id = ?")
        .bind(issue_id)
        .execute(&mut *conn)
        .await?;

    for user_id in user_ids {
        sqlx::query("INSERT OR IGNORE INTO issue_assignees (issue_id, user_id) VALUES (?, ?)")
            .bind(issue_id)
            .bind(user_id)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

/// Record that `query_id` produced `issue_id` for `channel_id`.
pub async fn link_channel_issue(
    conn: &mut SqliteConnection,
    channel_id: i64,
    issue_id: i64,
    query_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO channel_issues (channel_id, issue_id, query_id) VALUES (?, ?, ?)
         ON CONFLICT(channel_id, issue_id, query_id) DO NOTHING",
    )
    .bind(channel_id)
    .bind(issue_id)
    .bind(query_id)
    .execute(conn)
    .await?;

    Ok(())
}

/// Set the local read flag. Returns `false` if the issue does not exist.
pub async fn set_already_read(
    pool: &sqlx::SqlitePool,
    issue_id: i64,
    already_read: bool,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE issues SET already_read = ? WHERE id = ?")
        .bind(already_read)
        .bind(issue_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Pick one closed pull request visible to `account_id` whose merged state
/// is unknown and which was updated at or after `updated_since`.
pub async fn select_undetermined_pull_request(
    pool: &sqlx::SqlitePool,
    account_id: i64,
    updated_since: i64,
) -> Result<Option<UndeterminedPullRequest>, sqlx::Error> {
    sqlx::query_as::<_, UndeterminedPullRequest>(
        "SELECT i.id, i.repo_owner, i.repo_name, i.number FROM issues i
         WHERE i.is_pull_request = 1
           AND i.merged IS NULL
           AND i.closed_at IS NOT NULL
           AND i.updated_at >= ?
           AND EXISTS (
             SELECT 1 FROM channel_issues ci
             JOIN channels c ON c.id = ci.channel_id
             WHERE ci.issue_id = i.id AND c.account_id = ?
           )
         ORDER BY i.updated_at DESC
         LIMIT 1",
    )
    .bind(updated_since)
    .bind(account_id)
    .fetch_optional(pool)
    .await
}

/// Store the determined merged state of a pull request.
pub async fn update_merged(
    pool: &sqlx::SqlitePool,
    issue_id: i64,
    merged: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE issues SET merged = ? WHERE id = ?")
        .bind(merged)
        .bind(issue_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::tempdir;

    async fn setup_test_db() -> sqlx::SqlitePool {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        std::mem::forget(dir);
        let pool = db::initialize(&db_path).await.unwrap();

        sqlx::raw_sql(
            "INSERT INTO accounts (id, display_name, url_base, api_url_base, access_token)
             VALUES (1, 'a', 'https://github.com', 'https://api.github.com', 't'),
                    (2, 'b', 'https://github.com', 'https://api.github.com', 't');
             INSERT INTO channels (id, account_id, display_name) VALUES (1, 1, 'c1'), (2, 2, 'c2');
             INSERT INTO queries (id, query) VALUES (1, 'repo:foo/bar');
             INSERT INTO github_users (id, login, avatar_url) VALUES (1, 'octocat', '');
             INSERT INTO labels (id, name, color) VALUES (1, 'bug', 'f00'), (2, 'ui', '0f0');",
        )
        .execute(&pool)
        .await
        .unwrap();

        pool
    }

    fn pull_request(id: i64, updated_at: i64, closed_at: Option<i64>) -> Issue {
        Issue {
            id,
            number: id,
            title: format!("PR {}", id),
            user_id: 1,
            repo_owner: "foo".to_string(),
            repo_name: "bar".to_string(),
            state: if closed_at.is_some() { "closed" } else { "open" }.to_string(),
            locked: false,
            comments: 0,
            created_at: 0,
            updated_at,
            closed_at,
            is_pull_request: true,
            body: String::new(),
            already_read: false,
            merged: None,
            milestone_id: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get_issue() {
        let pool = setup_test_db().await;
        let mut conn = pool.acquire().await.unwrap();

        let mut issue = pull_request(7, 1000, None);
        upsert_issue(&mut conn, &issue).await.unwrap();

        issue.title = "Renamed".to_string();
        issue.merged = Some(true);
        upsert_issue(&mut conn, &issue).await.unwrap();

        let fetched = get_issue(&mut conn, 7).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Renamed");
        assert_eq!(fetched.merged_state(), MergedState::Merged);
        assert!(get_issue(&mut conn, 8).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_labels_is_wholesale() {
        let pool = setup_test_db().await;
        let mut conn = pool.acquire().await.unwrap();
        upsert_issue(&mut conn, &pull_request(7, 1000, None)).await.unwrap();

        replace_labels(&mut conn, 7, &[1, 2]).await.unwrap();
        replace_labels(&mut conn, 7, &[2]).await.unwrap();

        let labels: Vec<(i64,)> = sqlx::query_as("SELECT label_id FROM issue_labels WHERE issue_id = 7")
            .fetch_all(&mut *conn)
            .await
            .unwrap();
        assert_eq!(labels, vec![(2,)]);
    }

    #[tokio::test]
    async fn test_set_already_read_missing_issue() {
        let pool = setup_test_db().await;
        assert!(!set_already_read(&pool, 404, true).await.unwrap());
    }

    #[tokio::test]
    async fn test_select_undetermined_pull_request_scoped_by_account() {
        let pool = setup_test_db().await;
        let mut conn = pool.acquire().await.unwrap();

        upsert_issue(&mut conn, &pull_request(1, 5000, Some(4000))).await.unwrap();
        upsert_issue(&mut conn, &pull_request(2, 100, Some(90))).await.unwrap();
        upsert_issue(&mut conn, &pull_request(3, 6000, None)).await.unwrap();
        for id in [1, 2, 3] {
            link_channel_issue(&mut conn, 1, id, 1).await.unwrap();
        }
        drop(conn);

        let candidate = select_undetermined_pull_request(&pool, 1, 1000).await.unwrap();
        assert_eq!(candidate.map(|pr| pr.id), Some(1));

        // Account 2 cannot see issues from account 1's channels
        assert!(select_undetermined_pull_request(&pool, 2, 0).await.unwrap().is_none());

        update_merged(&pool, 1, false).await.unwrap();
        assert!(select_undetermined_pull_request(&pool, 1, 1000).await.unwrap().is_none());
    }
}
