//! Derived per-channel unread counts.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Number of unread issues visible in a channel. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub channel_id: i64,
    pub count: i64,
}

/// Full snapshot: one entry per channel, including channels with zero unread.
pub async fn unread_counts_for_channels(
    pool: &sqlx::SqlitePool,
) -> Result<Vec<UnreadCount>, sqlx::Error> {
    sqlx::query_as::<_, UnreadCount>(
        "SELECT c.id AS channel_id, COUNT(DISTINCT i.id) AS count
         FROM channels c
         LEFT JOIN channel_issues ci ON ci.channel_id = c.id
         LEFT JOIN issues i ON i.id = ci.issue_id AND i.already_read = 0
         GROUP BY c.id
         ORDER BY c.id",
    )
    .fetch_all(pool)
    .await
}

/// Counts for every channel that shows at least one of `issue_ids`.
pub async fn unread_counts_affected_by_issues(
    pool: &sqlx::SqlitePool,
    issue_ids: &[i64],
) -> Result<Vec<UnreadCount>, sqlx::Error> {
    if issue_ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders: String = issue_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let query = format!(
        "SELECT c.id AS channel_id, COUNT(DISTINCT i.id) AS count
         FROM channels c
         LEFT JOIN channel_issues ci ON ci.channel_id = c.id
         LEFT JOIN issues i ON i.id = ci.issue_id AND i.already_read = 0
         WHERE c.id IN (SELECT DISTINCT channel_id FROM channel_issues WHERE issue_id IN ({}))
         GROUP BY c.id
         ORDER BY c.id",
        placeholders
    );

    let mut q = sqlx::query_as::<_, UnreadCount>(&query);
    for id in issue_ids {
        q = q.bind(*id);
    }

    q.fetch_all(pool).await
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

        // Channel 1 shows issues 10 (unread) and 11 (read), issue 10 via two
        // queries. Channel 2 shows issue 11. Channel 3 is empty.
        sqlx::raw_sql(
            "INSERT INTO accounts (id, display_name, url_base, api_url_base, access_token)
             VALUES (1, 'a', 'https://github.com', 'https://api.github.com', 't');
             INSERT INTO channels (id, account_id, display_name) VALUES (1, 1, 'a'), (2, 1, 'b'), (3, 1, 'c');
             INSERT INTO queries (id, query) VALUES (1, 'repo:foo/bar'), (2, 'user:foo');
             INSERT INTO github_users (id, login, avatar_url) VALUES (1, 'u', '');
             INSERT INTO issues (id, number, title, user_id, repo_owner, repo_name, state, created_at, updated_at, already_read)
             VALUES (10, 1, 'a', 1, 'foo', 'bar', 'open', 0, 0, 0),
                    (11, 2, 'b', 1, 'foo', 'bar', 'open', 0, 0, 1);
             INSERT INTO channel_issues (channel_id, issue_id, query_id)
             VALUES (1, 10, 1), (1, 10, 2), (1, 11, 1), (2, 11, 2);",
        )
        .execute(&pool)
        .await
        .unwrap();

        pool
    }

    #[tokio::test]
    async fn test_snapshot_includes_zero_counts() {
        let pool = setup_test_db().await;
        let counts = unread_counts_for_channels(&pool).await.unwrap();
        assert_eq!(
            counts,
            vec![
                UnreadCount { channel_id: 1, count: 1 },
                UnreadCount { channel_id: 2, count: 0 },
                UnreadCount { channel_id: 3, count: 0 },
            ]
        );
    }

    #[tokio::test]
    async fn test_affected_by_issues() {
        let pool = setup_test_db().await;

        let counts = unread_counts_affected_by_issues(&pool, &[11]).await.unwrap();
        assert_eq!(
            counts,
            vec![
                UnreadCount { channel_id: 1, count: 1 },
                UnreadCount { channel_id: 2, count: 0 },
            ]
        );

        assert!(unread_counts_affected_by_issues(&pool, &[]).await.unwrap().is_empty());
    }
}
