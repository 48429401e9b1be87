//! Canonical query rows and the sync cursors derived from them.
//!
//! A cursor is never stored directly: it is the oldest/newest `updated_at`
//! among the issues that the query produced, across every channel.

use sqlx::SqliteConnection;

/// Find the query row for `text`, creating it on first sight.
pub async fn find_or_create_query(
    conn: &mut SqliteConnection,
    text: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query("INSERT INTO queries (query) VALUES (?) ON CONFLICT(query) DO NOTHING")
        .bind(text)
        .execute(&mut *conn)
        .await?;

    let (id,): (i64,) = sqlx::query_as("SELECT id FROM queries WHERE query = ?")
        .bind(text)
        .fetch_one(&mut *conn)
        .await?;

    Ok(id)
}

/// Oldest issue `updated_at` recorded for a query, if any.
pub async fn oldest_updated_at(
    pool: &sqlx::SqlitePool,
    text: &str,
) -> Result<Option<i64>, sqlx::Error> {
    let (oldest,): (Option<i64>,) = sqlx::query_as(
        "SELECT MIN(i.updated_at) FROM issues i
         JOIN channel_issues ci ON ci.issue_id = i.id
         JOIN queries q ON q.id = ci.query_id
         WHERE q.query = ?",
    )
    .bind(text)
    .fetch_one(pool)
    .await?;

    Ok(oldest)
}

/// Newest issue `updated_at` recorded for a query, if any.
pub async fn newest_updated_at(
    pool: &sqlx::SqlitePool,
    text: &str,
) -> Result<Option<i64>, sqlx::Error> {
    let (newest,): (Option<i64>,) = sqlx::query_as(
        "SELECT MAX(i.updated_at) FROM issues i
         JOIN channel_issues ci ON ci.issue_id = i.id
         JOIN queries q ON q.id = ci.query_id
         WHERE q.query = ?",
    )
    .bind(text)
    .fetch_one(pool)
    .await?;

    Ok(newest)
}
