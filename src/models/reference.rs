//! Reference data attached to issues: users, labels and milestones.
//!
//! These rows hold no local state, so every write overwrites the remote
//! fields in place. `ON CONFLICT DO UPDATE` is used instead of `REPLACE` so
//! the rows referenced by issues are never deleted.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

/// A GitHub account (author or assignee).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct GitHubUser {
    pub id: i64,
    pub login: String,
    pub avatar_url: String,
}

/// A repository label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Label {
    pub id: i64,
    pub name: String,
    pub color: String,
    #[serde(rename = "default", default)]
    pub is_default: bool,
}

/// A repository milestone. Timestamps are Unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Milestone {
    pub id: i64,
    pub number: i64,
    pub title: String,
    pub description: String,
    pub state: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub closed_at: Option<i64>,
}

pub async fn upsert_user(conn: &mut SqliteConnection, user: &GitHubUser) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO github_users (id, login, avatar_url) VALUES (?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           login = excluded.login,
           avatar_url = excluded.avatar_url",
    )
    .bind(user.id)
    .bind(&user.login)
    .bind(&user.avatar_url)
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn upsert_label(conn: &mut SqliteConnection, label: &Label) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO labels (id, name, color, is_default) VALUES (?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           color = excluded.color,
           is_default = excluded.is_default",
    )
    .bind(label.id)
    .bind(&label.name)
    .bind(&label.color)
    .bind(label.is_default)
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn upsert_milestone(
    conn: &mut SqliteConnection,
    milestone: &Milestone,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO milestones (id, number, title, description, state, created_at, updated_at, closed_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           number = excluded.number,
           title = excluded.title,
           description = excluded.description,
           state = excluded.state,
           created_at = excluded.created_at,
           updated_at = excluded.updated_at,
           closed_at = excluded.closed_at",
    )
    .bind(milestone.id)
    .bind(milestone.number)
    .bind(&milestone.title)
    .bind(&milestone.description)
    .bind(&milestone.state)
    .bind(milestone.created_at)
    .bind(milestone.updated_at)
    .bind(milestone.closed_at)
    .execute(conn)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_upserts_overwrite_in_place() {
        let dir = tempdir().unwrap();
        let pool = db::initialize(&dir.path().join("test.db")).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let mut user = GitHubUser {
            id: 1,
            login: "octocat".to_string(),
            avatar_url: "https://avatars.example/1".to_string(),
        };
        upsert_user(&mut conn, &user).await.unwrap();
        user.login = "octodog".to_string();
        upsert_user(&mut conn, &user).await.unwrap();

        let label = Label {
            id: 5,
            name: "bug".to_string(),
            color: "d73a4a".to_string(),
            is_default: true,
        };
        upsert_label(&mut conn, &label).await.unwrap();
        upsert_label(&mut conn, &label).await.unwrap();

        let users: Vec<GitHubUser> = sqlx::query_as("SELECT id, login, avatar_url FROM github_users")
            .fetch_all(&mut *conn)
            .await
            .unwrap();
        assert_eq!(users, vec![user]);

        let labels: Vec<Label> = sqlx::query_as("SELECT id, name, color, is_default FROM labels")
            .fetch_all(&mut *conn)
            .await
            .unwrap();
        assert_eq!(labels, vec![label]);
    }

    #[test]
    fn test_label_deserializes_github_default_field() {
        let label: Label =
            serde_json::from_str(r#"{"id":1,"name":"bug","color":"fff","default":true}"#).unwrap();
        assert!(label.is_default);
    }
}
