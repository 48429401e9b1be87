//! Channel (saved search) model.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// System channel kinds whose queries are derived from the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemKind {
    /// Every team the credential belongs to.
    Teams,
    /// Every repository the credential watches.
    Watching,
}

impl SystemKind {
    /// Parse a stored system kind. Unknown kinds yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "teams" => Some(Self::Teams),
            "watching" => Some(Self::Watching),
            _ => None,
        }
    }
}

impl std::fmt::Display for SystemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Teams => write!(f, "teams"),
            Self::Watching => write!(f, "watching"),
        }
    }
}

/// What a channel searches for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    /// Explicit, ordered list of query strings.
    Static(Vec<String>),
    /// Queries resolved at sync time.
    System(SystemKind),
}

/// A saved search belonging to one account.
///
/// `queries` is stored as a JSON array string; `system` overrides it when set.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: i64,
    pub account_id: i64,
    pub display_name: String,
    pub system: Option<String>,
    pub queries: String,
}

impl Channel {
    /// Decode the stored columns into a [`ChannelKind`].
    ///
    /// Unknown system kinds and undecodable query lists are planning errors.
    pub fn kind(&self) -> Result<ChannelKind, AppError> {
        if let Some(system) = self.system.as_deref() {
            return SystemKind::parse(system)
                .map(ChannelKind::System)
                .ok_or_else(|| {
                    AppError::planning_for_channel(
                        format!("unknown system kind '{}'", system),
                        self.id,
                    )
                });
        }

        serde_json::from_str::<Vec<String>>(&self.queries)
            .map(ChannelKind::Static)
            .map_err(|e| {
                AppError::planning_for_channel(format!("invalid query list: {}", e), self.id)
            })
    }
}

/// Insert a channel and return its ID.
pub async fn insert_channel(
    pool: &sqlx::SqlitePool,
    account_id: i64,
    display_name: &str,
    kind: &ChannelKind,
) -> Result<i64, AppError> {
    let (system, queries) = match kind {
        ChannelKind::Static(queries) => (None, serde_json::to_string(queries)?),
        ChannelKind::System(kind) => (Some(kind.to_string()), "[]".to_string()),
    };

    let result = sqlx::query(
        "INSERT INTO channels (account_id, display_name, system, queries) VALUES (?, ?, ?, ?)",
    )
    .bind(account_id)
    .bind(display_name)
    .bind(system)
    .bind(queries)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// List every channel ordered by ID.
pub async fn list_channels(pool: &sqlx::SqlitePool) -> Result<Vec<Channel>, sqlx::Error> {
    sqlx::query_as::<_, Channel>(
        "SELECT id, account_id, display_name, system, queries FROM channels ORDER BY id",
    )
    .fetch_all(pool)
    .await
}

/// List the channels of one account ordered by ID.
pub async fn list_channels_for_account(
    pool: &sqlx::SqlitePool,
    account_id: i64,
) -> Result<Vec<Channel>, sqlx::Error> {
    sqlx::query_as::<_, Channel>(
        "SELECT id, account_id, display_name, system, queries FROM channels
         WHERE account_id = ? ORDER BY id",
    )
    .bind(account_id)
    .fetch_all(pool)
    .await
}
