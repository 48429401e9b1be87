//! Remote account model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A GitHub credential plus the base URLs it talks to.
///
/// Every channel belongs to exactly one account, and every outbound call
/// made on a channel's behalf uses this account's token.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Local database ID.
    pub id: i64,

    /// Display name for the account.
    pub display_name: String,

    /// Web URL base (e.g., `https://github.com`).
    pub url_base: String,

    /// REST API URL base (e.g., `https://api.github.com`).
    pub api_url_base: String,

    /// Personal access token.
    #[serde(skip_serializing)]
    pub access_token: String,

    /// Unix timestamp of creation.
    pub created_at: i64,
}

/// Data required to create or update an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    pub display_name: String,
    pub url_base: String,
    pub api_url_base: String,
    pub access_token: String,
}

impl Account {
    /// Normalize a base URL by removing trailing slashes.
    pub fn normalize_url(url: &str) -> String {
        url.trim_end_matches('/').to_string()
    }
}

/// Insert a new account and return the stored row.
pub async fn insert_account(
    pool: &sqlx::SqlitePool,
    account: &NewAccount,
) -> Result<Account, sqlx::Error> {
    let id = sqlx::query(
        "INSERT INTO accounts (display_name, url_base, api_url_base, access_token)
         VALUES (?, ?, ?, ?)",
    )
    .bind(&account.display_name)
    .bind(Account::normalize_url(&account.url_base))
    .bind(Account::normalize_url(&account.api_url_base))
    .bind(&account.access_token)
    .execute(pool)
    .await?
    .last_insert_rowid();

    get_account(pool, id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

/// Look up an account by ID.
pub async fn get_account(pool: &sqlx::SqlitePool, id: i64) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(
        "SELECT id, display_name, url_base, api_url_base, access_token, created_at
         FROM accounts WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// List all accounts ordered by ID.
pub async fn list_accounts(pool: &sqlx::SqlitePool) -> Result<Vec<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(
        "SELECT id, display_name, url_base, api_url_base, access_token, created_at
         FROM accounts ORDER BY id",
    )
    .fetch_all(pool)
    .await
}

/// Administrative update of an account's credential and URLs.
///
/// Returns `false` if no account has the given ID.
pub async fn update_account(
    pool: &sqlx::SqlitePool,
    id: i64,
    account: &NewAccount,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE accounts SET display_name = ?, url_base = ?, api_url_base = ?, access_token = ?
         WHERE id = ?",
    )
    .bind(&account.display_name)
    .bind(Account::normalize_url(&account.url_base))
    .bind(Account::normalize_url(&account.api_url_base))
    .bind(&account.access_token)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
