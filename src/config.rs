//! Process settings and sync engine tuning.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Sync engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Outbound search calls allowed in flight at once.
    pub rate_limit_concurrency: usize,

    /// Seconds a search call keeps its slot after returning.
    pub rate_limit_cooldown_secs: u64,

    /// Search page size (GitHub caps it at 100).
    pub page_size: u32,

    /// Maximum characters of query text per outbound search.
    pub uri_limit: usize,

    /// Distinct repositories of one owner that widen to a `user:` clause.
    pub owner_merge_threshold: usize,

    /// The backward loop stops once its cursor is older than this.
    pub history_horizon_days: i64,

    /// Issues first seen with an older `updated_at` start out read.
    pub read_staleness_days: i64,

    /// First delay before restarting a failed worker.
    pub restart_backoff_initial_secs: u64,

    /// Upper bound on the restart delay. Zero restarts immediately.
    pub restart_backoff_max_secs: u64,

    /// Interval between merged-state polls, per account.
    pub merged_poll_interval_secs: u64,

    /// Only pull requests updated within this window are polled.
    pub merged_lookback_days: i64,

    /// Remote request timeout.
    pub request_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rate_limit_concurrency: 2,
            rate_limit_cooldown_secs: 5,
            page_size: 100,
            uri_limit: 5000,
            owner_merge_threshold: 5,
            history_horizon_days: 365,
            read_staleness_days: 30,
            restart_backoff_initial_secs: 1,
            restart_backoff_max_secs: 60,
            merged_poll_interval_secs: 3,
            merged_lookback_days: 3,
            request_timeout_secs: 30,
        }
    }
}

impl SyncConfig {
    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }

    pub fn merged_poll_interval(&self) -> Duration {
        Duration::from_secs(self.merged_poll_interval_secs)
    }
}

/// Process-level settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_path: PathBuf,
    pub alert_webhook_url: Option<String>,
    pub sync: SyncConfig,
}

/// Parse an optional numeric override, rejecting garbage.
fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, AppError> {
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            AppError::invalid_input_field(format!("{} is not a valid number: '{}'", name, raw), name)
        }),
        None => Ok(default),
    }
}

impl Settings {
    /// Read settings from `ISSUE_MIRROR_*` environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let database_path = match lookup("ISSUE_MIRROR_DATABASE_PATH") {
            Some(path) => PathBuf::from(path),
            None => {
                let home = lookup("HOME").ok_or_else(|| {
                    AppError::invalid_input_field(
                        "ISSUE_MIRROR_DATABASE_PATH is unset and HOME is unknown",
                        "ISSUE_MIRROR_DATABASE_PATH",
                    )
                })?;
                crate::db::default_db_path(&PathBuf::from(home))
            }
        };

        let alert_webhook_url = lookup("ISSUE_MIRROR_ALERT_WEBHOOK_URL").filter(|s| !s.is_empty());

        let d = SyncConfig::default();
        let sync = SyncConfig {
            rate_limit_concurrency: parse_var(
                &lookup,
                "ISSUE_MIRROR_RATE_LIMIT_CONCURRENCY",
                d.rate_limit_concurrency,
            )?,
            rate_limit_cooldown_secs: parse_var(
                &lookup,
                "ISSUE_MIRROR_RATE_LIMIT_COOLDOWN_SECS",
                d.rate_limit_cooldown_secs,
            )?,
            page_size: parse_var(&lookup, "ISSUE_MIRROR_PAGE_SIZE", d.page_size)?,
            uri_limit: parse_var(&lookup, "ISSUE_MIRROR_URI_LIMIT", d.uri_limit)?,
            owner_merge_threshold: parse_var(
                &lookup,
                "ISSUE_MIRROR_OWNER_MERGE_THRESHOLD",
                d.owner_merge_threshold,
            )?,
            history_horizon_days: parse_var(
                &lookup,
                "ISSUE_MIRROR_HISTORY_HORIZON_DAYS",
                d.history_horizon_days,
            )?,
            read_staleness_days: parse_var(
                &lookup,
                "ISSUE_MIRROR_READ_STALENESS_DAYS",
                d.read_staleness_days,
            )?,
            restart_backoff_initial_secs: parse_var(
                &lookup,
                "ISSUE_MIRROR_RESTART_BACKOFF_INITIAL_SECS",
                d.restart_backoff_initial_secs,
            )?,
            restart_backoff_max_secs: parse_var(
                &lookup,
                "ISSUE_MIRROR_RESTART_BACKOFF_MAX_SECS",
                d.restart_backoff_max_secs,
            )?,
            merged_poll_interval_secs: parse_var(
                &lookup,
                "ISSUE_MIRROR_MERGED_POLL_INTERVAL_SECS",
                d.merged_poll_interval_secs,
            )?,
            merged_lookback_days: parse_var(
                &lookup,
                "ISSUE_MIRROR_MERGED_LOOKBACK_DAYS",
                d.merged_lookback_days,
            )?,
            request_timeout_secs: parse_var(
                &lookup,
                "ISSUE_MIRROR_REQUEST_TIMEOUT_SECS",
                d.request_timeout_secs,
            )?,
        };

        if sync.rate_limit_concurrency == 0 {
            return Err(AppError::invalid_input_field(
                "rate limit concurrency must be at least 1",
                "ISSUE_MIRROR_RATE_LIMIT_CONCURRENCY",
            ));
        }

        Ok(Self {
            database_path,
            alert_webhook_url,
            sync,
        })
    }
}
