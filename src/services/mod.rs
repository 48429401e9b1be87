//! Sync engine services.
//!
//! Planning turns channels into outbound queries, workers fetch them through
//! the rate limiter, the merger writes results and the notifier fans out
//! unread-count changes. Everything remote goes through [`IssueSource`] so
//! tests can run without network access.

pub mod alert;
pub mod github_client;
pub mod issue_source;
pub mod merged_poller;
pub mod merger;
pub mod query_grammar;
pub mod query_planner;
pub mod rate_limiter;
pub mod supervisor;
pub mod sync_engine;
pub mod sync_worker;
pub mod unread_notifier;

pub use alert::{AlertSink, WebhookAlertSink};
pub use github_client::{GitHubClient, GitHubClientFactory};
pub use issue_source::{IssueSource, IssueSourceFactory};
pub use sync_engine::{SyncEngine, SyncHandle};
pub use unread_notifier::{UnreadCountNotifier, UnreadCountSubscription};
