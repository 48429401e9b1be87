//! Data models for the local mirror.
//!
//! Each model lives next to the queries that read and write it. Functions that
//! run inside a merge transaction take a `&mut SqliteConnection`; the rest take
//! the pool.

pub mod account;
pub mod channel;
pub mod issue;
pub mod query;
pub mod reference;
pub mod unread_count;

// Re-exports for convenient access
pub use account::{Account, NewAccount};
pub use channel::{Channel, ChannelKind, SystemKind};
pub use issue::{Issue, MergedState, UndeterminedPullRequest};
pub use reference::{GitHubUser, Label, Milestone};
pub use unread_count::UnreadCount;
