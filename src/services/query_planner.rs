//! Turns configured channels into the set of outbound searches to poll.
//!
//! Planning runs in two steps:
//! 1. [`QueryPlanner::resolve_channel`] expands each channel into query
//!    strings, calling the remote API for `teams`/`watching` channels.
//! 2. [`QueryPlanner::plan`] coalesces the strings of every channel into
//!    [`ActualQuery`] values, each with one [`Condition`] per channel that its
//!    results may be routed to.
//!
//! Coalescing only touches queries made of `repo:`/`user:`/`-repo:` clauses.
//! Within one account their clauses are deduplicated, `repo:` clauses covered
//! by a `user:` clause are dropped, owners with many repositories are widened
//! to `user:`, and the result is packed into queries under the URI limit.

use crate::config::SyncConfig;
use crate::error::AppError;
use crate::models::{Channel, ChannelKind, SystemKind};
use crate::services::issue_source::IssueSource;
use crate::services::query_grammar::{ParsedQuery, RepoRef};
use crate::services::sync_worker::CURSOR_QUALIFIER_LEN;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Repositories and owners a channel wants from a shared query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelScope {
    pub repositories: BTreeSet<RepoRef>,
    pub owners: BTreeSet<String>,
}

impl ChannelScope {
    fn contains(&self, repo: &RepoRef) -> bool {
        self.repositories.contains(repo) || self.owners.contains(&repo.owner)
    }
}

/// Routes results of an [`ActualQuery`] to one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub channel_id: i64,
    /// `None` accepts everything the query returns.
    pub scope: Option<ChannelScope>,
    pub unless_repositories: BTreeSet<RepoRef>,
}

impl Condition {
    /// Whether a result from `repo` belongs to this condition's channel.
    pub fn satisfy(&self, repo: &RepoRef) -> bool {
        if self.unless_repositories.contains(repo) {
            return false;
        }
        match &self.scope {
            Some(scope) => scope.contains(repo),
            None => true,
        }
    }
}

/// One physical outbound search and the channels its results feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActualQuery {
    pub query: String,
    /// Account whose credential runs the search.
    pub account_id: i64,
    pub conditions: Vec<Condition>,
}

/// A channel expanded to concrete query strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChannel {
    pub channel_id: i64,
    pub account_id: i64,
    pub queries: Vec<String>,
}

/// Greedily pack clauses into space-joined strings of at most `limit` chars.
/// A clause longer than `limit` on its own still gets its own string.
pub fn pack_clauses<I, S>(clauses: I, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut packed: Vec<String> = Vec::new();

    for clause in clauses {
        let clause = clause.as_ref();
        match packed.last_mut() {
            Some(last) if last.len() + 1 + clause.len() <= limit => {
                last.push(' ');
                last.push_str(clause);
            }
            _ => packed.push(clause.to_string()),
        }
    }

    packed
}

#[derive(Debug, Clone)]
pub struct QueryPlanner {
    /// Room left for query text once the sync cursor qualifier is appended.
    uri_limit: usize,
    owner_merge_threshold: usize,
}

impl QueryPlanner {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            uri_limit: config.uri_limit.saturating_sub(CURSOR_QUALIFIER_LEN),
            owner_merge_threshold: config.owner_merge_threshold,
        }
    }

    /// Expand a channel into query strings.
    ///
    /// Fails on unknown system kinds and on any listing error; partial
    /// coverage is never returned.
    pub async fn resolve_channel(
        &self,
        channel: &Channel,
        source: &dyn IssueSource,
    ) -> Result<ResolvedChannel, AppError> {
        let queries = match channel.kind()? {
            ChannelKind::Static(queries) => queries,
            ChannelKind::System(SystemKind::Teams) => {
                let teams = source.list_teams().await?;
                log::info!(
                    "[planner] Channel {} resolved {} teams",
                    channel.id,
                    teams.len()
                );
                let clauses: Vec<String> = teams
                    .iter()
                    .map(|t| format!("team:{}/{}", t.organization.login, t.slug))
                    .collect();
                pack_clauses(&clauses, self.uri_limit)
            }
            ChannelKind::System(SystemKind::Watching) => {
                let repos = source.list_watched_repos().await?;
                log::info!(
                    "[planner] Channel {} resolved {} watched repositories",
                    channel.id,
                    repos.len()
                );
                let clauses: Vec<String> = repos
                    .iter()
                    .map(|r| format!("repo:{}", r.full_name))
                    .collect();
                pack_clauses(&clauses, self.uri_limit)
            }
        };

        Ok(ResolvedChannel {
            channel_id: channel.id,
            account_id: channel.account_id,
            queries,
        })
    }

    /// Coalesce resolved channels into outbound queries.
    ///
    /// The output is deterministic for a given input.
    pub fn plan(&self, channels: &[ResolvedChannel]) -> Vec<ActualQuery> {
        // (account, text) -> channels, for queries that are polled as written
        let mut verbatim: BTreeMap<(i64, String), BTreeSet<i64>> = BTreeMap::new();
        // account -> (channel, exclusions) -> scope
        let mut mergeable: BTreeMap<i64, BTreeMap<(i64, BTreeSet<RepoRef>), ChannelScope>> =
            BTreeMap::new();

        for channel in channels {
            for text in &channel.queries {
                let parsed = ParsedQuery::parse(text);
                if parsed.is_empty() {
                    continue;
                }

                if parsed.is_mergeable() {
                    let exclusions: BTreeSet<RepoRef> = parsed.exclusions().cloned().collect();
                    let scope = mergeable
                        .entry(channel.account_id)
                        .or_default()
                        .entry((channel.channel_id, exclusions))
                        .or_default();
                    scope.repositories.extend(parsed.repos().cloned());
                    scope.owners.extend(parsed.users().map(String::from));
                } else {
                    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
                    verbatim
                        .entry((channel.account_id, normalized))
                        .or_default()
                        .insert(channel.channel_id);
                }
            }
        }

        let mut actual_queries: Vec<ActualQuery> = verbatim
            .into_iter()
            .map(|((account_id, query), channel_ids)| ActualQuery {
                query,
                account_id,
                conditions: channel_ids
                    .into_iter()
                    .map(|channel_id| Condition {
                        channel_id,
                        scope: None,
                        unless_repositories: BTreeSet::new(),
                    })
                    .collect(),
            })
            .collect();

        for (account_id, scopes) in mergeable {
            actual_queries.extend(self.coalesce(account_id, &scopes));
        }

        log::info!("[planner] Built {} actual queries", actual_queries.len());
        actual_queries
    }

    fn coalesce(
        &self,
        account_id: i64,
        scopes: &BTreeMap<(i64, BTreeSet<RepoRef>), ChannelScope>,
    ) -> Vec<ActualQuery> {
        let mut owners: BTreeSet<String> = BTreeSet::new();
        let mut repositories: BTreeSet<RepoRef> = BTreeSet::new();
        for scope in scopes.values() {
            owners.extend(scope.owners.iter().cloned());
            repositories.extend(scope.repositories.iter().cloned());
        }
        repositories.retain(|r| !owners.contains(&r.owner));

        let mut repos_per_owner: HashMap<&str, usize> = HashMap::new();
        for repo in &repositories {
            *repos_per_owner.entry(repo.owner.as_str()).or_default() += 1;
        }
        let frequent: BTreeSet<String> = repos_per_owner
            .into_iter()
            .filter(|(_, count)| *count >= self.owner_merge_threshold)
            .map(|(owner, _)| owner.to_string())
            .collect();
        if !frequent.is_empty() {
            log::debug!("[planner] Widening owners to user: clauses: {:?}", frequent);
        }
        owners.extend(frequent);
        repositories.retain(|r| !owners.contains(&r.owner));

        // Group clauses per packed query so each can be matched against scopes
        let mut packed: Vec<(String, ChannelScope)> = Vec::new();
        let clauses = owners
            .iter()
            .map(|o| (format!("user:{}", o), None::<&RepoRef>, Some(o)))
            .chain(
                repositories
                    .iter()
                    .map(|r| (format!("repo:{}", r), Some(r), None::<&String>)),
            );
        for (clause, repo, owner) in clauses {
            let fits = packed
                .last()
                .is_some_and(|(q, _)| q.len() + 1 + clause.len() <= self.uri_limit);
            if !fits {
                packed.push((String::new(), ChannelScope::default()));
            }
            if let Some((query, covered)) = packed.last_mut() {
                if !query.is_empty() {
                    query.push(' ');
                }
                query.push_str(&clause);
                if let Some(repo) = repo {
                    covered.repositories.insert(repo.clone());
                }
                if let Some(owner) = owner {
                    covered.owners.insert(owner.clone());
                }
            }
        }

        packed
            .into_iter()
            .map(|(query, covered)| {
                let conditions = scopes
                    .iter()
                    .filter(|(_, scope)| overlaps(scope, &covered))
                    .map(|((channel_id, exclusions), scope)| Condition {
                        channel_id: *channel_id,
                        scope: Some(scope.clone()),
                        unless_repositories: exclusions.clone(),
                    })
                    .collect();
                ActualQuery {
                    query,
                    account_id,
                    conditions,
                }
            })
            .collect()
    }
}

/// Whether a packed query returns anything `scope` asks for.
fn overlaps(scope: &ChannelScope, covered: &ChannelScope) -> bool {
    scope.owners.iter().any(|o| covered.owners.contains(o))
        || scope.repositories.iter().any(|r| covered.contains(r))
}
