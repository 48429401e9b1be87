//! Typed grammar for GitHub search query text.
//!
//! Only the qualifiers the planner can reason about are modelled; every other
//! token is kept verbatim as free text.

use crate::error::AppError;
use regex::Regex;
use std::sync::LazyLock;

static ISSUE_URL_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"/([^/]+)/([^/]+)/issues/\d+$"));

/// `owner/name` of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse `owner/name`. Anything else (extra slashes, empty parts) is `None`.
    pub fn parse(s: &str) -> Option<Self> {
        let (owner, name) = s.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(owner, name))
    }

    /// Derive the repository from an issue's canonical URL
    /// (`.../{owner}/{name}/issues/{number}`).
    pub fn from_issue_url(url: &str) -> Result<Self, AppError> {
        let re = ISSUE_URL_RE
            .as_ref()
            .map_err(|e| AppError::internal(format!("issue url pattern: {}", e)))?;

        let caps = re
            .captures(url)
            .ok_or_else(|| AppError::malformed(format!("no repository in issue url '{}'", url)))?;

        Ok(Self::new(&caps[1], &caps[2]))
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// One whitespace-separated token of a search query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Predicate {
    /// `repo:owner/name`
    Repo(RepoRef),
    /// `-repo:owner/name`
    ExcludeRepo(RepoRef),
    /// `user:login`
    User(String),
    /// `team:org/slug`
    Team { org: String, slug: String },
    /// Any other token, verbatim.
    FreeText(String),
}

impl Predicate {
    fn parse(token: &str) -> Self {
        if let Some(body) = token.strip_prefix("-repo:") {
            if let Some(repo) = RepoRef::parse(body) {
                return Self::ExcludeRepo(repo);
            }
        } else if let Some(body) = token.strip_prefix("repo:") {
            if let Some(repo) = RepoRef::parse(body) {
                return Self::Repo(repo);
            }
        } else if let Some(body) = token.strip_prefix("user:") {
            if !body.is_empty() && !body.contains('/') {
                return Self::User(body.to_string());
            }
        } else if let Some(body) = token.strip_prefix("team:") {
            if let Some(team) = RepoRef::parse(body) {
                return Self::Team {
                    org: team.owner,
                    slug: team.name,
                };
            }
        }

        Self::FreeText(token.to_string())
    }
}

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(repo) => write!(f, "repo:{}", repo),
            Self::ExcludeRepo(repo) => write!(f, "-repo:{}", repo),
            Self::User(login) => write!(f, "user:{}", login),
            Self::Team { org, slug } => write!(f, "team:{}/{}", org, slug),
            Self::FreeText(text) => write!(f, "{}", text),
        }
    }
}

/// A query split into predicates.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedQuery {
    pub predicates: Vec<Predicate>,
}

impl ParsedQuery {
    pub fn parse(text: &str) -> Self {
        Self {
            predicates: text.split_whitespace().map(Predicate::parse).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Whether the query may be coalesced with others: at least one positive
    /// `repo:`/`user:` predicate and nothing besides `repo:`, `user:` and
    /// `-repo:`.
    pub fn is_mergeable(&self) -> bool {
        let only_known = self.predicates.iter().all(|p| {
            matches!(
                p,
                Predicate::Repo(_) | Predicate::User(_) | Predicate::ExcludeRepo(_)
            )
        });
        let has_positive = self
            .predicates
            .iter()
            .any(|p| matches!(p, Predicate::Repo(_) | Predicate::User(_)));

        only_known && has_positive
    }

    pub fn repos(&self) -> impl Iterator<Item = &RepoRef> {
        self.predicates.iter().filter_map(|p| match p {
            Predicate::Repo(repo) => Some(repo),
            _ => None,
        })
    }

    pub fn users(&self) -> impl Iterator<Item = &str> {
        self.predicates.iter().filter_map(|p| match p {
            Predicate::User(login) => Some(login.as_str()),
            _ => None,
        })
    }

    pub fn exclusions(&self) -> impl Iterator<Item = &RepoRef> {
        self.predicates.iter().filter_map(|p| match p {
            Predicate::ExcludeRepo(repo) => Some(repo),
            _ => None,
        })
    }
}
