//! Typed builders for the commonly used list modules.
//!
//! | Builder          | Module          | Prefix |
//! |------------------|-----------------|--------|
//! | [`RecentChanges`]| `recentchanges` | `rc`   |
//! | [`LogEvents`]    | `logevents`     | `le`   |
//!
//! Each builder produces an ordinary [`ListQuery`], so the usual
//! pagination rules apply: `PreList` fires once, `hard_limit` truncates,
//! and rows come back in server order.

use std::fmt;

use serde_json::Value;

use crate::error::Result;
use crate::list::ListQuery;
use crate::session::Session;

/// Enumeration order of a timestamped list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Newest first (the server default).
    #[default]
    Older,
    Newer,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Older => "older",
            Self::Newer => "newer",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Recent changes ──────────────────────────────────────────────────────────

pub const DEFAULT_RC_PROPS: &[&str] = &[
    "user", "comment", "flags", "timestamp", "title", "ids", "sizes", "tags",
];

/// Query over `list=recentchanges`.
///
/// The show filters are tri-state: `None` leaves them out, `Some(true)`
/// sends `minor`, `Some(false)` sends `!minor`.
#[derive(Debug, Clone)]
pub struct RecentChanges {
    pub namespaces: Vec<i64>,
    pub tag: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub user: Option<String>,
    pub exclude_user: Option<String>,
    pub dir: Direction,
    pub minor: Option<bool>,
    pub bot: Option<bool>,
    pub anon: Option<bool>,
    pub redirect: Option<bool>,
    pub patrolled: Option<bool>,
    pub props: Vec<String>,
    pub limit: Option<i64>,
}

impl Default for RecentChanges {
    fn default() -> Self {
        Self {
            namespaces: vec![0],
            tag: None,
            start: None,
            end: None,
            user: None,
            exclude_user: None,
            dir: Direction::Older,
            minor: None,
            bot: None,
            anon: None,
            redirect: None,
            patrolled: None,
            props: DEFAULT_RC_PROPS.iter().map(|p| p.to_string()).collect(),
            limit: None,
        }
    }
}

impl RecentChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// `rcshow` value built from the tri-state filters.
    pub fn show(&self) -> Vec<String> {
        [
            ("minor", self.minor),
            ("bot", self.bot),
            ("anon", self.anon),
            ("redirect", self.redirect),
            ("patrolled", self.patrolled),
        ]
        .into_iter()
        .filter_map(|(name, state)| {
            state.map(|on| if on { name.to_string() } else { format!("!{name}") })
        })
        .collect()
    }

    pub fn to_query(&self) -> Result<ListQuery> {
        let mut query = ListQuery::new("recentchanges")?
            .namespaces(&self.namespaces)
            .param("rcdir", self.dir.as_str())
            .list_param("rcprop", &self.props)
            .list_param("rcshow", self.show());
        query = optional(query, "rctag", &self.tag);
        query = optional(query, "rcstart", &self.start);
        query = optional(query, "rcend", &self.end);
        query = optional(query, "rcuser", &self.user);
        query = optional(query, "rcexcludeuser", &self.exclude_user);
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        Ok(query)
    }
}

// ── Log events ──────────────────────────────────────────────────────────────

pub const DEFAULT_LE_PROPS: &[&str] = &[
    "ids", "title", "type", "user", "timestamp", "comment", "details",
];

/// Query over `list=logevents`.
#[derive(Debug, Clone)]
pub struct LogEvents {
    pub types: Vec<String>,
    pub user: Option<String>,
    pub title: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub dir: Direction,
    pub tag: Option<String>,
    pub props: Vec<String>,
    pub limit: Option<i64>,
}

impl Default for LogEvents {
    fn default() -> Self {
        Self {
            types: Vec::new(),
            user: None,
            title: None,
            start: None,
            end: None,
            dir: Direction::Older,
            tag: None,
            props: DEFAULT_LE_PROPS.iter().map(|p| p.to_string()).collect(),
            limit: None,
        }
    }
}

impl LogEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_query(&self) -> Result<ListQuery> {
        let mut query = ListQuery::new("logevents")?
            .param("ledir", self.dir.as_str())
            .list_param("leprop", &self.props)
            .list_param("letype", &self.types);
        query = optional(query, "leuser", &self.user);
        query = optional(query, "letitle", &self.title);
        query = optional(query, "lestart", &self.start);
        query = optional(query, "leend", &self.end);
        query = optional(query, "letag", &self.tag);
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        Ok(query)
    }
}

fn optional(query: ListQuery, key: &str, value: &Option<String>) -> ListQuery {
    match value {
        Some(v) => query.param(key, v.clone()),
        None => query,
    }
}

impl Session {
    pub fn recent_changes(&self, request: &RecentChanges) -> Result<Vec<Value>> {
        self.paginate(&request.to_query()?)
    }

    pub fn log_events(&self, request: &LogEvents) -> Result<Vec<Value>> {
        self.paginate(&request.to_query()?)
    }
}
