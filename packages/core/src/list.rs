//! Cursor-driven pagination over `list=` query modules.
//!
//! Every list module namespaces its parameters with a two-letter prefix:
//! `recentchanges` takes `rclimit`, `rccontinue`, `rcnamespace`, and so on.
//! [`ParamPrefix`] validates the prefix once and derives those keys, so a
//! typo fails up front instead of sending parameters the server ignores.
//!
//! [`Session::paginate`] walks a [`ListQuery`] page by page:
//!
//! 1. page size is `min(query_limit + 1, hard_limit)`;
//! 2. each response's rows are appended in server order, hoisted if asked;
//! 3. a `hard_limit` truncates to exactly that many rows, even mid-page;
//! 4. the `<prefix>continue` cursor from `query-continue` is echoed back
//!    until the server stops sending one.
//!
//! Pagination is all-or-nothing: an error on any page discards the rows
//! from earlier pages. There is no iteration cap besides `hard_limit`.

use serde_json::Value;
use tracing::debug;

use crate::codec::{self, Params};
use crate::error::{ApiError, Error, Result};
use crate::hooks::{Hook, HookPayload};
use crate::session::Session;

const LIMIT_SUFFIX: &str = "limit";
const CONTINUE_SUFFIX: &str = "continue";
const NAMESPACE_SUFFIX: &str = "namespace";

/// Well-known list modules and their parameter prefixes.
pub const KNOWN_LISTS: &[(&str, &str)] = &[
    ("allcategories", "ac"),
    ("allimages", "ai"),
    ("alllinks", "al"),
    ("allpages", "ap"),
    ("allusers", "au"),
    ("backlinks", "bl"),
    ("blocks", "bk"),
    ("categorymembers", "cm"),
    ("deletedrevs", "dr"),
    ("embeddedin", "ei"),
    ("exturlusage", "eu"),
    ("imageusage", "iu"),
    ("logevents", "le"),
    ("protectedtitles", "pt"),
    ("random", "rn"),
    ("recentchanges", "rc"),
    ("search", "sr"),
    ("tags", "tg"),
    ("usercontribs", "uc"),
    ("users", "us"),
    ("watchlist", "wl"),
    ("watchlistraw", "wr"),
];

/// A validated two-letter parameter prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamPrefix(String);

impl ParamPrefix {
    /// Accepts exactly two lowercase ASCII letters.
    pub fn new(code: &str) -> Result<Self> {
        if code.len() == 2 && code.bytes().all(|b| b.is_ascii_lowercase()) {
            Ok(Self(code.to_string()))
        } else {
            Err(Error::InvalidArgument(format!(
                "parameter prefix must be two lowercase letters, got {code:?}"
            )))
        }
    }

    /// The prefix of a well-known list module.
    pub fn for_list(list: &str) -> Option<Self> {
        KNOWN_LISTS
            .iter()
            .find(|(name, _)| *name == list)
            .map(|(_, code)| Self(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn key(&self, suffix: &str) -> String {
        format!("{}{suffix}", self.0)
    }

    pub fn limit_key(&self) -> String {
        self.key(LIMIT_SUFFIX)
    }

    pub fn continue_key(&self) -> String {
        self.key(CONTINUE_SUFFIX)
    }

    pub fn namespace_key(&self) -> String {
        self.key(NAMESPACE_SUFFIX)
    }
}

/// Describes one paginated list query.
#[derive(Debug, Clone)]
pub struct ListQuery {
    list: String,
    prefix: ParamPrefix,
    params: Params,
    hard_limit: Option<i64>,
    hoist: Option<String>,
}

impl ListQuery {
    /// A query against a well-known list module.
    pub fn new(list: &str) -> Result<Self> {
        let prefix = ParamPrefix::for_list(list).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "unknown list module {list:?}; use ListQuery::with_prefix"
            ))
        })?;
        Ok(Self::build(list, prefix))
    }

    /// A query against any list module, with an explicit prefix.
    pub fn with_prefix(list: &str, prefix: &str) -> Result<Self> {
        Ok(Self::build(list, ParamPrefix::new(prefix)?))
    }

    fn build(list: &str, prefix: ParamPrefix) -> Self {
        Self {
            list: list.to_string(),
            prefix,
            params: Params::new(),
            hard_limit: None,
            hoist: None,
        }
    }

    /// Add a fixed parameter. Keys are sent as given, so module parameters
    /// must already carry the prefix.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.set(key, value);
        self
    }

    /// Add a multi-value parameter. An empty collection leaves it absent.
    pub fn list_param<I>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        self.params.set_list(key, values);
        self
    }

    /// Restrict to namespaces, sent as `<prefix>namespace`.
    pub fn namespaces<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        self.params.set_list(self.prefix.namespace_key(), ids);
        self
    }

    /// Cap the total number of rows returned across all pages.
    pub fn limit(mut self, limit: i64) -> Self {
        self.hard_limit = Some(limit);
        self
    }

    /// Return only the value at `key` from each row.
    pub fn hoist(mut self, key: impl Into<String>) -> Self {
        self.hoist = Some(key.into());
        self
    }

    /// Parse a user-supplied row limit; only whole numbers are accepted.
    pub fn parse_limit(raw: &str) -> Result<i64> {
        raw.trim().parse::<i64>().map_err(|_| {
            Error::InvalidArgument(format!("limit must be a whole number, got {raw:?}"))
        })
    }

    pub fn list(&self) -> &str {
        &self.list
    }

    pub fn prefix(&self) -> &ParamPrefix {
        &self.prefix
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn hard_limit(&self) -> Option<i64> {
        self.hard_limit
    }

    pub fn hoist_key(&self) -> Option<&str> {
        self.hoist.as_deref()
    }
}

impl Session {
    /// Run a list query to completion and return its rows in server order.
    pub fn paginate(&self, query: &ListQuery) -> Result<Vec<Value>> {
        let hard_limit = match query.hard_limit {
            None => None,
            Some(n) if n < 0 => {
                return Err(Error::InvalidArgument(format!(
                    "limit must not be negative, got {n}"
                )))
            }
            Some(0) => return Ok(Vec::new()),
            Some(n) => Some(usize::try_from(n).map_err(|_| {
                Error::InvalidArgument(format!("limit {n} is out of range"))
            })?),
        };

        let prefix = &query.prefix;
        let continue_key = prefix.continue_key();
        let namespace_key = prefix.namespace_key();

        let mut params = query.params.clone();
        params.set("action", "query");
        params.set("list", query.list.clone());

        let ceiling = self.query_limit() as usize + 1;
        let per_page = hard_limit.map_or(ceiling, |n| n.min(ceiling));
        params.set(prefix.limit_key(), per_page.to_string());

        if params.get(&namespace_key).is_some_and(str::is_empty) {
            params.remove(&namespace_key);
        }

        self.hooks().fire(Hook::PreList, HookPayload::Params(&mut params))?;

        let mut rows = Vec::new();
        let mut cursor: Option<String> = None;
        let mut page = 0usize;
        loop {
            if let Some(c) = cursor.take() {
                params.set(continue_key.clone(), c);
            }

            let response = self.query(&params)?;
            if let Some(e) = ApiError::from_response(&response) {
                return Err(e.into());
            }

            let before = rows.len();
            flatten_page(&response, query.hoist_key(), &mut rows);
            page += 1;
            debug!(list = %query.list, page, rows = rows.len() - before, "fetched list page");

            if let Some(limit) = hard_limit {
                if rows.len() >= limit {
                    rows.truncate(limit);
                    break;
                }
            }

            match continuation(&response, &query.list, &continue_key) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(rows)
    }
}

/// Append the rows of every result container under `query`.
fn flatten_page(response: &Value, hoist: Option<&str>, rows: &mut Vec<Value>) {
    let Some(Value::Object(containers)) = response.get("query") else {
        return;
    };
    for container in containers.values() {
        let items: Box<dyn Iterator<Item = &Value>> = match container {
            Value::Array(items) => Box::new(items.iter()),
            Value::Object(map) => Box::new(map.values()),
            _ => continue,
        };
        for row in items {
            let row = match hoist {
                Some(key) => row.get(key).cloned().unwrap_or(Value::Null),
                None => row.clone(),
            };
            rows.push(row);
        }
    }
}

/// The next cursor, read from `query-continue.<list>.<prefix>continue`.
/// Any other module's block carrying the same key is accepted too.
fn continuation(response: &Value, list: &str, key: &str) -> Option<String> {
    let blocks = codec::field(response, "query-continue")?;
    if let Some(cursor) = blocks
        .get(list)
        .and_then(|b| codec::field(b, key))
        .and_then(codec::text)
    {
        return Some(cursor);
    }
    blocks
        .as_object()?
        .values()
        .find_map(|b| codec::field(b, key).and_then(codec::text))
}
