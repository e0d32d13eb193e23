//! Read-through caches for action tokens and the namespace table.
//!
//! Both caches are filled on demand and kept until the caller forces a
//! refresh or invalidates them. Nothing expires on a timer: when a cached
//! token goes stale the server rejects the mutation, and the caller
//! refreshes with `force = true`.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::debug;

use crate::codec::{self, Params};
use crate::error::{ApiError, Error, Result};
use crate::hooks::{Hook, HookPayload};
use crate::session::Session;

/// Actions whose tokens are fetched together by a standard refresh.
pub const STANDARD_TOKEN_ACTIONS: [&str; 8] = [
    "edit", "delete", "protect", "move", "block", "unblock", "email", "import",
];

/// Page the token queries are issued against.
pub const TOKEN_REFERENCE_PAGE: &str = "Main Page";

/// Which token query to run on a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenVariant {
    /// Tokens for [`STANDARD_TOKEN_ACTIONS`], from page info.
    #[default]
    Standard,
    /// The rollback token, from the latest revision.
    Rollback,
}

impl TokenVariant {
    fn params(self) -> Params {
        let params = Params::new()
            .with("action", "query")
            .with("titles", TOKEN_REFERENCE_PAGE);
        match self {
            TokenVariant::Standard => params
                .with("prop", "info")
                .with("intoken", STANDARD_TOKEN_ACTIONS.join("|")),
            TokenVariant::Rollback => params
                .with("prop", "revisions")
                .with("rvtoken", "rollback"),
        }
    }
}

/// Action name → token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenCache(HashMap<String, String>);

impl TokenCache {
    pub fn get(&self, action: &str) -> Option<&str> {
        self.0.get(action).map(String::as_str)
    }

    pub fn insert(&mut self, action: impl Into<String>, token: impl Into<String>) {
        self.0.insert(action.into(), token.into());
    }

    pub fn remove(&mut self, action: &str) -> Option<String> {
        self.0.remove(action)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Collect every `<action>token` field from the pages of a token query,
    /// including those nested in the pages' revisions.
    fn harvest(&mut self, response: &Value) -> Result<usize> {
        let pages = response
            .pointer("/query/pages")
            .ok_or_else(|| Error::UnexpectedResponse("token query lacks query.pages".into()))?;

        let mut found = 0;
        for page in children(pages) {
            found += self.harvest_object(page);
            if let Some(revisions) = page.get("revisions").and_then(Value::as_array) {
                for revision in revisions {
                    found += self.harvest_object(revision);
                }
            }
        }
        Ok(found)
    }

    fn harvest_object(&mut self, node: &Value) -> usize {
        let Some(object) = node.as_object() else {
            return 0;
        };
        let mut found = 0;
        for (key, value) in object {
            let Some(action) = key.strip_suffix("token").filter(|a| !a.is_empty()) else {
                continue;
            };
            if let Some(token) = value.as_str() {
                self.insert(action, token);
                found += 1;
            }
        }
        found
    }
}

/// One row of the namespace table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub id: i64,
    pub name: String,
    pub allows_subpages: bool,
}

/// Namespace id → namespace.
pub type NamespaceTable = BTreeMap<i64, Namespace>;

fn parse_namespaces(response: &Value) -> Result<NamespaceTable> {
    let namespaces = response
        .pointer("/query/namespaces")
        .ok_or_else(|| Error::UnexpectedResponse("siteinfo lacks query.namespaces".into()))?;

    let mut table = NamespaceTable::new();
    for ns in children(namespaces) {
        let Some(id) = ns.get("id").and_then(Value::as_i64) else {
            continue;
        };
        // Older servers put the name under "*", newer ones under "name".
        let name = codec::field(ns, "*")
            .or_else(|| codec::field(ns, "name"))
            .and_then(codec::text)
            .unwrap_or_default();
        table.insert(
            id,
            Namespace {
                id,
                name,
                allows_subpages: codec::flag(ns, "subpages"),
            },
        );
    }
    Ok(table)
}

/// Values of an object, or elements of an array.
fn children(node: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match node {
        Value::Object(map) => Box::new(map.values()),
        Value::Array(items) => Box::new(items.iter()),
        _ => Box::new(std::iter::empty()),
    }
}

impl Session {
    /// The token for `action`.
    ///
    /// Served from the cache unless `force` is set or the cache has no
    /// entry, in which case the `variant` query is re-run first. The
    /// [`Hook::GetTokens`] hook sees the cache on every call, cached or not,
    /// and the token is read after it returns.
    pub fn token(&mut self, action: &str, force: bool, variant: TokenVariant) -> Result<String> {
        if force || self.tokens.get(action).is_none() {
            self.refresh_tokens(variant)?;
        } else {
            self.fire_get_tokens()?;
        }
        self.tokens
            .get(action)
            .map(str::to_string)
            .ok_or_else(|| Error::UnexpectedResponse(format!("server issued no {action} token")))
    }

    /// The cached tokens, without refreshing.
    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    /// Drop every cached token; the next [`Session::token`] call refetches.
    pub fn invalidate_tokens(&mut self) {
        self.tokens.clear();
    }

    pub(crate) fn refresh_tokens(&mut self, variant: TokenVariant) -> Result<()> {
        let response = self.query(&variant.params())?;
        if let Some(e) = ApiError::from_response(&response) {
            return Err(e.into());
        }
        let found = self.tokens.harvest(&response)?;
        debug!(?variant, found, "token cache refreshed");
        self.fire_get_tokens()
    }

    fn fire_get_tokens(&mut self) -> Result<()> {
        let mut tokens = std::mem::take(&mut self.tokens);
        let fired = self.hooks().fire(Hook::GetTokens, HookPayload::Tokens(&mut tokens));
        self.tokens = tokens;
        Ok(fired?)
    }

    /// The namespace table, fetched on first use or when `force` is set.
    pub fn namespaces(&mut self, force: bool) -> Result<&NamespaceTable> {
        if force || self.namespaces.is_none() {
            let params = Params::new()
                .with("action", "query")
                .with("meta", "siteinfo")
                .with("siprop", "namespaces");
            let response = self.query(&params)?;
            if let Some(e) = ApiError::from_response(&response) {
                return Err(e.into());
            }
            let table = parse_namespaces(&response)?;
            debug!(count = table.len(), "namespace table refreshed");
            self.namespaces = Some(table);
        }
        match &self.namespaces {
            Some(table) => Ok(table),
            None => Err(Error::UnexpectedResponse("namespace table unavailable".into())),
        }
    }

    /// Whether pages in namespace `id` may have subpages. Unknown ids are
    /// reported as `false`.
    pub fn allows_subpages(&mut self, id: i64, force: bool) -> Result<bool> {
        Ok(self
            .namespaces(force)?
            .get(&id)
            .is_some_and(|ns| ns.allows_subpages))
    }
}
