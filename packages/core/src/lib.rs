//! Session engine for the MediaWiki action API.
//!
//! This crate logs a bot account into a wiki, keeps the session's tokens
//! and namespace table cached, and walks paginated list queries. It is the
//! foundation for the `mws` CLI; the HTTP transport lives in
//! `mwsession-http` so the engine itself stays I/O-agnostic.
//!
//! # Crate layout
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `codec` | [`Params`] encoding and JSON response decoding |
//! | `transport` | The [`Transport`] seam requests are sent through |
//! | `config` | [`SessionConfig`], including [`SessionConfig::from_env`] |
//! | `auth` | The login [`Handshake`]: token challenge and throttling |
//! | `session` | [`Session`], with `query`/`mutate` as the only request path |
//! | `cache` | Token cache and namespace table, refreshed on demand |
//! | `list` | [`ListQuery`] and [`Session::paginate`] |
//! | `endpoints` | Typed [`RecentChanges`] and [`LogEvents`] builders |
//! | `site` | Pre-login version and extension probe |
//! | `hooks` | Named [`Hook`] points and the [`Hooks`] observer trait |
//!
//! # Quick start
//!
//! ```rust,ignore
//! use mwsession::{ListQuery, Session, SessionConfig};
//!
//! let config = SessionConfig::from_env()?;
//! let transport = mwsession_http::HttpTransport::new(&config)?;
//! let mut session = Session::login(config, std::sync::Arc::new(transport))?;
//!
//! let pages = session.paginate(&ListQuery::new("allpages")?.hoist("title").limit(50))?;
//! let edit_token = session.token("edit", false, Default::default())?;
//! ```

mod auth;
mod cache;
mod codec;
mod config;
mod endpoints;
mod error;
mod hooks;
mod list;
mod session;
mod site;
mod transport;

#[cfg(test)]
mod mock;

pub use auth::{Handshake, Sleeper};
pub use cache::{
    Namespace, NamespaceTable, TokenCache, TokenVariant, STANDARD_TOKEN_ACTIONS,
    TOKEN_REFERENCE_PAGE,
};
pub use codec::{decode, encode, field, flag, text, Params, MULTI_VALUE_SEPARATOR};
pub use config::{ConfigError, ProxyConfig, SessionConfig, DEFAULT_USER_AGENT};
pub use endpoints::{Direction, LogEvents, RecentChanges, DEFAULT_LE_PROPS, DEFAULT_RC_PROPS};
pub use error::{ApiError, DecodeError, Error, LoginError, Result};
pub use hooks::{Hook, HookError, HookPayload, Hooks, NoHooks};
pub use list::{ListQuery, ParamPrefix, KNOWN_LISTS};
pub use session::{
    Identity, Session, BOT_GROUP, HIGH_LIMITS_RIGHT, HIGH_QUERY_LIMIT, QUERY_LIMIT,
};
pub use site::{SiteInfo, MINIMUM_VERSION};
pub use transport::{Method, Transport, TransportError};
