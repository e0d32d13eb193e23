//! Session configuration.
//!
//! Everything that influences how a session talks to the wiki is an
//! explicit field on [`SessionConfig`]; the transport and the handshake
//! read it from there.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `MWS_BASE_URL` | (required) | URL of the wiki's `api.php` |
//! | `MWS_USERNAME` | (required) | Account to log in as |
//! | `MWS_PASSWORD` | (required) | Password (or bot password) |
//! | `MWS_MAXLAG` | (absent) | `maxlag` forwarded on mutating calls; `0` disables |
//! | `MWS_USER_AGENT` | `mwsession/<version>` | `User-Agent` header |
//! | `MWS_PROXY` | (absent) | Proxy URL, e.g. `http://proxy:3128` |
//! | `MWS_PROXY_USER` / `MWS_PROXY_PASS` | (absent) | Proxy credentials |
//! | `MWS_HTTP_ECHO` | `false` | Log every request URL at `info` level |
//! | `MWS_TIMEOUT_SECS` | `30` | Whole-request timeout |
//! | `MWS_EDITS_PER_MINUTE` | (absent) | Edit rate for callers that throttle themselves |
//! | `MWS_NOBOTS` | `true` | Whether callers should honour `{{nobots}}` |
//! | `MWS_MAX_THROTTLE_WAIT_SECS` | `300` | Longest login throttle wait accepted |

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Default `User-Agent` header.
pub const DEFAULT_USER_AGENT: &str = concat!("mwsession/", env!("CARGO_PKG_VERSION"));

/// Missing or unparseable configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required setting {0} is not set")]
    Missing(&'static str),

    #[error("setting {key} has an invalid value: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Proxy the transport should route requests through.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Full proxy URL including scheme and port.
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Everything needed to open and run a session against one wiki.
#[derive(Clone)]
pub struct SessionConfig {
    /// URL of `api.php`. Fixed for the lifetime of the session.
    pub base_url: String,
    pub username: String,
    pub password: String,

    /// Replication lag ceiling (seconds) sent with login and mutating calls.
    pub maxlag: Option<u32>,

    pub user_agent: String,
    pub proxy: Option<ProxyConfig>,

    /// Log each request URL at `info` instead of `debug`.
    pub http_echo: bool,

    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_redirects: usize,

    /// Edits per minute the caller intends to make. Informational.
    pub edits_per_minute: Option<u32>,

    /// Whether callers should respect `{{nobots}}` exclusion templates.
    pub nobots: bool,

    /// Longest login throttle the handshake will sleep through. A server
    /// asking for more fails the login instead.
    pub max_throttle_wait: Duration,

    /// Probe the site's version and extensions before logging in.
    pub check_version: bool,
}

impl SessionConfig {
    /// A configuration with default settings for everything but the
    /// endpoint and credentials.
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            maxlag: None,
            user_agent: DEFAULT_USER_AGENT.into(),
            proxy: None,
            http_echo: false,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_redirects: 10,
            edits_per_minute: None,
            nobots: true,
            max_throttle_wait: Duration::from_secs(300),
            check_version: true,
        }
    }

    /// Builder: set the `maxlag` ceiling. `0` disables it.
    pub fn with_maxlag(mut self, maxlag: u32) -> Self {
        self.maxlag = (maxlag != 0).then_some(maxlag);
        self
    }

    /// Populate config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Populate config from an arbitrary key lookup, applying defaults
    /// where a key is absent.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let mut config = Self::new(
            required("MWS_BASE_URL")?,
            required("MWS_USERNAME")?,
            required("MWS_PASSWORD")?,
        );

        if let Some(maxlag) = parse_opt::<u32>(&lookup, "MWS_MAXLAG")? {
            config = config.with_maxlag(maxlag);
        }
        if let Some(ua) = lookup("MWS_USER_AGENT") {
            config.user_agent = ua;
        }
        if let Some(url) = lookup("MWS_PROXY") {
            config.proxy = Some(ProxyConfig {
                url,
                username: lookup("MWS_PROXY_USER"),
                password: lookup("MWS_PROXY_PASS"),
            });
        }
        if let Some(echo) = parse_opt::<bool>(&lookup, "MWS_HTTP_ECHO")? {
            config.http_echo = echo;
        }
        if let Some(secs) = parse_opt::<u64>(&lookup, "MWS_TIMEOUT_SECS")? {
            config.timeout = Duration::from_secs(secs);
        }
        config.edits_per_minute =
            parse_opt::<u32>(&lookup, "MWS_EDITS_PER_MINUTE")?.filter(|&n| n != 0);
        if let Some(nobots) = parse_opt::<bool>(&lookup, "MWS_NOBOTS")? {
            config.nobots = nobots;
        }
        if let Some(secs) = parse_opt::<u64>(&lookup, "MWS_MAX_THROTTLE_WAIT_SECS")? {
            config.max_throttle_wait = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn parse_opt<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("maxlag", &self.maxlag)
            .field("user_agent", &self.user_agent)
            .field("proxy", &self.proxy)
            .field("http_echo", &self.http_echo)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_redirects", &self.max_redirects)
            .field("edits_per_minute", &self.edits_per_minute)
            .field("nobots", &self.nobots)
            .field("max_throttle_wait", &self.max_throttle_wait)
            .field("check_version", &self.check_version)
            .finish()
    }
}
