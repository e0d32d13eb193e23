//! The authenticated session and its request chokepoint.
//!
//! A [`Session`] is produced by the login handshake ([`Session::login`] or
//! [`crate::Handshake`]) and from then on every remote call goes through
//! [`Session::query`] (read, `GET`) or [`Session::mutate`] (write, `POST`).
//!
//! Neither method raises on an error object in the response: the caller
//! decides what a remote error means. Only transport, decode, hook and
//! assertion failures are raised here.
//!
//! A session is single-owner. Cache refreshes take `&mut self`; callers
//! sharing one session across threads must serialise access themselves.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::Handshake;
use crate::cache::{NamespaceTable, TokenCache};
use crate::codec::{self, Params};
use crate::config::SessionConfig;
use crate::error::{ApiError, Error, Result};
use crate::hooks::{Hook, HookPayload, Hooks};
use crate::site::SiteInfo;
use crate::transport::{Method, Transport};

/// Page-size ceiling for ordinary accounts.
pub const QUERY_LIMIT: u32 = 499;

/// Page-size ceiling for accounts holding [`HIGH_LIMITS_RIGHT`].
pub const HIGH_QUERY_LIMIT: u32 = 4999;

/// The right that unlocks [`HIGH_QUERY_LIMIT`].
pub const HIGH_LIMITS_RIGHT: &str = "apihighlimits";

/// Group membership that marks an account as a bot.
pub const BOT_GROUP: &str = "bot";

/// Encodes, sends and decodes single requests. Knows nothing about login
/// state; the handshake uses it before a [`Session`] exists.
pub(crate) struct ApiClient {
    base_url: String,
    transport: Arc<dyn Transport>,
    echo: bool,
}

impl ApiClient {
    pub(crate) fn new(config: &SessionConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            base_url: config.base_url.clone(),
            transport,
            echo: config.http_echo,
        }
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn request(&self, params: &Params, method: Method) -> Result<Value> {
        let mut params = params.clone();
        params.set("format", "json");

        if self.echo {
            info!("{method}: {}?{}", self.base_url, params.to_query_string());
        } else {
            debug!(%method, action = params.get("action").unwrap_or(""), "api request");
        }

        let body = self
            .transport
            .send(&self.base_url, &params.to_payload(), method)?;
        Ok(codec::decode(&body)?)
    }
}

/// Who the session is logged in as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub is_bot: bool,
}

/// Account details gathered by the handshake after a successful login.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct UserProfile {
    pub(crate) rights: BTreeSet<String>,
    pub(crate) groups: Vec<String>,
}

/// An authenticated connection to one wiki.
pub struct Session {
    client: ApiClient,
    hooks: Arc<dyn Hooks>,
    config: SessionConfig,
    identity: Identity,
    rights: BTreeSet<String>,
    groups: Vec<String>,
    query_limit: u32,
    site: Option<SiteInfo>,
    pub(crate) tokens: TokenCache,
    pub(crate) namespaces: Option<NamespaceTable>,
}

impl Session {
    /// Log in with `config` over `transport`, using default hooks and a
    /// real sleep for throttled logins.
    pub fn login(config: SessionConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Handshake::new(config, transport).run()
    }

    /// Assemble a session from a completed handshake. The query limit is
    /// fixed here and never changes afterwards.
    pub(crate) fn establish(
        client: ApiClient,
        hooks: Arc<dyn Hooks>,
        config: SessionConfig,
        profile: UserProfile,
        site: Option<SiteInfo>,
    ) -> Self {
        let query_limit = if profile.rights.contains(HIGH_LIMITS_RIGHT) {
            HIGH_QUERY_LIMIT
        } else {
            QUERY_LIMIT
        };
        let identity = Identity {
            username: config.username.clone(),
            is_bot: profile.groups.iter().any(|g| g == BOT_GROUP),
        };
        Self {
            client,
            hooks,
            config,
            identity,
            rights: profile.rights,
            groups: profile.groups,
            query_limit,
            site,
            tokens: TokenCache::default(),
            namespaces: None,
        }
    }

    // ── Requests ────────────────────────────────────────────────────────────

    /// Issue a read request.
    pub fn query(&self, params: &Params) -> Result<Value> {
        self.client.request(params, Method::Get)
    }

    /// Issue a write request.
    ///
    /// Forwards the configured `maxlag` unless the caller set one. When the
    /// session is a bot and the caller asked the server to `assert=user`,
    /// the assertion is downgraded to `bot` before sending; if the server
    /// then reports the assertion failed, this returns
    /// [`Error::AssertionFailure`].
    pub fn mutate(&self, params: &Params) -> Result<Value> {
        let mut params = params.clone();
        if let Some(maxlag) = self.config.maxlag {
            if !params.contains_key("maxlag") {
                params.set("maxlag", maxlag.to_string());
            }
        }

        let downgraded = self.identity.is_bot && params.get("assert") == Some("user");
        if downgraded {
            params.set("assert", "bot");
        }

        self.hooks.fire(Hook::PreMutate, HookPayload::Params(&mut params))?;
        let mut response = self.client.request(&params, Method::Post)?;
        self.hooks
            .fire(Hook::PostMutate, HookPayload::Response(&mut response))?;

        if downgraded {
            if let Some(detail) = assertion_failure(&response) {
                return Err(Error::AssertionFailure(detail));
            }
        }
        Ok(response)
    }

    /// End the server-side session.
    pub fn logout(&self) -> Result<()> {
        let response = self.mutate(&Params::new().with("action", "logout"))?;
        match ApiError::from_response(&response) {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Run `operation`, then log out whether or not it succeeded.
    ///
    /// The operation's outcome is returned. A failed logout is only logged,
    /// so it never masks the operation's own error.
    pub fn run_then_logout<T>(
        &mut self,
        operation: impl FnOnce(&mut Session) -> Result<T>,
    ) -> Result<T> {
        let outcome = operation(self);
        if let Err(e) = self.logout() {
            warn!("logout failed: {e}");
        }
        outcome
    }

    /// Purge the server-side cache of the given pages.
    pub fn purge<I>(&self, titles: I) -> Result<Value>
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        let mut params = Params::new().with("action", "purge");
        params.set_list("titles", titles);
        if !params.contains_key("titles") {
            return Err(Error::InvalidArgument("purge needs at least one title".into()));
        }
        let response = self.mutate(&params)?;
        match ApiError::from_response(&response) {
            Some(e) => Err(e.into()),
            None => Ok(response),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn username(&self) -> &str {
        &self.identity.username
    }

    pub fn is_bot(&self) -> bool {
        self.identity.is_bot
    }

    pub fn rights(&self) -> &BTreeSet<String> {
        &self.rights
    }

    pub fn has_right(&self, right: &str) -> bool {
        self.rights.contains(right)
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Page-size ceiling for list queries: [`QUERY_LIMIT`] or [`HIGH_QUERY_LIMIT`].
    pub fn query_limit(&self) -> u32 {
        self.query_limit
    }

    pub fn maxlag(&self) -> Option<u32> {
        self.config.maxlag
    }

    pub fn edit_rate(&self) -> Option<u32> {
        self.config.edits_per_minute
    }

    pub fn nobots(&self) -> bool {
        self.config.nobots
    }

    /// Version and extension details, if the site was probed before login.
    pub fn site(&self) -> Option<&SiteInfo> {
        self.site.as_ref()
    }

    pub(crate) fn hooks(&self) -> &dyn Hooks {
        self.hooks.as_ref()
    }
}

/// Detect a failed identity assertion in a mutation response.
///
/// Older servers answer `{"<module>": {"assert": "Failure"}}`; newer ones
/// answer with an `assert*failed` error code.
fn assertion_failure(response: &Value) -> Option<String> {
    if let Some(e) = ApiError::from_response(response) {
        if e.code.starts_with("assert") && e.code.ends_with("failed") {
            return Some(format!("{}: {}", e.code, e.message));
        }
    }
    response.as_object()?.values().find_map(|module| {
        (module.get("assert").and_then(Value::as_str) == Some("Failure"))
            .then(|| module.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{HookError, HookPayload};
    use crate::mock::{self, ScriptedTransport};
    use crate::transport::TransportError;
    use serde_json::json;

    #[test]
    fn query_uses_get_and_json_format() {
        let transport = ScriptedTransport::new([json!({"query": {}})]);
        let session = mock::session(&transport, &[], false);

        session
            .query(&Params::new().with("action", "query").with("meta", "userinfo"))
            .unwrap();

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, Method::Get);
        assert_eq!(sent[0].url, mock::BASE_URL);
        assert_eq!(sent[0].param("format"), Some("json"));
        assert_eq!(sent[0].param("meta"), Some("userinfo"));
    }

    #[test]
    fn query_does_not_raise_remote_errors() {
        let transport = ScriptedTransport::new([json!({"error": {"code": "badvalue", "info": "nope"}})]);
        let session = mock::session(&transport, &[], false);

        let response = session.query(&Params::new().with("action", "query")).unwrap();
        assert_eq!(ApiError::from_response(&response).unwrap().code, "badvalue");
    }

    #[test]
    fn transport_failures_are_wrapped() {
        let transport = ScriptedTransport::new([]);
        let session = mock::session(&transport, &[], false);

        let err = session.query(&Params::new()).unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Request { .. })));
    }

    #[test]
    fn mutate_posts_and_forwards_maxlag() {
        let transport = ScriptedTransport::new([json!({"purge": []})]);
        let mut config = mock::config();
        config.maxlag = Some(5);
        let session = mock::session_with_config(&transport, config, &[], false);

        session.mutate(&Params::new().with("action", "purge")).unwrap();

        let sent = transport.requests();
        assert_eq!(sent[0].method, Method::Post);
        assert_eq!(sent[0].param("maxlag"), Some("5"));
    }

    #[test]
    fn bot_session_downgrades_user_assertion() {
        let transport = ScriptedTransport::new([json!({"edit": {"result": "Success"}})]);
        let session = mock::session(&transport, &[], true);

        session
            .mutate(&Params::new().with("action", "edit").with("assert", "user"))
            .unwrap();

        assert_eq!(transport.requests()[0].param("assert"), Some("bot"));
    }

    #[test]
    fn human_session_keeps_user_assertion() {
        let transport = ScriptedTransport::new([json!({"edit": {"assert": "Failure"}})]);
        let session = mock::session(&transport, &[], false);

        // Not downgraded, so the failure is left for the caller to inspect.
        let response = session
            .mutate(&Params::new().with("action", "edit").with("assert", "user"))
            .unwrap();

        assert_eq!(transport.requests()[0].param("assert"), Some("user"));
        assert_eq!(response["edit"]["assert"], "Failure");
    }

    #[test]
    fn downgraded_assertion_failure_is_raised() {
        let transport = ScriptedTransport::new([json!({"edit": {"assert": "Failure"}})]);
        let session = mock::session(&transport, &[], true);

        let err = session
            .mutate(&Params::new().with("action", "edit").with("assert", "user"))
            .unwrap_err();
        assert!(matches!(err, Error::AssertionFailure(_)));
    }

    #[test]
    fn assert_failed_error_code_is_recognised() {
        let transport = ScriptedTransport::new([json!({
            "error": {"code": "assertbotfailed", "info": "You do not have the bot right"}
        })]);
        let session = mock::session(&transport, &[], true);

        let err = session
            .mutate(&Params::new().with("action", "edit").with("assert", "user"))
            .unwrap_err();
        assert!(matches!(err, Error::AssertionFailure(ref d) if d.starts_with("assertbotfailed")));
    }

    struct Rewriter;

    impl Hooks for Rewriter {
        fn fire(&self, hook: Hook, payload: HookPayload<'_>) -> std::result::Result<(), HookError> {
            match (hook, payload) {
                (Hook::PreMutate, HookPayload::Params(p)) => {
                    p.set("summary", "rewritten");
                    Ok(())
                }
                (Hook::PostMutate, HookPayload::Response(r)) => {
                    r["seen"] = json!(true);
                    Ok(())
                }
                _ => Ok(()),
            }
        }
    }

    #[test]
    fn mutate_hooks_can_rewrite_data() {
        let transport = ScriptedTransport::new([json!({"edit": {}})]);
        let session = mock::session_with_hooks(&transport, Arc::new(Rewriter));

        let response = session
            .mutate(&Params::new().with("action", "edit").with("summary", "original"))
            .unwrap();

        assert_eq!(transport.requests()[0].param("summary"), Some("rewritten"));
        assert_eq!(response["seen"], true);
    }

    struct Refuse(Hook);

    impl Hooks for Refuse {
        fn fire(&self, hook: Hook, _: HookPayload<'_>) -> std::result::Result<(), HookError> {
            if hook == self.0 {
                Err(HookError::new(hook, "refused"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn mutate_hook_error_aborts_before_sending() {
        let transport = ScriptedTransport::new([json!({"edit": {}})]);
        let session = mock::session_with_hooks(&transport, Arc::new(Refuse(Hook::PreMutate)));

        let err = session
            .mutate(&Params::new().with("action", "edit"))
            .unwrap_err();

        assert!(matches!(err, Error::Hook(_)));
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn post_mutate_hook_error_is_raised() {
        let transport = ScriptedTransport::new([json!({"edit": {}})]);
        let session = mock::session_with_hooks(&transport, Arc::new(Refuse(Hook::PostMutate)));

        let err = session
            .mutate(&Params::new().with("action", "edit"))
            .unwrap_err();

        assert!(matches!(err, Error::Hook(_)));
        assert_eq!(transport.request_count(), 1);
    }

    #[test]
    fn failed_operation_still_logs_out() {
        let transport = ScriptedTransport::new([json!({})]);
        let mut session = mock::session(&transport, &[], false);

        let err = session
            .run_then_logout(|_| -> Result<()> { Err(Error::InvalidArgument("bad list".into())) })
            .unwrap_err();

        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(transport.requests_for("logout").len(), 1);
    }

    #[test]
    fn failed_logout_keeps_the_operation_result() {
        let transport = ScriptedTransport::new([
            json!({"query": {"general": {}}}),
            json!({"error": {"code": "badtoken", "info": "Invalid token"}}),
        ]);
        let mut session = mock::session(&transport, &[], false);

        let response = session
            .run_then_logout(|s| s.query(&Params::new().with("action", "query")))
            .unwrap();

        assert!(response.get("query").is_some());
        assert_eq!(transport.requests_for("logout").len(), 1);
    }

    #[test]
    fn purge_joins_titles_and_raises_remote_errors() {
        let transport = ScriptedTransport::new([
            json!({"purge": [{"title": "A", "purged": ""}, {"title": "B", "purged": ""}]}),
            json!({"error": {"code": "maxlag", "info": "Waiting for db2"}}),
        ]);
        let session = mock::session(&transport, &[], false);

        session.purge(["A", "B"]).unwrap();
        assert_eq!(transport.requests()[0].param("titles"), Some("A|B"));

        match session.purge(["A"]).unwrap_err() {
            Error::Api(e) => assert!(e.is_maxlag()),
            other => panic!("expected API error, got {other:?}"),
        }
    }

    #[test]
    fn purge_without_titles_is_rejected_locally() {
        let transport = ScriptedTransport::new([]);
        let session = mock::session(&transport, &[], false);

        let err = session.purge(Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn query_limit_follows_rights() {
        let transport = ScriptedTransport::new([]);
        assert_eq!(mock::session(&transport, &["edit"], false).query_limit(), QUERY_LIMIT);
        assert_eq!(
            mock::session(&transport, &["edit", HIGH_LIMITS_RIGHT], false).query_limit(),
            HIGH_QUERY_LIMIT
        );
    }
}
