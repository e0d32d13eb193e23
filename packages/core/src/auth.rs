//! The login handshake.
//!
//! Login is a small state machine driven by the server's `login.result`
//! code:
//!
//! ```text
//!            ┌────────────── NeedToken (once) ──────────────┐
//!            ▼                                               │
//!   Initial ──submit──▶ result ──Success──▶ userinfo ─▶ tokens ─▶ Session
//!            ▲            │
//!            └─ sleep ◀── Throttled (once)
//!                         │
//!                         └─ anything else ─▶ LoginError
//! ```
//!
//! Each retryable result is allowed once per handshake. A second
//! occurrence means the server is not following the protocol, and the
//! handshake fails rather than loop. The throttle sleep is the only
//! blocking wait in the engine, capped by
//! [`SessionConfig::max_throttle_wait`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::TokenVariant;
use crate::codec::{self, Params};
use crate::config::SessionConfig;
use crate::error::{ApiError, Error, LoginError, Result};
use crate::hooks::{Hook, HookPayload, Hooks, NoHooks};
use crate::session::{ApiClient, Session, UserProfile};
use crate::site::probe_site;
use crate::transport::{Method, Transport};

/// How many times each retryable login result may be answered.
const MAX_RETRIES_PER_CHALLENGE: u8 = 1;

/// Blocks the handshake for a server-requested throttle wait.
pub type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

/// Which round of the handshake is being submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Stage {
    #[default]
    Initial,
    TokenChallenge,
    Throttled,
}

/// Per-handshake retry bookkeeping.
#[derive(Debug, Clone, Default)]
struct AuthAttempt {
    stage: Stage,
    token_retries: u8,
    throttle_retries: u8,
    pending_token: Option<String>,
    wait_seconds: Option<u64>,
}

impl AuthAttempt {
    /// Answer a `NeedToken` result, or fail if one was already answered.
    fn challenge(&mut self, token: String) -> Result<()> {
        if self.token_retries >= MAX_RETRIES_PER_CHALLENGE {
            return Err(LoginError::from_code("NeedToken").into());
        }
        self.token_retries += 1;
        self.stage = Stage::TokenChallenge;
        self.pending_token = Some(token);
        Ok(())
    }

    /// Answer a `Throttled` result with the wait to sleep, or fail if one
    /// was already answered or the wait is above `ceiling`.
    fn throttle(&mut self, wait: u64, ceiling: Duration) -> Result<Duration> {
        if self.throttle_retries >= MAX_RETRIES_PER_CHALLENGE {
            return Err(LoginError::from_code("Throttled").into());
        }
        let wait_for = Duration::from_secs(wait);
        if wait_for > ceiling {
            return Err(LoginError::new(
                "Throttled",
                format!(
                    "server asked for a {wait}s wait, above the {}s ceiling",
                    ceiling.as_secs()
                ),
            )
            .into());
        }
        self.throttle_retries += 1;
        self.stage = Stage::Throttled;
        self.wait_seconds = Some(wait);
        Ok(wait_for)
    }
}

/// The server's answer to one login submission.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LoginResult {
    Success,
    NeedToken { token: String },
    Throttled { wait: u64 },
    Failed(LoginError),
}

impl LoginResult {
    fn parse(response: &Value) -> Result<Self> {
        let login = match codec::field(response, "login") {
            Some(login) => login,
            None => {
                return Err(match ApiError::from_response(response) {
                    Some(e) => e.into(),
                    None => Error::UnexpectedResponse("login response has no login object".into()),
                })
            }
        };
        let code = login
            .get("result")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::UnexpectedResponse("login response has no result".into()))?;

        Ok(match code {
            "Success" => LoginResult::Success,
            "NeedToken" => {
                let token = codec::field(login, "token")
                    .and_then(codec::text)
                    .ok_or_else(|| Error::UnexpectedResponse("NeedToken without a token".into()))?;
                LoginResult::NeedToken { token }
            }
            "Throttled" => {
                let wait = codec::field(login, "wait")
                    .and_then(|w| w.as_u64().or_else(|| w.as_str()?.trim().parse().ok()))
                    .ok_or_else(|| Error::UnexpectedResponse("Throttled without a wait".into()))?;
                LoginResult::Throttled { wait }
            }
            other => LoginResult::Failed(LoginError::from_code(other)),
        })
    }
}

/// Drives the login protocol and produces a [`Session`].
pub struct Handshake {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    hooks: Arc<dyn Hooks>,
    sleeper: Sleeper,
}

impl Handshake {
    pub fn new(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            hooks: Arc::new(NoHooks),
            sleeper: Arc::new(std::thread::sleep),
        }
    }

    /// Use `hooks` for the handshake and the resulting session.
    pub fn with_hooks(mut self, hooks: Arc<dyn Hooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Replace the throttle sleep, e.g. to record waits in tests.
    pub fn with_sleeper(mut self, sleeper: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Run the handshake to completion.
    pub fn run(self) -> Result<Session> {
        let client = ApiClient::new(&self.config, Arc::clone(&self.transport));

        let site = if self.config.check_version {
            Some(probe_site(&client)?)
        } else {
            None
        };

        let mut attempt = AuthAttempt::default();
        loop {
            debug!(stage = ?attempt.stage, waited = ?attempt.wait_seconds, "submitting login");
            let mut params = self.login_params(attempt.pending_token.as_deref());
            self.hooks.fire(Hook::PreLogin, HookPayload::Params(&mut params))?;
            let mut response = client.request(&params, Method::Post)?;
            self.hooks
                .fire(Hook::PostLogin, HookPayload::Response(&mut response))?;

            match LoginResult::parse(&response)? {
                LoginResult::Success => break,
                LoginResult::NeedToken { token } => attempt.challenge(token)?,
                LoginResult::Throttled { wait } => {
                    let wait_for = attempt.throttle(wait, self.config.max_throttle_wait)?;
                    warn!("login throttled, waiting {wait} seconds");
                    (self.sleeper)(wait_for);
                }
                LoginResult::Failed(e) => return Err(e.into()),
            }
        }

        info!(
            "logged in to {} as {}",
            self.config.base_url, self.config.username
        );

        let profile = fetch_profile(&client)?;
        let mut session = Session::establish(client, self.hooks, self.config, profile, site);
        session.refresh_tokens(TokenVariant::Standard)?;
        Ok(session)
    }

    fn login_params(&self, token: Option<&str>) -> Params {
        let mut params = Params::new()
            .with("action", "login")
            .with("lgname", self.config.username.clone())
            .with("lgpassword", self.config.password.clone());
        if let Some(maxlag) = self.config.maxlag {
            params.set("maxlag", maxlag.to_string());
        }
        if let Some(token) = token {
            params.set("lgtoken", token);
        }
        params
    }
}

/// Read the logged-in account's rights and groups.
fn fetch_profile(client: &ApiClient) -> Result<UserProfile> {
    let params = Params::new()
        .with("action", "query")
        .with("meta", "userinfo")
        .with("uiprop", "blockinfo|rights|groups");
    let response = client.request(&params, Method::Get)?;
    if let Some(e) = ApiError::from_response(&response) {
        return Err(e.into());
    }

    let userinfo = response
        .pointer("/query/userinfo")
        .ok_or_else(|| Error::UnexpectedResponse("userinfo query lacks query.userinfo".into()))?;

    let strings = |key: &str| -> Vec<String> {
        userinfo
            .get(key)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(codec::text).collect())
            .unwrap_or_default()
    };

    Ok(UserProfile {
        rights: strings("rights").into_iter().collect::<BTreeSet<_>>(),
        groups: strings("groups"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookError;
    use crate::mock::{self, ScriptedTransport};
    use crate::session::{HIGH_LIMITS_RIGHT, HIGH_QUERY_LIMIT, QUERY_LIMIT};
    use serde_json::json;
    use std::sync::Mutex;

    fn login(result: &str) -> Value {
        json!({"login": {"result": result}})
    }

    fn need_token() -> Value {
        json!({"login": {"result": "NeedToken", "token": "b5780b6e2f27e20b450921d9461010b4"}})
    }

    fn throttled(wait: u64) -> Value {
        json!({"login": {"result": "Throttled", "wait": wait}})
    }

    fn userinfo(rights: &[&str], groups: &[&str]) -> Value {
        json!({"query": {"userinfo": {"id": 7, "name": "ExampleBot", "rights": rights, "groups": groups}}})
    }

    fn tokens() -> Value {
        json!({"query": {"pages": {"15580374": {
            "pageid": 15580374, "ns": 0, "title": "Main Page",
            "edittoken": "d41d8cd98f00b204e9800998ecf8427e+\\",
            "deletetoken": "d41d8cd98f00b204e9800998ecf8427e+\\",
            "movetoken": "d41d8cd98f00b204e9800998ecf8427e+\\"
        }}}})
    }

    fn success_tail() -> [Value; 3] {
        [login("Success"), userinfo(&["read", "edit"], &["*", "user"]), tokens()]
    }

    fn handshake(transport: &Arc<ScriptedTransport>) -> Handshake {
        let transport: Arc<dyn Transport> = transport.clone();
        Handshake::new(mock::config(), transport).with_sleeper(|_| {})
    }

    #[test]
    fn successful_login_populates_session() {
        let transport = ScriptedTransport::new(success_tail());
        let mut session = handshake(&transport).run().unwrap();

        assert_eq!(session.username(), "ExampleBot");
        assert!(!session.is_bot());
        assert!(session.has_right("edit"));
        assert_eq!(session.query_limit(), QUERY_LIMIT);
        assert_eq!(
            session.token("edit", false, TokenVariant::Standard).unwrap(),
            "d41d8cd98f00b204e9800998ecf8427e+\\"
        );

        let sent = transport.requests();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].method, Method::Post);
        assert_eq!(sent[0].param("action"), Some("login"));
        assert_eq!(sent[0].param("lgname"), Some("ExampleBot"));
        assert_eq!(sent[0].param("lgpassword"), Some("hunter2"));
        assert_eq!(sent[0].param("lgtoken"), None);
        assert_eq!(sent[1].param("meta"), Some("userinfo"));
        assert_eq!(sent[2].param("titles"), Some("Main Page"));
    }

    #[test]
    fn high_limits_and_bot_flag() {
        let transport = ScriptedTransport::new([
            login("Success"),
            userinfo(&["read", HIGH_LIMITS_RIGHT], &["*", "user", "bot"]),
            tokens(),
        ]);
        let session = handshake(&transport).run().unwrap();

        assert_eq!(session.query_limit(), HIGH_QUERY_LIMIT);
        assert!(session.is_bot());
    }

    #[test]
    fn token_challenge_is_answered_once() {
        let mut script = vec![need_token()];
        script.extend(success_tail());
        let transport = ScriptedTransport::new(script);

        handshake(&transport).run().unwrap();

        let logins = transport.requests_for("login");
        assert_eq!(logins.len(), 2);
        assert_eq!(logins[0].param("lgtoken"), None);
        assert_eq!(
            logins[1].param("lgtoken"),
            Some("b5780b6e2f27e20b450921d9461010b4")
        );
    }

    #[test]
    fn repeated_token_challenge_is_fatal() {
        let transport = ScriptedTransport::new([need_token(), need_token(), login("Success")]);

        match handshake(&transport).run() {
            Err(Error::Login(e)) => assert_eq!(e.code, "NeedToken"),
            Err(other) => panic!("expected NeedToken login error, got {other:?}"),
            Ok(_) => panic!("expected NeedToken login error"),
        }
        assert_eq!(transport.requests_for("login").len(), 2);
    }

    #[test]
    fn throttle_sleeps_then_retries() {
        let mut script = vec![throttled(2)];
        script.extend(success_tail());
        let transport = ScriptedTransport::new(script);
        let waits = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&waits);

        handshake(&transport)
            .with_sleeper(move |d| recorded.lock().unwrap().push(d))
            .run()
            .unwrap();

        assert_eq!(*waits.lock().unwrap(), vec![Duration::from_secs(2)]);
        assert_eq!(transport.requests_for("login").len(), 2);
    }

    #[test]
    fn token_is_carried_across_throttle() {
        let mut script = vec![need_token(), throttled(1)];
        script.extend(success_tail());
        let transport = ScriptedTransport::new(script);
        let waits = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&waits);

        handshake(&transport)
            .with_sleeper(move |d| recorded.lock().unwrap().push(d))
            .run()
            .unwrap();

        let logins = transport.requests_for("login");
        assert_eq!(logins.len(), 3);
        assert_eq!(logins[0].param("lgtoken"), None);
        for retry in &logins[1..] {
            assert_eq!(retry.param("lgtoken"), Some("b5780b6e2f27e20b450921d9461010b4"));
        }
        assert_eq!(*waits.lock().unwrap(), vec![Duration::from_secs(1)]);
    }

    #[test]
    fn repeated_throttle_is_fatal() {
        let transport = ScriptedTransport::new([throttled(1), throttled(1)]);

        match handshake(&transport).run() {
            Err(Error::Login(e)) => assert_eq!(e.code, "Throttled"),
            Err(other) => panic!("expected Throttled login error, got {other:?}"),
            Ok(_) => panic!("expected Throttled login error"),
        }
        assert_eq!(transport.requests_for("login").len(), 2);
    }

    #[test]
    fn excessive_throttle_wait_fails_without_sleeping() {
        let transport = ScriptedTransport::new([throttled(3600)]);
        let slept = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&slept);

        let result = handshake(&transport)
            .with_sleeper(move |_| *flag.lock().unwrap() = true)
            .run();

        assert!(matches!(result, Err(Error::Login(ref e)) if e.code == "Throttled"));
        assert!(!*slept.lock().unwrap());
        assert_eq!(transport.request_count(), 1);
    }

    #[test]
    fn terminal_results_fail_immediately() {
        for code in ["WrongPass", "NotExists", "Blocked", "Illegal", "EmptyPass"] {
            let transport = ScriptedTransport::new([login(code)]);
            match handshake(&transport).run() {
                Err(Error::Login(e)) => assert_eq!(e.code, code),
                Err(other) => panic!("{code}: unexpected error {other:?}"),
                Ok(_) => panic!("{code}: login should fail"),
            }
            assert_eq!(transport.request_count(), 1, "{code}: no retry expected");
        }
    }

    #[test]
    fn maxlag_is_sent_with_login() {
        let transport = ScriptedTransport::new(success_tail());
        let transport_dyn: Arc<dyn Transport> = transport.clone();
        let config = mock::config().with_maxlag(5);

        Handshake::new(config, transport_dyn).run().unwrap();

        assert_eq!(transport.requests()[0].param("maxlag"), Some("5"));
    }

    #[test]
    fn version_check_rejects_old_servers() {
        let transport = ScriptedTransport::new([json!({
            "query": {"general": {"generator": "MediaWiki 1.13.2"}, "extensions": []}
        })]);
        let transport_dyn: Arc<dyn Transport> = transport.clone();
        let mut config = mock::config();
        config.check_version = true;

        let result = Handshake::new(config, transport_dyn).run();
        assert!(matches!(result, Err(Error::UnsupportedVersion { .. })));
        assert!(transport.requests_for("login").is_empty());
    }

    #[test]
    fn site_info_is_kept_on_session() {
        let mut script = vec![json!({
            "query": {
                "general": {"generator": "MediaWiki 1.16.0"},
                "extensions": [{"name": "CheckUser", "version": "2.2"}]
            }
        })];
        script.extend(success_tail());
        let transport = ScriptedTransport::new(script);
        let transport_dyn: Arc<dyn Transport> = transport.clone();
        let mut config = mock::config();
        config.check_version = true;

        let session = Handshake::new(config, transport_dyn).run().unwrap();
        let site = session.site().unwrap();
        assert_eq!(site.version, "1.16.0");
        assert!(site.has_extension("CheckUser"));
    }

    #[test]
    fn api_error_during_login_is_surfaced() {
        let transport = ScriptedTransport::new([json!({
            "error": {"code": "readonly", "info": "The wiki is currently in read-only mode"}
        })]);
        let result = handshake(&transport).run();
        assert!(matches!(result, Err(Error::Api(ref e)) if e.code == "readonly"));
    }

    struct RenameUser;

    impl Hooks for RenameUser {
        fn fire(&self, hook: Hook, payload: HookPayload<'_>) -> std::result::Result<(), HookError> {
            if let (Hook::PreLogin, HookPayload::Params(p)) = (hook, payload) {
                p.set("lgname", "OtherBot");
            }
            Ok(())
        }
    }

    #[test]
    fn pre_login_hook_rewrites_params() {
        let transport = ScriptedTransport::new(success_tail());
        handshake(&transport)
            .with_hooks(Arc::new(RenameUser))
            .run()
            .unwrap();
        assert_eq!(transport.requests()[0].param("lgname"), Some("OtherBot"));
    }

    struct RefuseLogin;

    impl Hooks for RefuseLogin {
        fn fire(&self, hook: Hook, _: HookPayload<'_>) -> std::result::Result<(), HookError> {
            match hook {
                Hook::PreLogin => Err(HookError::new(hook, "refused")),
                _ => Ok(()),
            }
        }
    }

    #[test]
    fn pre_login_hook_error_aborts_before_sending() {
        let transport = ScriptedTransport::new(success_tail());
        let result = handshake(&transport).with_hooks(Arc::new(RefuseLogin)).run();

        assert!(matches!(result, Err(Error::Hook(_))));
        assert_eq!(transport.request_count(), 0);
    }
}
