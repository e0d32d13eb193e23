//! Shared helpers for the mwsession conformance test suite.
//!
//! Provides [`spawn_wiki`], which binds an ephemeral port on `127.0.0.1`
//! and serves a small scripted imitation of a wiki's `api.php` from it.
//! Tests drive the real engine through the real HTTP transport against
//! it, then inspect [`MockWiki::calls`] to see what went over the wire.
//!
//! The mock speaks just enough of the action API for the engine:
//!
//! | Request | Behaviour |
//! |---------|-----------|
//! | `action=login` | optional `Throttled`, then `NeedToken` + session cookie, then `Success` / `WrongPass` / `NotExists` |
//! | `meta=siteinfo` | `general`, `extensions`, `namespaces` |
//! | `meta=userinfo` | scripted rights and groups; anonymous without the cookie |
//! | `prop=info&intoken=` | one token per requested action |
//! | `prop=revisions&rvtoken=rollback` | a rollback token on the latest revision |
//! | `list=recentchanges` | scripted rows, paged with `rccontinue` |
//! | `action=edit` | honours `assert=user` / `assert=bot` |
//! | `action=purge` | `maxlag` error when the script says the database is lagged |
//! | `action=logout` | clears the session |
//! | anything else | `unknown_action` error |

use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread;

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Form, Json, Router,
};
use serde_json::{json, Map, Value};

/// Path the mock serves the API on.
pub const API_PATH: &str = "/w/api.php";

/// Name of the session cookie set during login.
pub const SESSION_COOKIE: &str = "mockwiki_session";

/// Token the mock hands out in its `NeedToken` challenge.
pub const LOGIN_TOKEN: &str = "b5780b6e2f27e20b450921d9461010b4";

const SESSION_ID: &str = "8f14e45fceea167a5a36dedd4bea2543";

// ---------------------------------------------------------------------------
// Script
// ---------------------------------------------------------------------------

/// What the mock wiki knows and how it behaves.
#[derive(Debug, Clone)]
pub struct WikiScript {
    pub username: String,
    pub password: String,
    /// Reported as `MediaWiki <version>`.
    pub version: String,
    pub extensions: Vec<(String, String)>,
    pub rights: Vec<String>,
    pub groups: Vec<String>,
    /// Answer the first login submission with `Throttled` and this wait.
    pub throttle: Option<u64>,
    pub recent_changes: Vec<Value>,
    /// Largest page the server returns regardless of the requested limit.
    pub page_size: usize,
    /// Keep reporting the bot group but fail `assert=bot` on writes.
    pub revoke_bot_after_login: bool,
    /// Fail every write that carries `maxlag` with a `maxlag` error.
    pub lagged: bool,
}

impl Default for WikiScript {
    fn default() -> Self {
        Self {
            username: "ExampleBot".into(),
            password: "hunter2".into(),
            version: "1.35.0".into(),
            extensions: vec![("Cite".into(), "1.0".into()), ("AbuseFilter".into(), String::new())],
            rights: vec!["read".into(), "edit".into(), "purge".into()],
            groups: vec!["*".into(), "user".into()],
            throttle: None,
            recent_changes: Vec::new(),
            page_size: 50,
            revoke_bot_after_login: false,
            lagged: false,
        }
    }
}

impl WikiScript {
    /// Same account, in the `bot` group and holding `apihighlimits`.
    pub fn bot() -> Self {
        let mut script = Self::default();
        script.rights.extend(["bot".into(), "apihighlimits".into()]);
        script.groups.push("bot".into());
        script
    }
}

/// One request as the mock saw it.
#[derive(Debug, Clone)]
pub struct ApiCall {
    pub method: String,
    pub params: HashMap<String, String>,
    pub had_session_cookie: bool,
}

impl ApiCall {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Server state
// ---------------------------------------------------------------------------

struct WikiState {
    script: WikiScript,
    calls: Vec<ApiCall>,
    throttled_once: bool,
    logged_in: bool,
    unavailable: bool,
}

type Shared = Arc<Mutex<WikiState>>;

/// Handle to a running mock wiki.
pub struct MockWiki {
    /// Full URL of the mock's `api.php`.
    pub base_url: String,
    state: Shared,
}

impl MockWiki {
    fn lock(&self) -> MutexGuard<'_, WikiState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every request received so far, in arrival order.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    /// Requests whose `action` parameter equals `action`.
    pub fn calls_for(&self, action: &str) -> Vec<ApiCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.param("action") == Some(action))
            .collect()
    }

    pub fn logged_in(&self) -> bool {
        self.lock().logged_in
    }

    /// Answer every request with `503 Service Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }
}

/// Start a mock wiki on an ephemeral port and return its handle.
///
/// The server runs on its own thread with a single-threaded `tokio`
/// runtime, so tests can stay synchronous and use the blocking transport.
///
/// # Panics
///
/// Panics if the listener cannot be bound or the server fails to start.
pub fn spawn_wiki(script: WikiScript) -> MockWiki {
    let state: Shared = Arc::new(Mutex::new(WikiState {
        script,
        calls: Vec::new(),
        throttled_once: false,
        logged_in: false,
        unavailable: false,
    }));

    let router = Router::new()
        .route(API_PATH, get(api).post(api))
        .with_state(Arc::clone(&state));

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("build mock wiki runtime");
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind ephemeral port");
            let addr = listener.local_addr().expect("get local addr");
            tx.send(addr).expect("report mock wiki address");
            axum::serve(listener, router).await.expect("mock wiki error");
        });
    });

    let addr = rx.recv().expect("mock wiki failed to start");
    MockWiki {
        base_url: format!("http://{addr}{API_PATH}"),
        state,
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// `GET|POST /w/api.php`
///
/// `Form` reads the query string for `GET` and the body for `POST`.
async fn api(
    State(state): State<Shared>,
    method: Method,
    headers: HeaderMap,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    let mut wiki = state.lock().unwrap_or_else(|e| e.into_inner());
    let had_session_cookie = has_session_cookie(&headers);
    wiki.calls.push(ApiCall {
        method: method.to_string(),
        params: params.clone(),
        had_session_cookie,
    });

    if wiki.unavailable {
        return (StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response();
    }

    let authenticated = had_session_cookie && wiki.logged_in;
    let mut response_headers = HeaderMap::new();
    let body = match params.get("action").map(String::as_str) {
        Some("login") => login(&mut wiki, &params, had_session_cookie, &mut response_headers),
        Some("logout") => {
            wiki.logged_in = false;
            response_headers.insert(
                header::SET_COOKIE,
                HeaderValue::from_static("mockwiki_session=deleted; Path=/; Max-Age=0"),
            );
            json!({})
        }
        Some("query") => query(&wiki.script, &params, authenticated),
        Some("edit") => edit(&wiki.script, &params, authenticated),
        Some("purge") => purge(&wiki.script, &params),
        other => api_error(
            "unknown_action",
            &format!("Unrecognized value for parameter 'action': {}", other.unwrap_or("")),
        ),
    };

    (StatusCode::OK, response_headers, Json(body)).into_response()
}

fn has_session_cookie(headers: &HeaderMap) -> bool {
    let expected = format!("{SESSION_COOKIE}={SESSION_ID}");
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .any(|pair| pair.trim() == expected)
}

fn api_error(code: &str, info: &str) -> Value {
    json!({"error": {"code": code, "info": info}})
}

fn login(
    wiki: &mut WikiState,
    params: &HashMap<String, String>,
    had_session_cookie: bool,
    response_headers: &mut HeaderMap,
) -> Value {
    if let Some(wait) = wiki.script.throttle {
        if !wiki.throttled_once {
            wiki.throttled_once = true;
            return json!({"login": {"result": "Throttled", "wait": wait}});
        }
    }

    let token_ok = params.get("lgtoken").map(String::as_str) == Some(LOGIN_TOKEN);
    if !token_ok || !had_session_cookie {
        response_headers.insert(
            header::SET_COOKIE,
            HeaderValue::from_static(
                "mockwiki_session=8f14e45fceea167a5a36dedd4bea2543; Path=/; HttpOnly",
            ),
        );
        return json!({"login": {
            "result": "NeedToken",
            "token": LOGIN_TOKEN,
            "cookieprefix": "mockwiki",
            "sessionid": SESSION_ID
        }});
    }

    let name = params.get("lgname").map(String::as_str).unwrap_or("");
    let password = params.get("lgpassword").map(String::as_str).unwrap_or("");
    if name.is_empty() {
        return json!({"login": {"result": "NoName"}});
    }
    if name != wiki.script.username {
        return json!({"login": {"result": "NotExists"}});
    }
    if password != wiki.script.password {
        return json!({"login": {"result": "WrongPass"}});
    }

    wiki.logged_in = true;
    json!({"login": {
        "result": "Success",
        "lguserid": 7,
        "lgusername": wiki.script.username,
        "cookieprefix": "mockwiki",
        "sessionid": SESSION_ID
    }})
}

// ---------------------------------------------------------------------------
// action=query
// ---------------------------------------------------------------------------

fn split(params: &HashMap<String, String>, key: &str) -> Vec<String> {
    params
        .get(key)
        .map(|v| v.split('|').filter(|s| !s.is_empty()).map(String::from).collect())
        .unwrap_or_default()
}

fn query(script: &WikiScript, params: &HashMap<String, String>, authenticated: bool) -> Value {
    let mut result = Map::new();

    let meta = split(params, "meta");
    if meta.iter().any(|m| m == "siteinfo") {
        site_info(script, &split(params, "siprop"), &mut result);
    }
    if meta.iter().any(|m| m == "userinfo") {
        result.insert("userinfo".into(), user_info(script, authenticated));
    }

    if params.contains_key("intoken") || params.contains_key("rvtoken") {
        result.insert("pages".into(), token_pages(params));
    }

    let mut continuation = None;
    if let Some(list) = params.get("list") {
        match list.as_str() {
            "recentchanges" => {
                let (rows, next) = recent_changes(script, params);
                result.insert("recentchanges".into(), Value::Array(rows));
                continuation = next;
            }
            other => {
                return api_error("unknown_list", &format!("Unrecognized value for parameter 'list': {other}"))
            }
        }
    }

    let mut body = json!({"query": result});
    if let Some(next) = continuation {
        body["query-continue"] = json!({"recentchanges": {"rccontinue": next}});
    }
    body
}

fn site_info(script: &WikiScript, props: &[String], result: &mut Map<String, Value>) {
    for prop in props {
        match prop.as_str() {
            "general" => {
                result.insert(
                    "general".into(),
                    json!({
                        "mainpage": "Main Page",
                        "sitename": "Mock Wiki",
                        "generator": format!("MediaWiki {}", script.version)
                    }),
                );
            }
            "extensions" => {
                let extensions: Vec<Value> = script
                    .extensions
                    .iter()
                    .map(|(name, version)| {
                        if version.is_empty() {
                            json!({"type": "other", "name": name})
                        } else {
                            json!({"type": "other", "name": name, "version": version})
                        }
                    })
                    .collect();
                result.insert("extensions".into(), Value::Array(extensions));
            }
            "namespaces" => {
                result.insert(
                    "namespaces".into(),
                    json!({
                        "-1": {"id": -1, "case": "first-letter", "*": "Special"},
                        "0": {"id": 0, "case": "first-letter", "*": ""},
                        "1": {"id": 1, "case": "first-letter", "subpages": "", "*": "Talk"},
                        "2": {"id": 2, "case": "first-letter", "subpages": "", "*": "User"},
                        "4": {"id": 4, "case": "first-letter", "*": "Project"}
                    }),
                );
            }
            _ => {}
        }
    }
}

fn user_info(script: &WikiScript, authenticated: bool) -> Value {
    if authenticated {
        json!({
            "id": 7,
            "name": script.username,
            "groups": script.groups,
            "rights": script.rights
        })
    } else {
        json!({"id": 0, "name": "127.0.0.1", "anon": "", "groups": ["*"], "rights": ["read"]})
    }
}

fn token_pages(params: &HashMap<String, String>) -> Value {
    let mut page = json!({"pageid": 1, "ns": 0, "title": "Main Page"});
    for action in split(params, "intoken") {
        page[format!("{action}token")] = json!(format!("{action}0123456789abcdef+\\"));
    }
    if params.get("rvtoken").map(String::as_str) == Some("rollback") {
        page["revisions"] = json!([{
            "revid": 100,
            "parentid": 99,
            "user": "Alice",
            "rollbacktoken": "rollback0123456789abcdef+\\"
        }]);
    }
    json!({"1": page})
}

fn recent_changes(script: &WikiScript, params: &HashMap<String, String>) -> (Vec<Value>, Option<String>) {
    let namespaces: Vec<i64> = split(params, "rcnamespace")
        .iter()
        .filter_map(|n| n.parse().ok())
        .collect();
    let matching: Vec<&Value> = script
        .recent_changes
        .iter()
        .filter(|row| {
            namespaces.is_empty()
                || row
                    .get("ns")
                    .and_then(Value::as_i64)
                    .is_some_and(|ns| namespaces.contains(&ns))
        })
        .collect();

    let offset: usize = params
        .get("rccontinue")
        .and_then(|c| c.parse().ok())
        .unwrap_or(0);
    let requested: usize = params
        .get("rclimit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(10);
    let take = requested.min(script.page_size).max(1);

    let rows: Vec<Value> = matching.iter().skip(offset).take(take).map(|r| (*r).clone()).collect();
    let next = offset + rows.len();
    let continuation = (next < matching.len()).then(|| next.to_string());
    (rows, continuation)
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

fn edit(script: &WikiScript, params: &HashMap<String, String>, authenticated: bool) -> Value {
    let is_bot = script.groups.iter().any(|g| g == "bot") && !script.revoke_bot_after_login;
    match params.get("assert").map(String::as_str) {
        Some("user") if !authenticated => {
            return api_error("assertuserfailed", "Assertion that the user is logged in failed")
        }
        Some("bot") if !(authenticated && is_bot) => {
            return api_error("assertbotfailed", "Assertion that the user has the bot right failed")
        }
        _ => {}
    }
    if params.get("token").map_or(true, |t| !t.starts_with("edit")) {
        return api_error("badtoken", "Invalid token");
    }
    json!({"edit": {
        "result": "Success",
        "title": params.get("title").cloned().unwrap_or_default(),
        "newrevid": 101
    }})
}

fn purge(script: &WikiScript, params: &HashMap<String, String>) -> Value {
    if script.lagged && params.contains_key("maxlag") {
        return json!({"error": {
            "code": "maxlag",
            "info": "Waiting for 10.64.16.8: 7 seconds lagged",
            "host": "10.64.16.8",
            "lag": 7
        }});
    }
    let purged: Vec<Value> = split(params, "titles")
        .into_iter()
        .map(|title| json!({"ns": 0, "title": title, "purged": ""}))
        .collect();
    json!({"purge": purged})
}
