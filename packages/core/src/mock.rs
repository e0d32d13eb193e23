//! Scripted transport and session fixtures for unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::config::SessionConfig;
use crate::hooks::{Hooks, NoHooks};
use crate::session::{ApiClient, Session, UserProfile};
use crate::transport::{Method, Transport, TransportError};

pub(crate) const BASE_URL: &str = "https://wiki.example.org/w/api.php";

/// One request as the transport saw it.
#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub url: String,
    pub method: Method,
    pub params: BTreeMap<String, String>,
}

impl Recorded {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Replays canned responses in order and records every request.
///
/// Running out of responses is reported as a transport failure.
pub(crate) struct ScriptedTransport {
    responses: Mutex<VecDeque<Vec<u8>>>,
    requests: Mutex<Vec<Recorded>>,
}

impl ScriptedTransport {
    pub fn new(responses: impl IntoIterator<Item = Value>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(
                responses
                    .into_iter()
                    .map(|v| v.to_string().into_bytes())
                    .collect(),
            ),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Queue a raw body, e.g. one that is not valid JSON.
    pub fn push_raw(&self, body: &[u8]) {
        self.responses.lock().unwrap().push_back(body.to_vec());
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Requests whose `action` parameter equals `action`.
    pub fn requests_for(&self, action: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.param("action") == Some(action))
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &self,
        url: &str,
        params: &[(String, String)],
        method: Method,
    ) -> Result<Vec<u8>, TransportError> {
        self.requests.lock().unwrap().push(Recorded {
            url: url.to_string(),
            method,
            params: params.iter().cloned().collect(),
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError::Request {
                url: url.to_string(),
                message: "no scripted response left".into(),
            })
    }
}

pub(crate) fn config() -> SessionConfig {
    let mut config = SessionConfig::new(BASE_URL, "ExampleBot", "hunter2");
    config.check_version = false;
    config
}

/// A logged-in session that skips the handshake.
pub(crate) fn session(transport: &Arc<ScriptedTransport>, rights: &[&str], is_bot: bool) -> Session {
    session_with_config(transport, config(), rights, is_bot)
}

pub(crate) fn session_with_config(
    transport: &Arc<ScriptedTransport>,
    config: SessionConfig,
    rights: &[&str],
    is_bot: bool,
) -> Session {
    build(transport, config, Arc::new(NoHooks), rights, is_bot)
}

pub(crate) fn session_with_hooks(transport: &Arc<ScriptedTransport>, hooks: Arc<dyn Hooks>) -> Session {
    build(transport, config(), hooks, &[], false)
}

fn build(
    transport: &Arc<ScriptedTransport>,
    config: SessionConfig,
    hooks: Arc<dyn Hooks>,
    rights: &[&str],
    is_bot: bool,
) -> Session {
    let transport: Arc<dyn Transport> = transport.clone();
    let client = ApiClient::new(&config, transport);
    let mut groups = vec!["*".to_string(), "user".to_string()];
    if is_bot {
        groups.push("bot".into());
    }
    let profile = UserProfile {
        rights: rights.iter().map(|r| r.to_string()).collect(),
        groups,
    };
    Session::establish(client, hooks, config, profile, None)
}
