//! Error taxonomy for the session engine.
//!
//! Every fallible operation in this crate returns [`Result`], whose error
//! side is the umbrella [`Error`] enum. The variants mirror the failure
//! classes a caller has to tell apart:
//!
//! | Variant | Raised when |
//! |---------|-------------|
//! | [`Error::Transport`] | the HTTP exchange itself failed |
//! | [`Error::Decode`] | the response body is not a JSON object |
//! | [`Error::Login`] | the login handshake ended in a terminal failure |
//! | [`Error::Api`] | the server ran the request and reported an error |
//! | [`Error::AssertionFailure`] | a downgraded identity assertion was rejected |
//! | [`Error::InvalidArgument`] | a request descriptor was malformed |
//! | [`Error::UnexpectedResponse`] | a well-formed response lacks a required field |
//! | [`Error::UnsupportedVersion`] | the site probe found a server that is too old |
//! | [`Error::Config`] | settings were missing or unparseable |
//! | [`Error::Hook`] | an observer aborted the operation |

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::ConfigError;
use crate::hooks::HookError;
use crate::transport::TransportError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Any failure the session engine can report.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Login(#[from] LoginError),

    #[error(transparent)]
    Api(#[from] ApiError),

    /// The server rejected the identity assertion on a mutating call after
    /// the session had downgraded it from `user` to `bot`.
    #[error("assertion failed: {0}")]
    AssertionFailure(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The response decoded fine but lacks a field the engine relies on.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("server runs MediaWiki {found}, at least {minimum} is required")]
    UnsupportedVersion {
        found: String,
        minimum: &'static str,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Hook(#[from] HookError),
}

/// The response body could not be decoded into a response tree.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("response is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("response is JSON but not an object")]
    NotAnObject,
}

/// A terminal outcome of the login handshake.
///
/// `code` is the server's result code verbatim (`WrongPass`, `Blocked`, …);
/// `message` is a human-readable explanation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("login failed: {code} ({message})")]
pub struct LoginError {
    pub code: String,
    pub message: String,
}

impl LoginError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Build the error for a login result code, with the standard message
    /// for codes the server is known to send.
    pub fn from_code(code: &str) -> Self {
        let message = match code {
            "NoName" => "Username not specified",
            "Illegal" => "Username with illegal characters specified",
            "NotExists" => "Username specified does not exist",
            "EmptyPass" => "Password not specified",
            "WrongPass" | "WrongPluginPass" => "Incorrect password specified",
            "CreateBlocked" => "IP address has been blocked",
            "Throttled" => "Login attempts have been throttled",
            "Blocked" => "User specified has been blocked",
            "NeedToken" => "Token was not specified",
            _ => "Unrecognized login result",
        };
        Self::new(code, message)
    }
}

/// A domain error reported by the remote API (`{"error": {"code", "info"}}`).
#[derive(Debug, Clone, Error, PartialEq, Eq, Deserialize)]
#[error("API error: {code} ({message})")]
pub struct ApiError {
    pub code: String,
    #[serde(rename = "info", default)]
    pub message: String,
}

impl ApiError {
    /// The reserved code the server uses when replication lag exceeds the
    /// request's `maxlag`. Callers may retry it; this crate never does.
    pub const MAXLAG: &'static str = "maxlag";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_maxlag(&self) -> bool {
        self.code == Self::MAXLAG
    }

    /// Extract the top-level error object from a decoded response, if any.
    pub fn from_response(response: &Value) -> Option<Self> {
        let error = response.get("error")?;
        match serde_json::from_value::<ApiError>(error.clone()) {
            Ok(e) => Some(e),
            Err(_) => Some(ApiError::new("unknown", error.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn api_error_from_response() {
        let response = json!({"error": {"code": "badtoken", "info": "Invalid token"}});
        let e = ApiError::from_response(&response).unwrap();
        assert_eq!(e, ApiError::new("badtoken", "Invalid token"));
        assert!(!e.is_maxlag());
    }

    #[test]
    fn api_error_absent() {
        assert!(ApiError::from_response(&json!({"query": {}})).is_none());
    }

    #[test]
    fn maxlag_is_recognised() {
        let response = json!({"error": {"code": "maxlag", "info": "Waiting for db1: 7 seconds lagged"}});
        assert!(ApiError::from_response(&response).unwrap().is_maxlag());
    }

    #[test]
    fn malformed_error_object_is_still_an_error() {
        let e = ApiError::from_response(&json!({"error": "boom"})).unwrap();
        assert_eq!(e.code, "unknown");
    }

    #[test]
    fn login_error_messages() {
        let e = LoginError::from_code("WrongPass");
        assert_eq!(e.to_string(), "login failed: WrongPass (Incorrect password specified)");
        assert_eq!(LoginError::from_code("Bogus").code, "Bogus");
    }
}
