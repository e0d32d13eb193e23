//! The transport seam.
//!
//! The engine never opens a socket itself. Every request goes through a
//! [`Transport`], which owns cookies, redirects, TLS and timeouts. The
//! production implementation lives in the `mwsession-http` crate; tests
//! substitute a scripted one.

use std::fmt;

use thiserror::Error;

/// HTTP verb for a single exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed request/response exchange. Never retried by the engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("failed to set up HTTP client: {0}")]
    Setup(String),
}

/// Performs one request/response exchange and returns the raw body.
///
/// `params` is the already-encoded payload: a query string for
/// [`Method::Get`], a form body for [`Method::Post`].
pub trait Transport: Send + Sync {
    fn send(
        &self,
        url: &str,
        params: &[(String, String)],
        method: Method,
    ) -> Result<Vec<u8>, TransportError>;
}
