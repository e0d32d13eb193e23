//! HTTP transport for `mwsession`, built on blocking `reqwest`.
//!
//! Each [`HttpTransport`] owns its own cookie jar, so two sessions built
//! from two transports never see each other's login cookies. The client is
//! configured once from [`SessionConfig`]: user agent, timeouts, redirect
//! limit, and optional proxy with basic credentials.
//!
//! GET requests carry the parameters as a query string; POST requests
//! send them as an `application/x-www-form-urlencoded` body. Any non-2xx
//! status is reported as [`TransportError::Status`]. Nothing is retried.

use mwsession::{Method, SessionConfig, Transport, TransportError};
use reqwest::blocking::{Client, Response};
use reqwest::{redirect, Proxy};
use tracing::{debug, warn};

/// A cookie-persistent blocking HTTP client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build a client from the session's transport settings.
    pub fn new(config: &SessionConfig) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .cookie_store(true)
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .redirect(redirect::Policy::limited(config.max_redirects));

        if let Some(proxy) = &config.proxy {
            let mut p = Proxy::all(&proxy.url)
                .map_err(|e| TransportError::Setup(format!("invalid proxy {}: {e}", proxy.url)))?;
            if let Some(username) = &proxy.username {
                p = p.basic_auth(username, proxy.password.as_deref().unwrap_or(""));
            }
            debug!(proxy = %proxy.url, "routing requests through proxy");
            builder = builder.proxy(p);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Setup(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn send(
        &self,
        url: &str,
        params: &[(String, String)],
        method: Method,
    ) -> Result<Vec<u8>, TransportError> {
        let request = match method {
            Method::Get => self.client.get(url).query(params),
            Method::Post => self.client.post(url).form(params),
        };

        let response = request.send().map_err(|e| request_error(url, e))?;
        read_body(url, response)
    }
}

fn read_body(url: &str, response: Response) -> Result<Vec<u8>, TransportError> {
    let status = response.status();
    if !status.is_success() {
        warn!(%url, status = status.as_u16(), "non-success HTTP status");
        return Err(TransportError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    response
        .bytes()
        .map(|b| b.to_vec())
        .map_err(|e| request_error(url, e))
}

fn request_error(url: &str, e: reqwest::Error) -> TransportError {
    TransportError::Request {
        url: url.to_string(),
        message: e.to_string(),
    }
}
