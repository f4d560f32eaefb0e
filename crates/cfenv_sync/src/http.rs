//! HTTP client abstraction.
//!
//! The transport talks to the remote API only through [`HttpClient`], one
//! call per attempt. This keeps retry policy out of the HTTP library and
//! lets tests script responses without a network.

use std::fmt;

/// HTTP method used by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET request.
    Get,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
        }
    }
}

/// A single HTTP request attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method.
    pub method: Method,
    /// Absolute URL without the query string.
    pub url: String,
    /// Query parameters, in order.
    pub query: Vec<(String, String)>,
    /// Request headers, in order.
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// Returns the value of the first header with this name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Returns the value of the first query parameter with this name.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A response received from the remote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response with no headers.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Returns the value of the first header with this name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns the body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Kind of network-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The connection could not be established or was dropped.
    Connect,
    /// The attempt exceeded its timeout.
    Timeout,
    /// Any other failure (bad request construction, TLS setup, ...).
    Other,
}

/// A request attempt that produced no HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFailure {
    /// Failure kind.
    pub kind: FailureKind,
    /// Error message.
    pub message: String,
}

impl HttpFailure {
    /// Creates a connection failure.
    pub fn connect(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Connect,
            message: message.into(),
        }
    }

    /// Creates a timeout failure.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: message.into(),
        }
    }

    /// Creates a failure of another kind.
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Other,
            message: message.into(),
        }
    }

    /// Returns true if another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, FailureKind::Connect | FailureKind::Timeout)
    }
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Timeout => write!(f, "request timed out: {}", self.message),
            FailureKind::Connect => write!(f, "connection failed: {}", self.message),
            FailureKind::Other => f.write_str(&self.message),
        }
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to plug in a different HTTP library. Each call is a
/// single attempt; retries are the transport's job.
pub trait HttpClient: Send + Sync {
    /// Sends one request.
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpFailure>;
}

impl<C: HttpClient + ?Sized> HttpClient for std::sync::Arc<C> {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpFailure> {
        (**self).send(request)
    }
}

#[cfg(feature = "reqwest-client")]
pub use self::reqwest_client::ReqwestClient;

#[cfg(feature = "reqwest-client")]
mod reqwest_client {
    use super::{HttpClient, HttpFailure, HttpRequest, HttpResponse, Method};
    use crate::error::{CfenvError, CfenvResult};
    use std::time::Duration;

    /// [`HttpClient`] backed by `reqwest`'s blocking client.
    ///
    /// The underlying connection pool is reused across requests.
    pub struct ReqwestClient {
        client: reqwest::blocking::Client,
    }

    impl ReqwestClient {
        /// Creates a client with the given per-attempt timeout.
        pub fn new(timeout: Duration) -> CfenvResult<Self> {
            let client = reqwest::blocking::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| {
                    CfenvError::transport_fatal(format!("failed to create HTTP client: {e}"))
                })?;
            Ok(Self { client })
        }
    }

    impl HttpClient for ReqwestClient {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpFailure> {
            let mut builder = match request.method {
                Method::Get => self.client.get(&request.url),
            };
            if !request.query.is_empty() {
                builder = builder.query(&request.query);
            }
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            let response = builder.send().map_err(classify)?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect();
            let body = response.bytes().map_err(classify)?.to_vec();

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        }
    }

    fn classify(err: reqwest::Error) -> HttpFailure {
        if err.is_timeout() {
            HttpFailure::timeout(err.to_string())
        } else if err.is_connect() || err.is_request() || err.is_body() {
            HttpFailure::connect(err.to_string())
        } else {
            HttpFailure::other(err.to_string())
        }
    }
}
