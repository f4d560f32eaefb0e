//! Retrying request layer.
//!
//! [`Transport`] performs one logical request against the remote API with a
//! bounded retry budget:
//!
//! - 408, 429 and 5xx responses are retried, honoring `Retry-After`
//! - connection failures and timeouts are retried with `base * 2^attempt`
//! - every other response (404 included) is returned to the caller as-is
//!
//! Auth and identification headers are attached to every attempt.

use crate::config::RetryConfig;
use crate::error::{CfenvError, CfenvResult};
use crate::http::{HttpClient, HttpRequest, HttpResponse, Method};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("cfenv-kv-sync-rust/", env!("CARGO_PKG_VERSION"));

/// Granularity of cancellable sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Shared cancellation flag checked at retry boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals cancellation to every clone of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns an error if cancelled.
    pub fn check(&self) -> CfenvResult<()> {
        if self.is_cancelled() {
            Err(CfenvError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleeps for `delay`, waking early with an error if cancelled.
    pub fn sleep(&self, delay: Duration) -> CfenvResult<()> {
        let mut remaining = delay;
        loop {
            self.check()?;
            if remaining.is_zero() {
                return Ok(());
            }
            let slice = remaining.min(SLEEP_SLICE);
            std::thread::sleep(slice);
            remaining -= slice;
        }
    }
}

/// Returns true if a response status should be retried.
pub fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

/// Parses a `Retry-After` value relative to `now`.
///
/// Accepts a non-negative number of seconds (fractions allowed) or an
/// HTTP-date; dates in the past yield zero. Returns `None` when the value
/// is neither or does not fit in a [`Duration`].
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<f64>() {
        return if seconds >= 0.0 {
            Duration::try_from_secs_f64(seconds).ok()
        } else {
            None
        };
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.with_timezone(&Utc) - now;
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

/// Error message inside a response envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiMessage {
    /// Error code.
    #[serde(default)]
    pub code: i64,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

/// Pagination info inside a response envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultInfo {
    /// Cursor for the next page, if any.
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Standard response envelope of the remote API.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    /// Whether the call succeeded.
    #[serde(default)]
    pub success: bool,
    /// Errors reported by the API.
    #[serde(default)]
    pub errors: Vec<ApiMessage>,
    /// The payload.
    pub result: Option<T>,
    /// Pagination info.
    #[serde(default)]
    pub result_info: Option<ResultInfo>,
}

impl<T> Envelope<T> {
    /// Joins the non-empty error messages with `"; "`.
    pub fn error_message(&self) -> Option<String> {
        let messages: Vec<&str> = self
            .errors
            .iter()
            .map(|e| e.message.trim())
            .filter(|m| !m.is_empty())
            .collect();
        if messages.is_empty() {
            None
        } else {
            Some(messages.join("; "))
        }
    }

    /// Returns the next page cursor, treating an empty string as absent.
    pub fn next_cursor(&self) -> Option<&str> {
        self.result_info
            .as_ref()
            .and_then(|info| info.cursor.as_deref())
            .filter(|cursor| !cursor.is_empty())
    }
}

/// Retrying HTTP transport for the remote API.
pub struct Transport<C: HttpClient> {
    client: C,
    base_url: String,
    api_token: String,
    retry: RetryConfig,
}

impl<C: HttpClient> Transport<C> {
    /// Creates a transport.
    pub fn new(
        client: C,
        base_url: impl Into<String>,
        api_token: impl Into<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
            retry,
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the retry configuration.
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Returns the wrapped HTTP client.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn request(&self, method: Method, path: &str, query: &[(String, String)]) -> HttpRequest {
        HttpRequest {
            method,
            url: format!("{}{}", self.base_url, path),
            query: query.to_vec(),
            headers: vec![
                ("Authorization".into(), format!("Bearer {}", self.api_token)),
                ("User-Agent".into(), USER_AGENT.into()),
            ],
        }
    }

    /// Performs a request with retries.
    ///
    /// Returns the final HTTP response, whatever its status, once it is
    /// terminal or the retry budget is spent. Network failures that outlast
    /// the budget become [`CfenvError::Transport`].
    pub fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        cancel: &CancelToken,
    ) -> CfenvResult<HttpResponse> {
        let request = self.request(method, path, query);
        let mut attempt = 0u32;

        loop {
            cancel.check()?;
            debug!(method = %method, path, attempt, "sending request");

            let delay = match self.client.send(&request) {
                Ok(response) => {
                    if !is_retryable_status(response.status)
                        || attempt >= self.retry.max_retries
                    {
                        return Ok(response);
                    }
                    let delay = match response.header("retry-after") {
                        Some(hint) => parse_retry_after(hint, Utc::now())
                            .unwrap_or(self.retry.fallback_delay),
                        None => self.retry.delay_for_attempt(attempt),
                    };
                    warn!(
                        path,
                        status = response.status,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying request"
                    );
                    delay
                }
                Err(failure) => {
                    if !failure.is_transient() {
                        return Err(CfenvError::transport_fatal(format!(
                            "network error: {failure}"
                        )));
                    }
                    if attempt >= self.retry.max_retries {
                        return Err(CfenvError::transport_retryable(format!(
                            "network error after {} attempts: {failure}",
                            attempt + 1
                        )));
                    }
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        path,
                        error = %failure,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying request after network failure"
                    );
                    delay
                }
            };

            cancel.sleep(delay)?;
            attempt += 1;
        }
    }

    /// Performs a request and decodes the JSON envelope.
    ///
    /// A status of 400 or above, or `success: false`, becomes a
    /// [`CfenvError::Transport`] carrying the joined API messages.
    pub fn execute_envelope<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        cancel: &CancelToken,
    ) -> CfenvResult<Envelope<T>> {
        let response = self.execute(method, path, query, cancel)?;
        decode_envelope(&response)
    }
}

/// Decodes an API envelope, converting failures into transport errors.
pub fn decode_envelope<T: DeserializeOwned>(response: &HttpResponse) -> CfenvResult<Envelope<T>> {
    let retryable = is_retryable_status(response.status);
    let envelope: Envelope<T> =
        serde_json::from_slice(&response.body).map_err(|_| CfenvError::Transport {
            message: format!("non-JSON response (HTTP {})", response.status),
            retryable,
        })?;

    if response.status >= 400 || !envelope.success {
        let message = envelope
            .error_message()
            .unwrap_or_else(|| format!("request failed with HTTP {}", response.status));
        return Err(CfenvError::Transport { message, retryable });
    }

    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpFailure;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct TestClient {
        responses: Mutex<VecDeque<Result<HttpResponse, HttpFailure>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl TestClient {
        fn new(responses: Vec<Result<HttpResponse, HttpFailure>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().len()
        }
    }

    impl HttpClient for TestClient {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpFailure> {
            self.requests.lock().push(request.clone());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(HttpFailure::other("no response scripted")))
        }
    }

    fn transport(
        responses: Vec<Result<HttpResponse, HttpFailure>>,
        retries: u32,
    ) -> Transport<TestClient> {
        Transport::new(
            TestClient::new(responses),
            "https://api.example.com/client/v4/",
            "token-1",
            RetryConfig::new(retries, Duration::from_millis(1)),
        )
    }

    #[test]
    fn retryable_statuses() {
        for status in [408, 429, 500, 502, 503, 599] {
            assert!(is_retryable_status(status), "{status}");
        }
        for status in [200, 204, 400, 401, 403, 404, 409] {
            assert!(!is_retryable_status(status), "{status}");
        }
    }

    #[test]
    fn retry_after_seconds() {
        let now = Utc::now();
        assert_eq!(parse_retry_after("0", now), Some(Duration::ZERO));
        assert_eq!(parse_retry_after(" 3 ", now), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after("1.5", now), Some(Duration::from_millis(1500)));
        assert_eq!(parse_retry_after("-1", now), None);
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[test]
    fn retry_after_too_large_for_duration() {
        let now = Utc::now();
        assert_eq!(parse_retry_after("1e20", now), None);
        assert_eq!(parse_retry_after("99999999999999999999", now), None);
        assert_eq!(parse_retry_after("inf", now), None);
        assert_eq!(parse_retry_after("NaN", now), None);
    }

    #[test]
    fn oversized_retry_after_falls_back() {
        let mut retry = RetryConfig::new(1, Duration::from_millis(1));
        retry.fallback_delay = Duration::from_millis(1);
        let t = Transport::new(
            TestClient::new(vec![
                Ok(HttpResponse::new(429, "").with_header("retry-after", "1e20")),
                Ok(HttpResponse::new(200, "ok")),
            ]),
            "https://api.example.com/client/v4/",
            "token-1",
            retry,
        );
        let response = t.execute(Method::Get, "/x", &[], &CancelToken::new()).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(t.client().calls(), 2);
    }

    #[test]
    fn retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 50).unwrap();
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now),
            Some(Duration::from_secs(10))
        );
        // Dates in the past mean "retry now".
        let later = Utc.with_ymd_and_hms(2015, 10, 21, 8, 0, 0).unwrap();
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", later),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn success_is_not_retried() {
        let t = transport(vec![Ok(HttpResponse::new(200, "ok"))], 3);
        let response = t.execute(Method::Get, "/x", &[], &CancelToken::new()).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(t.client().calls(), 1);
    }

    #[test]
    fn not_found_is_terminal() {
        let t = transport(vec![Ok(HttpResponse::new(404, ""))], 3);
        let response = t.execute(Method::Get, "/x", &[], &CancelToken::new()).unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(t.client().calls(), 1);
    }

    #[test]
    fn retries_429_then_succeeds() {
        let t = transport(
            vec![
                Ok(HttpResponse::new(429, "").with_header("retry-after", "0")),
                Ok(HttpResponse::new(200, "ok")),
            ],
            2,
        );
        let response = t.execute(Method::Get, "/x", &[], &CancelToken::new()).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(t.client().calls(), 2);
    }

    #[test]
    fn exhausted_retries_return_last_response() {
        let t = transport(
            vec![
                Ok(HttpResponse::new(503, "")),
                Ok(HttpResponse::new(502, "")),
                Ok(HttpResponse::new(500, "last")),
            ],
            2,
        );
        let response = t.execute(Method::Get, "/x", &[], &CancelToken::new()).unwrap();
        assert_eq!(response.status, 500);
        assert_eq!(response.text(), "last");
        assert_eq!(t.client().calls(), 3);
    }

    #[test]
    fn network_failures_exhaust_into_transport_error() {
        let t = transport(
            vec![
                Err(HttpFailure::connect("refused")),
                Err(HttpFailure::timeout("slow")),
            ],
            1,
        );
        let err = t
            .execute(Method::Get, "/x", &[], &CancelToken::new())
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("slow"));
        assert_eq!(t.client().calls(), 2);
    }

    #[test]
    fn non_transient_failure_is_not_retried() {
        let t = transport(vec![Err(HttpFailure::other("bad url"))], 3);
        let err = t
            .execute(Method::Get, "/x", &[], &CancelToken::new())
            .unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(t.client().calls(), 1);
    }

    #[test]
    fn headers_are_sent_on_every_attempt() {
        let t = transport(
            vec![
                Ok(HttpResponse::new(500, "")),
                Ok(HttpResponse::new(200, "")),
            ],
            1,
        );
        let query = vec![("prefix".to_string(), "a:".to_string())];
        t.execute(Method::Get, "/keys", &query, &CancelToken::new()).unwrap();

        let requests = t.client().requests.lock();
        assert_eq!(requests.len(), 2);
        for request in requests.iter() {
            assert_eq!(request.url, "https://api.example.com/client/v4/keys");
            assert_eq!(request.header("authorization"), Some("Bearer token-1"));
            assert_eq!(request.header("user-agent"), Some(USER_AGENT));
            assert_eq!(request.query_param("prefix"), Some("a:"));
        }
    }

    #[test]
    fn cancelled_token_stops_before_sending() {
        let t = transport(vec![Ok(HttpResponse::new(200, ""))], 0);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = t.execute(Method::Get, "/x", &[], &cancel).unwrap_err();
        assert!(matches!(err, CfenvError::Cancelled));
        assert_eq!(t.client().calls(), 0);
    }

    #[test]
    fn envelope_errors_are_joined() {
        let body = r#"{"success":false,"errors":[{"code":1,"message":"bad token"},{"code":2,"message":"no access"}],"result":null}"#;
        let err = decode_envelope::<serde_json::Value>(&HttpResponse::new(403, body)).unwrap_err();
        assert_eq!(err.to_string(), "transport error: bad token; no access");
        assert!(!err.is_retryable());
    }

    #[test]
    fn envelope_without_messages_uses_fallback() {
        let body = r#"{"success":false,"errors":[]}"#;
        let err = decode_envelope::<serde_json::Value>(&HttpResponse::new(200, body)).unwrap_err();
        assert_eq!(err.to_string(), "transport error: request failed with HTTP 200");
    }

    #[test]
    fn non_json_envelope() {
        let err =
            decode_envelope::<serde_json::Value>(&HttpResponse::new(502, "<html>")).unwrap_err();
        assert_eq!(err.to_string(), "transport error: non-JSON response (HTTP 502)");
        assert!(err.is_retryable());
    }

    #[test]
    fn envelope_cursor() {
        let body = r#"{"success":true,"errors":[],"result":[],"result_info":{"cursor":"abc"}}"#;
        let envelope =
            decode_envelope::<Vec<serde_json::Value>>(&HttpResponse::new(200, body)).unwrap();
        assert_eq!(envelope.next_cursor(), Some("abc"));

        let body = r#"{"success":true,"errors":[],"result":[],"result_info":{"cursor":""}}"#;
        let envelope =
            decode_envelope::<Vec<serde_json::Value>>(&HttpResponse::new(200, body)).unwrap();
        assert_eq!(envelope.next_cursor(), None);
    }
}
