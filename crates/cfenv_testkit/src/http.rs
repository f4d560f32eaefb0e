//! HTTP clients for tests.
//!
//! [`ScriptedHttpClient`] replays queued responses and records every
//! request. [`KvApiClient`] answers like the Workers KV REST API from a
//! [`MemoryKv`], so a full `CfenvClient` can run without a network.

use cfenv_sync::{
    CancelToken, HttpClient, HttpFailure, HttpRequest, HttpResponse, KvStore, MemoryKv,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Replays queued results, one per request.
///
/// When the queue is empty every request fails with a non-transient error.
#[derive(Default)]
pub struct ScriptedHttpClient {
    script: Mutex<VecDeque<Result<HttpResponse, HttpFailure>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    /// Creates a client with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn push_response(&self, response: HttpResponse) -> &Self {
        self.script.lock().push_back(Ok(response));
        self
    }

    /// Queues a response with a status and a text body.
    pub fn push_status(&self, status: u16, body: &str) -> &Self {
        self.push_response(HttpResponse::new(status, body))
    }

    /// Queues a JSON response.
    pub fn push_json(&self, status: u16, body: serde_json::Value) -> &Self {
        self.push_response(
            HttpResponse::new(status, body.to_string())
                .with_header("content-type", "application/json"),
        )
    }

    /// Queues a network failure.
    pub fn push_failure(&self, failure: HttpFailure) -> &Self {
        self.script.lock().push_back(Err(failure));
        self
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Returns the number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Returns the number of queued results not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

impl HttpClient for ScriptedHttpClient {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpFailure> {
        self.requests.lock().push(request.clone());
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(HttpFailure::other("no scripted response left")))
    }
}

/// Builds a successful key-listing envelope.
pub fn keys_page_json(names: &[&str], cursor: Option<&str>) -> serde_json::Value {
    let result: Vec<_> = names
        .iter()
        .map(|name| serde_json::json!({ "name": name }))
        .collect();
    serde_json::json!({
        "success": true,
        "errors": [],
        "messages": [],
        "result": result,
        "result_info": { "count": names.len(), "cursor": cursor.unwrap_or("") },
    })
}

/// Builds a failed envelope with the given messages.
pub fn error_json(messages: &[&str]) -> serde_json::Value {
    let errors: Vec<_> = messages
        .iter()
        .enumerate()
        .map(|(i, message)| serde_json::json!({ "code": 10000 + i, "message": message }))
        .collect();
    serde_json::json!({ "success": false, "errors": errors, "messages": [], "result": null })
}

/// Serves the Workers KV read endpoints from a [`MemoryKv`].
///
/// Requests outside `{base_url}/accounts/{account}/storage/kv/namespaces/{ns}`
/// get a 404 envelope. Listing honors `prefix`, and `cursor` as produced by
/// [`MemoryKv`].
pub struct KvApiClient {
    store: Arc<MemoryKv>,
    namespace_url: String,
    requests: Mutex<Vec<HttpRequest>>,
}

impl KvApiClient {
    /// Creates an API serving `store` for one account and namespace.
    pub fn new(store: Arc<MemoryKv>, base_url: &str, account_id: &str, namespace_id: &str) -> Self {
        Self {
            store,
            namespace_url: format!(
                "{}/accounts/{}/storage/kv/namespaces/{}",
                base_url.trim_end_matches('/'),
                account_id,
                namespace_id
            ),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Returns the backing store.
    pub fn store(&self) -> &Arc<MemoryKv> {
        &self.store
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    fn list(&self, request: &HttpRequest) -> HttpResponse {
        let prefix = request.query_param("prefix").unwrap_or_default();
        let cursor = request.query_param("cursor");
        match self.store.list_keys_page(prefix, cursor, &CancelToken::new()) {
            Ok(page) => {
                let names: Vec<&str> = page.names.iter().map(String::as_str).collect();
                json_response(200, keys_page_json(&names, page.cursor.as_deref()))
            }
            Err(e) => json_response(503, error_json(&[e.to_string().as_str()])),
        }
    }

    fn value(&self, encoded_key: &str) -> HttpResponse {
        let Ok(key) = urlencoding::decode(encoded_key) else {
            return json_response(400, error_json(&["invalid key encoding"]));
        };
        match self.store.get_value(&key, &CancelToken::new()) {
            Ok(Some(value)) => HttpResponse::new(200, value),
            Ok(None) => json_response(404, error_json(&["key not found"])),
            Err(e) => json_response(503, error_json(&[e.to_string().as_str()])),
        }
    }
}

impl HttpClient for KvApiClient {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpFailure> {
        self.requests.lock().push(request.clone());
        let Some(rest) = request.url.strip_prefix(&self.namespace_url) else {
            return Ok(json_response(404, error_json(&["route not found"])));
        };

        if rest == "/keys" {
            return Ok(self.list(request));
        }
        match rest.strip_prefix("/values/") {
            Some(key) => Ok(self.value(key)),
            None => Ok(json_response(404, error_json(&["route not found"]))),
        }
    }
}

fn json_response(status: u16, body: serde_json::Value) -> HttpResponse {
    HttpResponse::new(status, body.to_string()).with_header("content-type", "application/json")
}
