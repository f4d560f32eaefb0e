//! Remote key-value store access.
//!
//! The fetcher reads through [`KvStore`], which exposes exactly the two
//! read operations it needs. [`RemoteKv`] implements it over the Workers KV
//! REST API; [`MemoryKv`] keeps everything in memory for tests and local
//! tooling.

use crate::error::{CfenvError, CfenvResult};
use crate::http::{HttpClient, Method};
use crate::transport::{CancelToken, Transport};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Page size requested when listing keys.
pub const LIST_PAGE_LIMIT: usize = 1000;

/// One page of a key listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPage {
    /// Key names on this page.
    pub names: Vec<String>,
    /// Cursor for the next page; `None` on the last page.
    pub cursor: Option<String>,
}

/// Read access to a key-value store.
pub trait KvStore: Send + Sync {
    /// Reads a value. Returns `Ok(None)` if the key does not exist.
    fn get_value(&self, key: &str, cancel: &CancelToken) -> CfenvResult<Option<String>>;

    /// Lists one page of keys starting with `prefix`.
    fn list_keys_page(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        cancel: &CancelToken,
    ) -> CfenvResult<KeyPage>;

    /// Lists every key starting with `prefix`, following cursors until the
    /// store reports the last page.
    fn list_all_keys(&self, prefix: &str, cancel: &CancelToken) -> CfenvResult<Vec<String>> {
        let mut names = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self.list_keys_page(prefix, cursor.as_deref(), cancel)?;
            pages += 1;
            names.extend(page.names);
            match page.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!(prefix, pages, keys = names.len(), "listed keys");
        Ok(names)
    }
}

impl<S: KvStore + ?Sized> KvStore for Arc<S> {
    fn get_value(&self, key: &str, cancel: &CancelToken) -> CfenvResult<Option<String>> {
        (**self).get_value(key, cancel)
    }

    fn list_keys_page(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        cancel: &CancelToken,
    ) -> CfenvResult<KeyPage> {
        (**self).list_keys_page(prefix, cursor, cancel)
    }
}

#[derive(Debug, Deserialize)]
struct KeyName {
    name: String,
}

/// Result of a token verification call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenStatus {
    /// Token ID.
    #[serde(default)]
    pub id: String,
    /// Token status as reported by the API (`"active"` for a usable token).
    #[serde(default)]
    pub status: String,
}

impl TokenStatus {
    /// Returns true if the token is active.
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

/// [`KvStore`] backed by the Workers KV REST API.
pub struct RemoteKv<C: HttpClient> {
    transport: Transport<C>,
    namespace_path: String,
}

impl<C: HttpClient> RemoteKv<C> {
    /// Creates a store for one namespace of one account.
    pub fn new(transport: Transport<C>, account_id: &str, namespace_id: &str) -> Self {
        let namespace_path = format!(
            "/accounts/{}/storage/kv/namespaces/{}",
            urlencoding::encode(account_id),
            urlencoding::encode(namespace_id)
        );
        Self {
            transport,
            namespace_path,
        }
    }

    /// Returns the underlying transport.
    pub fn transport(&self) -> &Transport<C> {
        &self.transport
    }

    /// Checks the API token against the token verification endpoint.
    pub fn verify_token(&self, cancel: &CancelToken) -> CfenvResult<TokenStatus> {
        let envelope = self.transport.execute_envelope::<TokenStatus>(
            Method::Get,
            "/user/tokens/verify",
            &[],
            cancel,
        )?;
        Ok(envelope.result.unwrap_or_default())
    }
}

impl<C: HttpClient> KvStore for RemoteKv<C> {
    fn get_value(&self, key: &str, cancel: &CancelToken) -> CfenvResult<Option<String>> {
        let path = format!("{}/values/{}", self.namespace_path, urlencoding::encode(key));
        let response = self.transport.execute(Method::Get, &path, &[], cancel)?;

        if response.status == 404 {
            return Ok(None);
        }
        if response.status >= 400 {
            return Err(CfenvError::Transport {
                message: format!("failed to read key {} (HTTP {})", key, response.status),
                retryable: crate::transport::is_retryable_status(response.status),
            });
        }
        Ok(Some(response.text()))
    }

    fn list_keys_page(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        cancel: &CancelToken,
    ) -> CfenvResult<KeyPage> {
        let path = format!("{}/keys", self.namespace_path);
        let mut query = vec![
            ("prefix".to_string(), prefix.to_string()),
            ("limit".to_string(), LIST_PAGE_LIMIT.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor".to_string(), cursor.to_string()));
        }

        let envelope = self
            .transport
            .execute_envelope::<Vec<KeyName>>(Method::Get, &path, &query, cancel)?;
        let cursor = envelope.next_cursor().map(str::to_string);
        let names = envelope
            .result
            .unwrap_or_default()
            .into_iter()
            .map(|k| k.name)
            .collect();

        Ok(KeyPage { names, cursor })
    }
}

/// In-memory [`KvStore`].
///
/// Listing is paginated with the last returned key as the cursor, so pages
/// stay consistent while keys are added or removed between calls.
#[derive(Debug)]
pub struct MemoryKv {
    data: RwLock<BTreeMap<String, String>>,
    page_size: usize,
    unavailable: AtomicBool,
    reads: AtomicU64,
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKv {
    /// Creates an empty store with the remote page size.
    pub fn new() -> Self {
        Self::with_page_size(LIST_PAGE_LIMIT)
    }

    /// Creates an empty store that lists at most `page_size` keys per page.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            page_size: page_size.max(1),
            unavailable: AtomicBool::new(false),
            reads: AtomicU64::new(0),
        }
    }

    /// Stores a value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.data.write().insert(key.into(), value.into());
    }

    /// Removes a value, returning it if present.
    pub fn remove(&self, key: &str) -> Option<String> {
        self.data.write().remove(key)
    }

    /// Removes every key starting with `prefix`.
    pub fn clear_prefix(&self, prefix: &str) {
        self.data.write().retain(|k, _| !k.starts_with(prefix));
    }

    /// Returns the number of stored keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Makes every subsequent read fail with a retryable transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of read operations served (values and pages).
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    fn begin_read(&self, cancel: &CancelToken) -> CfenvResult<()> {
        cancel.check()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CfenvError::transport_retryable("store unavailable"));
        }
        Ok(())
    }
}

impl KvStore for MemoryKv {
    fn get_value(&self, key: &str, cancel: &CancelToken) -> CfenvResult<Option<String>> {
        self.begin_read(cancel)?;
        Ok(self.data.read().get(key).cloned())
    }

    fn list_keys_page(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        cancel: &CancelToken,
    ) -> CfenvResult<KeyPage> {
        self.begin_read(cancel)?;
        let data = self.data.read();
        let start = match cursor {
            Some(after) => Bound::Excluded(after.to_string()),
            None => Bound::Included(prefix.to_string()),
        };

        let mut names: Vec<String> = data
            .range((start, Bound::Unbounded))
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
            .take(self.page_size + 1)
            .cloned()
            .collect();

        let cursor = if names.len() > self.page_size {
            names.truncate(self.page_size);
            names.last().cloned()
        } else {
            None
        };

        Ok(KeyPage { names, cursor })
    }
}
