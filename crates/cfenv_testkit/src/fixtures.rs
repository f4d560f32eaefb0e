//! Seeded store fixtures.
//!
//! [`EnvFixture`] publishes entries into a [`MemoryKv`] the same way the
//! JavaScript writer does. In flat mode that is one key per variable plus a
//! metadata record with the checksum; in snapshot mode it is one version
//! record per publish plus a current pointer. Helpers break the invariants
//! on purpose for negative tests.

use crate::http::KvApiClient;
use cfenv_sync::{
    checksum_entries, CfenvClient, ClientConfig, EncryptedEnvelope, EnvEntries, KeyLayout,
    MemoryKv, RetryConfig, SnapshotFetcher, SnapshotSource, StorageMode, NONCE_SIZE, SALT_SIZE,
};
use chrono::{SecondsFormat, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Account ID used by fixtures.
pub const TEST_ACCOUNT_ID: &str = "test-account";
/// Namespace ID used by fixtures.
pub const TEST_NAMESPACE_ID: &str = "test-namespace";
/// Project used by fixtures.
pub const TEST_PROJECT: &str = "demo";
/// Environment used by fixtures.
pub const TEST_ENVIRONMENT: &str = "development";
/// Base URL served by [`KvApiClient`] in fixtures.
pub const TEST_BASE_URL: &str = "http://kv.test/client/v4";
/// Secret used for encrypted fixture versions.
pub const TEST_ENCRYPTION_KEY: &str = "unit-test-secret";

/// Fixed scrypt salt for fixture envelopes. Never reuse outside tests.
const FIXTURE_SALT: [u8; SALT_SIZE] = [0x5a; SALT_SIZE];
/// Fixed GCM nonce for fixture envelopes. Never reuse outside tests.
const FIXTURE_IV: [u8; NONCE_SIZE] = [0xa5; NONCE_SIZE];

/// Builds entries from string pairs.
pub fn entries(pairs: &[(&str, &str)]) -> EnvEntries {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Client configuration pointing at the fixture target, with fast retries.
pub fn test_config() -> ClientConfig {
    ClientConfig::new(
        TEST_ACCOUNT_ID,
        "test-token",
        TEST_NAMESPACE_ID,
        TEST_PROJECT,
        TEST_ENVIRONMENT,
    )
    .with_api_base_url(TEST_BASE_URL)
    .with_retry(RetryConfig::new(2, Duration::from_millis(1)))
}

/// An in-memory environment in either storage mode.
pub struct EnvFixture {
    store: Arc<MemoryKv>,
    config: ClientConfig,
    layout: KeyLayout,
}

impl Default for EnvFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvFixture {
    /// Creates an empty fixture for the default test target.
    pub fn new() -> Self {
        Self::with_store(MemoryKv::new())
    }

    /// Creates a fixture whose store lists at most `page_size` keys per page.
    pub fn with_page_size(page_size: usize) -> Self {
        Self::with_store(MemoryKv::with_page_size(page_size))
    }

    /// Creates an empty fixture whose config reads snapshot mode.
    pub fn snapshot_mode() -> Self {
        let mut fixture = Self::new();
        fixture.config = fixture
            .config
            .with_storage_mode(StorageMode::Snapshot)
            .with_encryption_key(TEST_ENCRYPTION_KEY);
        fixture
    }

    fn with_store(store: MemoryKv) -> Self {
        let config = test_config();
        let layout = KeyLayout::new(&config.key_prefix, &config.project, &config.environment);
        Self {
            store: Arc::new(store),
            config,
            layout,
        }
    }

    /// Returns the backing store.
    pub fn store(&self) -> &Arc<MemoryKv> {
        &self.store
    }

    /// Returns the client configuration for this target.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the key layout.
    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    /// Replaces the published entries and writes matching metadata.
    ///
    /// Returns the published checksum.
    pub fn publish(&self, pairs: &[(&str, &str)]) -> String {
        let entries = entries(pairs);
        let checksum = checksum_entries(&entries);
        self.write_entries(&entries);
        self.write_metadata(&checksum, entries.len());
        checksum
    }

    /// Replaces the published entries but writes `checksum` as metadata.
    pub fn publish_with_checksum(&self, pairs: &[(&str, &str)], checksum: &str) {
        let entries = entries(pairs);
        self.write_entries(&entries);
        self.write_metadata(checksum, entries.len());
    }

    /// Writes a variable without touching the metadata.
    pub fn set_var(&self, name: &str, value: &str) {
        self.store.set(self.layout.var_key(name), value);
    }

    /// Removes a variable without touching the metadata.
    pub fn remove_var(&self, name: &str) {
        self.store.remove(&self.layout.var_key(name));
    }

    /// Overwrites the metadata record with raw text.
    pub fn set_raw_metadata(&self, raw: &str) {
        self.store.set(self.layout.meta_key(), raw);
    }

    /// Deletes the metadata record.
    pub fn remove_metadata(&self) {
        self.store.remove(&self.layout.meta_key());
    }

    /// Writes a snapshot-mode version and points `current` at it.
    ///
    /// Returns the published checksum.
    pub fn publish_version(&self, version_id: &str, pairs: &[(&str, &str)]) -> String {
        let (payload, checksum) = self.version_payload(version_id, pairs);
        self.store.set(self.layout.version_key(version_id), payload);
        self.set_current(version_id, &checksum, false);
        checksum
    }

    /// Like [`publish_version`](Self::publish_version), but stores the
    /// payload encrypted with [`TEST_ENCRYPTION_KEY`].
    pub fn publish_encrypted_version(&self, version_id: &str, pairs: &[(&str, &str)]) -> String {
        let (payload, checksum) = self.version_payload(version_id, pairs);
        let envelope =
            EncryptedEnvelope::seal(&payload, TEST_ENCRYPTION_KEY, &FIXTURE_SALT, &FIXTURE_IV)
                .and_then(|envelope| envelope.to_json())
                .expect("fixture encryption succeeds");
        self.store.set(self.layout.version_key(version_id), envelope);
        self.set_current(version_id, &checksum, true);
        checksum
    }

    /// Writes a version record from raw text without moving the pointer.
    pub fn set_raw_version(&self, version_id: &str, raw: &str) {
        self.store.set(self.layout.version_key(version_id), raw);
    }

    /// Points `current` at `version_id`.
    pub fn set_current(&self, version_id: &str, checksum: &str, encrypted: bool) {
        let pointer = serde_json::json!({
            "schema": 1,
            "versionId": version_id,
            "checksum": checksum,
            "updatedAt": now(),
            "updatedBy": "cfenv-testkit",
            "encrypted": encrypted,
        });
        self.store.set(self.layout.current_key(), pointer.to_string());
    }

    /// Returns a fetcher reading directly from the store.
    pub fn fetcher(&self) -> SnapshotFetcher<Arc<MemoryKv>> {
        SnapshotFetcher::new(Arc::clone(&self.store), &self.config)
    }

    /// Returns the fetcher as a shared snapshot source.
    pub fn source(&self) -> Arc<dyn SnapshotSource> {
        Arc::new(self.fetcher())
    }

    /// Returns an HTTP client serving the store like the KV REST API.
    pub fn api(&self) -> KvApiClient {
        KvApiClient::new(
            Arc::clone(&self.store),
            &self.config.api_base_url,
            &self.config.account_id,
            &self.config.namespace_id,
        )
    }

    /// Returns a full client talking to [`api`](Self::api).
    pub fn client(&self) -> CfenvClient<KvApiClient> {
        CfenvClient::with_http_client(self.config.clone(), self.api())
            .expect("fixture config is valid")
    }

    fn write_entries(&self, entries: &EnvEntries) {
        self.store.clear_prefix(&self.layout.vars_prefix());
        for (name, value) in entries {
            self.store.set(self.layout.var_key(name), value.clone());
        }
    }

    fn version_payload(&self, version_id: &str, pairs: &[(&str, &str)]) -> (String, String) {
        let entries = entries(pairs);
        let checksum = checksum_entries(&entries);
        let payload = serde_json::json!({
            "schema": 1,
            "versionId": version_id,
            "project": self.config.project,
            "environment": self.config.environment,
            "checksum": checksum,
            "updatedAt": now(),
            "updatedBy": "cfenv-testkit",
            "entries": entries,
        });
        (payload.to_string(), checksum)
    }

    fn write_metadata(&self, checksum: &str, count: usize) {
        let metadata = serde_json::json!({
            "schema": 1,
            "mode": "flat",
            "checksum": checksum,
            "updatedAt": now(),
            "updatedBy": "cfenv-testkit",
            "entriesCount": count,
        });
        self.set_raw_metadata(&metadata.to_string());
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
