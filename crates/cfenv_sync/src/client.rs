//! Configured entry point.

use crate::config::{ClientConfig, HotUpdateConfig};
use crate::env::{apply_to_environment, ProcessEnv};
use crate::error::CfenvResult;
use crate::fetcher::{History, SnapshotFetcher};
use crate::http::HttpClient;
use crate::kv::{RemoteKv, TokenStatus};
use crate::snapshot::{export_as_json, export_as_lines, Snapshot};
use crate::transport::{CancelToken, Transport};
use crate::updater::{ErrorCallback, HotUpdater, UpdateReason};
use std::sync::Arc;

#[cfg(feature = "reqwest-client")]
use crate::http::ReqwestClient;

/// Client for one project environment stored in Workers KV.
///
/// # Example
///
/// ```rust,no_run
/// use cfenv_sync::{CfenvClient, ClientConfig};
///
/// let config = ClientConfig::from_env()?;
/// let client = CfenvClient::new(config)?;
/// let snapshot = client.fetch_flat_env()?;
/// println!("{} entries", snapshot.len());
/// # Ok::<(), cfenv_sync::CfenvError>(())
/// ```
pub struct CfenvClient<C: HttpClient + 'static> {
    config: ClientConfig,
    fetcher: Arc<SnapshotFetcher<RemoteKv<C>>>,
}

#[cfg(feature = "reqwest-client")]
impl CfenvClient<ReqwestClient> {
    /// Creates a client using the built-in HTTP client.
    pub fn new(config: ClientConfig) -> CfenvResult<Self> {
        config.validate()?;
        let client = ReqwestClient::new(config.timeout)?;
        Self::with_http_client(config, client)
    }
}

impl<C: HttpClient + 'static> CfenvClient<C> {
    /// Creates a client that sends requests through `http`.
    pub fn with_http_client(config: ClientConfig, http: C) -> CfenvResult<Self> {
        config.validate()?;
        let transport = Transport::new(
            http,
            config.api_base_url.clone(),
            config.api_token.clone(),
            config.retry.clone(),
        );
        let store = RemoteKv::new(transport, &config.account_id, &config.namespace_id);
        let fetcher = Arc::new(SnapshotFetcher::new(store, &config));
        Ok(Self { config, fetcher })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the snapshot fetcher.
    pub fn fetcher(&self) -> &SnapshotFetcher<RemoteKv<C>> {
        &self.fetcher
    }

    /// Fetches and verifies the current snapshot in the configured
    /// storage mode.
    pub fn fetch_env(&self) -> CfenvResult<Snapshot> {
        self.fetcher.fetch_env()
    }

    /// Fetches and verifies the current flat-mode snapshot.
    pub fn fetch_flat_env(&self) -> CfenvResult<Snapshot> {
        self.fetcher.fetch_flat_env()
    }

    /// Fetches and verifies a snapshot-mode version; `None` reads the
    /// version the current pointer names.
    pub fn fetch_snapshot_env(&self, version: Option<&str>) -> CfenvResult<Snapshot> {
        self.fetcher.fetch_snapshot_env(version)
    }

    /// Lists what has been published, newest first.
    pub fn history(&self, limit: usize) -> CfenvResult<History> {
        self.fetcher.history(limit, &CancelToken::new())
    }

    /// Fetches the current snapshot as `.env` lines.
    pub fn export_dotenv(&self) -> CfenvResult<String> {
        Ok(export_as_lines(&self.fetch_env()?))
    }

    /// Fetches the current snapshot as a JSON object.
    pub fn export_json(&self) -> CfenvResult<String> {
        export_as_json(&self.fetch_env()?)
    }

    /// Fetches the current snapshot and writes it into the process
    /// environment. Returns the names that were written.
    ///
    /// See [`ProcessEnv`] for the thread-safety caveat.
    pub fn apply_to_process_env(&self, overwrite: bool) -> CfenvResult<Vec<String>> {
        let snapshot = self.fetch_env()?;
        Ok(apply_to_environment(&snapshot, overwrite, &mut ProcessEnv))
    }

    /// Creates a stopped hot updater polling this client's target.
    pub fn create_hot_updater<U>(
        &self,
        on_update: U,
        on_error: Option<ErrorCallback>,
        config: HotUpdateConfig,
    ) -> HotUpdater
    where
        U: FnMut(&Snapshot, UpdateReason) + Send + 'static,
    {
        HotUpdater::new(self.fetcher.clone(), on_update, on_error, config)
    }

    /// Checks that the API token is valid.
    pub fn verify_token(&self) -> CfenvResult<TokenStatus> {
        self.fetcher.store().verify_token(&CancelToken::new())
    }
}
