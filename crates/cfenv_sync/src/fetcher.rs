//! Consistency-checked snapshot fetch.
//!
//! In flat mode a fetch reads the metadata record first, then every
//! variable under the vars prefix, and only returns a [`Snapshot`] when the
//! checksum recomputed over what was read equals the one the metadata
//! announced.
//!
//! In snapshot mode the current pointer names one version; the version
//! payload is decrypted if needed and its entries are checked against the
//! checksum stored inside it.

use crate::checksum::checksum_entries;
use crate::config::{ClientConfig, StorageMode};
use crate::crypto::{decrypt_snapshot_payload, is_encrypted_payload};
use crate::error::{CfenvResult, IntegrityError};
use crate::keys::KeyLayout;
use crate::kv::KvStore;
use crate::snapshot::{
    CurrentPointer, EnvEntries, FlatMetadata, RemoteSnapshot, Snapshot, SnapshotVersion,
};
use crate::transport::CancelToken;
use std::sync::Arc;
use tracing::debug;

/// What has been published for a project environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum History {
    /// Flat mode: the metadata record, if one exists.
    Flat(Option<FlatMetadata>),
    /// Snapshot mode: version IDs, newest first.
    Versions(Vec<String>),
}

/// Something that can produce verified snapshots.
///
/// The hot updater polls through this trait.
pub trait SnapshotSource: Send + Sync {
    /// Fetches a verified snapshot, observing `cancel` at retry boundaries.
    fn fetch(&self, cancel: &CancelToken) -> CfenvResult<Snapshot>;
}

impl<T: SnapshotSource + ?Sized> SnapshotSource for Arc<T> {
    fn fetch(&self, cancel: &CancelToken) -> CfenvResult<Snapshot> {
        (**self).fetch(cancel)
    }
}

/// Fetches snapshots for one project environment.
pub struct SnapshotFetcher<S: KvStore> {
    store: S,
    layout: KeyLayout,
    project: String,
    environment: String,
    namespace_id: String,
    mode: StorageMode,
    encryption_key: Option<String>,
}

impl<S: KvStore> SnapshotFetcher<S> {
    /// Creates a fetcher reading the target named by `config`.
    pub fn new(store: S, config: &ClientConfig) -> Self {
        Self {
            store,
            layout: KeyLayout::new(&config.key_prefix, &config.project, &config.environment),
            project: config.project.clone(),
            environment: config.environment.clone(),
            namespace_id: config.namespace_id.clone(),
            mode: config.storage_mode,
            encryption_key: config.encryption_key.clone(),
        }
    }

    /// Returns the configured storage mode.
    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the key layout.
    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    /// Fetches and verifies the current snapshot in the configured mode.
    pub fn fetch_env(&self) -> CfenvResult<Snapshot> {
        self.fetch_env_with(&CancelToken::new())
    }

    /// Like [`fetch_env`](Self::fetch_env), observing `cancel`.
    pub fn fetch_env_with(&self, cancel: &CancelToken) -> CfenvResult<Snapshot> {
        match self.mode {
            StorageMode::Flat => self.fetch_flat_env_with(cancel),
            StorageMode::Snapshot => self.fetch_snapshot_env_with(None, cancel),
        }
    }

    /// Fetches and verifies the current flat-mode snapshot.
    pub fn fetch_flat_env(&self) -> CfenvResult<Snapshot> {
        self.fetch_flat_env_with(&CancelToken::new())
    }

    /// Like [`fetch_flat_env`](Self::fetch_flat_env), observing `cancel`.
    pub fn fetch_flat_env_with(&self, cancel: &CancelToken) -> CfenvResult<Snapshot> {
        let metadata = self.read_metadata(cancel)?;
        let entries = self.read_entries(cancel)?;

        let actual = checksum_entries(&entries);
        if actual != metadata.checksum {
            return Err(IntegrityError::ChecksumMismatch {
                expected: metadata.checksum,
                actual,
            }
            .into());
        }

        debug!(
            project = %self.project,
            environment = %self.environment,
            entries = entries.len(),
            "fetched snapshot"
        );

        Ok(Snapshot {
            project: self.project.clone(),
            environment: self.environment.clone(),
            namespace_id: self.namespace_id.clone(),
            metadata,
            entries,
            version: None,
        })
    }

    /// Fetches and verifies a snapshot-mode version; `None` follows the
    /// current pointer.
    pub fn fetch_snapshot_env(&self, version: Option<&str>) -> CfenvResult<Snapshot> {
        self.fetch_snapshot_env_with(version, &CancelToken::new())
    }

    /// Like [`fetch_snapshot_env`](Self::fetch_snapshot_env), observing
    /// `cancel`.
    pub fn fetch_snapshot_env_with(
        &self,
        version: Option<&str>,
        cancel: &CancelToken,
    ) -> CfenvResult<Snapshot> {
        let version_id = match version {
            Some(id) => id.to_string(),
            None => self.read_pointer(cancel)?.version_id,
        };

        let raw = self
            .store
            .get_value(&self.layout.version_key(&version_id), cancel)?
            .ok_or_else(|| IntegrityError::VersionNotFound(version_id.clone()))?;
        let encrypted = is_encrypted_payload(&raw);
        let payload = decrypt_snapshot_payload(&raw, self.encryption_key.as_deref())?;
        let remote: RemoteSnapshot = serde_json::from_str(&payload)
            .map_err(|e| IntegrityError::InvalidSnapshot(e.to_string()))?;

        if remote.checksum.is_empty() {
            return Err(IntegrityError::MissingChecksum.into());
        }
        let actual = checksum_entries(&remote.entries);
        if actual != remote.checksum {
            return Err(IntegrityError::ChecksumMismatch {
                expected: remote.checksum,
                actual,
            }
            .into());
        }

        debug!(
            project = %self.project,
            environment = %self.environment,
            version = %version_id,
            encrypted,
            entries = remote.entries.len(),
            "fetched snapshot version"
        );

        let id = if remote.version_id.is_empty() {
            version_id
        } else {
            remote.version_id
        };
        Ok(Snapshot {
            project: self.project.clone(),
            environment: self.environment.clone(),
            namespace_id: self.namespace_id.clone(),
            metadata: FlatMetadata {
                checksum: remote.checksum,
                updated_at: remote.updated_at,
                updated_by: remote.updated_by,
                entries_count: remote.entries.len() as u64,
            },
            entries: remote.entries,
            version: Some(SnapshotVersion { id, encrypted }),
        })
    }

    /// Reads what has been published: the flat metadata record, or up to
    /// `limit` version IDs in snapshot mode.
    pub fn history(&self, limit: usize, cancel: &CancelToken) -> CfenvResult<History> {
        match self.mode {
            StorageMode::Flat => {
                let Some(raw) = self.store.get_value(&self.layout.meta_key(), cancel)? else {
                    return Ok(History::Flat(None));
                };
                let metadata = serde_json::from_str(&raw)
                    .map_err(|e| IntegrityError::InvalidMetadata(e.to_string()))?;
                Ok(History::Flat(Some(metadata)))
            }
            StorageMode::Snapshot => {
                let keys = self
                    .store
                    .list_all_keys(&self.layout.versions_prefix(), cancel)?;
                let mut ids: Vec<String> = keys
                    .iter()
                    .filter_map(|key| self.layout.version_id(key))
                    .map(str::to_string)
                    .collect();
                ids.sort_unstable_by(|a, b| b.cmp(a));
                ids.dedup();
                ids.truncate(limit);
                Ok(History::Versions(ids))
            }
        }
    }

    fn read_pointer(&self, cancel: &CancelToken) -> CfenvResult<CurrentPointer> {
        let raw = self
            .store
            .get_value(&self.layout.current_key(), cancel)?
            .ok_or(IntegrityError::PointerNotFound)?;

        let pointer: CurrentPointer = serde_json::from_str(&raw)
            .map_err(|e| IntegrityError::InvalidPointer(e.to_string()))?;
        if pointer.version_id.is_empty() {
            return Err(IntegrityError::InvalidPointer("missing versionId".into()).into());
        }
        Ok(pointer)
    }

    fn read_metadata(&self, cancel: &CancelToken) -> CfenvResult<FlatMetadata> {
        let raw = self
            .store
            .get_value(&self.layout.meta_key(), cancel)?
            .ok_or(IntegrityError::MetadataNotFound)?;

        let metadata: FlatMetadata = serde_json::from_str(&raw)
            .map_err(|e| IntegrityError::InvalidMetadata(e.to_string()))?;
        if metadata.checksum.is_empty() {
            return Err(IntegrityError::MissingChecksum.into());
        }
        Ok(metadata)
    }

    fn read_entries(&self, cancel: &CancelToken) -> CfenvResult<EnvEntries> {
        let prefix = self.layout.vars_prefix();
        let keys = self.store.list_all_keys(&prefix, cancel)?;

        let mut entries = EnvEntries::new();
        let mut vanished = 0usize;
        for key in &keys {
            let Some(name) = self.layout.var_name(key) else {
                continue;
            };
            match self.store.get_value(key, cancel)? {
                Some(value) => {
                    entries.insert(name.to_string(), value);
                }
                None => vanished += 1,
            }
        }

        debug!(listed = keys.len(), read = entries.len(), vanished, "read entries");
        Ok(entries)
    }
}

impl<S: KvStore> SnapshotSource for SnapshotFetcher<S> {
    fn fetch(&self, cancel: &CancelToken) -> CfenvResult<Snapshot> {
        self.fetch_env_with(cancel)
    }
}
