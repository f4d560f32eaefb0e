//! # cfenv sync
//!
//! Checksum-verified environment snapshots from Cloudflare Workers KV.
//!
//! This crate provides:
//! - Canonical form and SHA-256 checksum of env entries
//! - Retrying HTTP transport with `Retry-After` support
//! - Snapshot fetcher that verifies entries against the metadata record
//!   or against the checksum inside a snapshot-mode version
//! - AES-256-GCM decryption of encrypted snapshot-mode versions
//! - Hot updater that polls in the background with exponential backoff
//! - `.env`/JSON exports and process environment application
//!
//! ## Storage layout
//!
//! In flat mode each environment has one key per variable plus one
//! metadata key carrying the checksum of all entries.
//!
//! ```text
//! {prefix}:{project}:{environment}:meta        {"checksum": "...", ...}
//! {prefix}:{project}:{environment}:vars:{name} value
//! ```
//!
//! In snapshot mode every publish writes one immutable version, optionally
//! encrypted, and moves a pointer to it.
//!
//! ```text
//! {prefix}:{project}:{environment}:current       {"versionId": "...", ...}
//! {prefix}:{project}:{environment}:versions:{id} {"checksum": "...", "entries": {...}}
//! ```
//!
//! ## Key Invariants
//!
//! - A snapshot is returned only if its recomputed checksum matches
//! - Nothing partial is ever returned
//! - The update callback fires at most once per distinct checksum in a row
//! - The polling delay stays within `[interval, max_interval]`
//! - The remote store is never written

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checksum;
mod client;
mod config;
mod crypto;
mod dotenv;
mod env;
mod error;
mod fetcher;
mod http;
mod keys;
mod kv;
mod snapshot;
mod transport;
mod updater;

pub use checksum::{canonicalize, checksum_entries};
pub use client::CfenvClient;
pub use config::{
    ClientConfig, HotUpdateConfig, RetryConfig, StorageMode, DEFAULT_API_BASE_URL,
    DEFAULT_KEY_PREFIX,
};
pub use crypto::{
    decrypt_snapshot_payload, is_encrypted_payload, EncryptedEnvelope, ENCRYPTION_FORMAT,
    KDF_NAME, KEY_SIZE, NONCE_SIZE, SALT_SIZE, TAG_SIZE,
};
pub use dotenv::{is_valid_key, parse_dotenv, read_dotenv, write_atomic};
pub use env::{apply_to_environment, EnvSink, MemoryEnv, ProcessEnv};
pub use error::{CfenvError, CfenvResult, IntegrityError};
pub use fetcher::{History, SnapshotFetcher, SnapshotSource};
#[cfg(feature = "reqwest-client")]
pub use http::ReqwestClient;
pub use http::{FailureKind, HttpClient, HttpFailure, HttpRequest, HttpResponse, Method};
pub use keys::KeyLayout;
pub use kv::{KeyPage, KvStore, MemoryKv, RemoteKv, TokenStatus, LIST_PAGE_LIMIT};
pub use snapshot::{
    entries_as_lines, export_as_json, export_as_lines, CurrentPointer, EnvEntries, FlatMetadata,
    RemoteSnapshot, Snapshot, SnapshotVersion,
};
pub use transport::{
    decode_envelope, is_retryable_status, parse_retry_after, ApiMessage, CancelToken, Envelope,
    ResultInfo, Transport, USER_AGENT,
};
pub use updater::{
    CycleOutcome, ErrorCallback, HotUpdater, RefreshState, UpdateCallback, UpdateReason,
    UpdaterStatus, WORKER_THREAD_NAME,
};
