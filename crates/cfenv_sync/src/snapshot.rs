//! Snapshot types and export formats.

use crate::checksum::canonicalize;
use crate::config::StorageMode;
use crate::error::CfenvResult;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Variable name to value, iterated in canonical (byte-wise) key order.
pub type EnvEntries = BTreeMap<String, String>;

/// Reads an absent or `null` field as its default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Remote description of the current entry set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatMetadata {
    /// Checksum of the entries (see [`checksum_entries`](crate::checksum_entries)).
    #[serde(default, deserialize_with = "null_as_default")]
    pub checksum: String,
    /// Timestamp of the last publish.
    #[serde(default, deserialize_with = "null_as_default")]
    pub updated_at: String,
    /// Who published last, if recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    /// Number of entries the writer published.
    #[serde(default, deserialize_with = "null_as_default")]
    pub entries_count: u64,
}

/// Snapshot-mode record naming the live version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentPointer {
    /// ID of the live version.
    #[serde(default, deserialize_with = "null_as_default")]
    pub version_id: String,
    /// Checksum announced for that version.
    #[serde(default, deserialize_with = "null_as_default")]
    pub checksum: String,
    /// Timestamp of the publish.
    #[serde(default, deserialize_with = "null_as_default")]
    pub updated_at: String,
    /// Who published, if recorded.
    #[serde(default)]
    pub updated_by: Option<String>,
    /// Number of entries in the version.
    #[serde(default, deserialize_with = "null_as_default")]
    pub entries_count: u64,
    /// Whether the version payload is encrypted.
    #[serde(default, deserialize_with = "null_as_default")]
    pub encrypted: bool,
}

/// Decrypted payload of one snapshot-mode version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSnapshot {
    /// Version ID.
    #[serde(default, deserialize_with = "null_as_default")]
    pub version_id: String,
    /// Project the version was published for.
    #[serde(default, deserialize_with = "null_as_default")]
    pub project: String,
    /// Environment the version was published for.
    #[serde(default, deserialize_with = "null_as_default")]
    pub environment: String,
    /// Checksum of `entries`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub checksum: String,
    /// Timestamp of the publish.
    #[serde(default, deserialize_with = "null_as_default")]
    pub updated_at: String,
    /// Who published, if recorded.
    #[serde(default)]
    pub updated_by: Option<String>,
    /// The entries.
    #[serde(default, deserialize_with = "null_as_default")]
    pub entries: EnvEntries,
}

/// Version a snapshot-mode snapshot was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotVersion {
    /// Version ID.
    pub id: String,
    /// Whether the stored payload was encrypted.
    pub encrypted: bool,
}

/// A verified, point-in-time view of a project environment.
///
/// Only produced by a successful fetch; never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// KV namespace the snapshot was read from.
    pub namespace_id: String,
    /// Metadata record the entries were verified against.
    pub metadata: FlatMetadata,
    /// The entries.
    pub entries: EnvEntries,
    /// Source version; `None` in flat mode.
    pub version: Option<SnapshotVersion>,
}

impl Snapshot {
    /// Returns the verified checksum.
    pub fn checksum(&self) -> &str {
        &self.metadata.checksum
    }

    /// Returns the value of a variable.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// Returns the storage mode the snapshot was read in.
    pub fn mode(&self) -> StorageMode {
        if self.version.is_some() {
            StorageMode::Snapshot
        } else {
            StorageMode::Flat
        }
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the snapshot has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Renders entries as `KEY="value"` lines, sorted, with a trailing newline.
pub fn export_as_lines(snapshot: &Snapshot) -> String {
    entries_as_lines(&snapshot.entries)
}

/// Renders entries as `KEY="value"` lines, sorted, with a trailing newline.
pub fn entries_as_lines(entries: &EnvEntries) -> String {
    let mut out = canonicalize(entries);
    out.push('\n');
    out
}

/// Renders entries as a pretty-printed JSON object with a trailing newline.
pub fn export_as_json(snapshot: &Snapshot) -> CfenvResult<String> {
    let mut out = serde_json::to_string_pretty(&snapshot.entries)?;
    out.push('\n');
    Ok(out)
}
