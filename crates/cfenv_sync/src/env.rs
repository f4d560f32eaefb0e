//! Applying snapshots to an environment.

use crate::dotenv::is_valid_key;
use crate::snapshot::Snapshot;
use std::collections::BTreeMap;
use tracing::warn;

/// A mutable set of environment variables.
pub trait EnvSink {
    /// Returns the current value of a variable.
    fn get(&self, name: &str) -> Option<String>;

    /// Sets a variable.
    fn set(&mut self, name: &str, value: &str);
}

/// The process environment.
///
/// Mutating the process environment is not synchronized with other threads
/// reading it. Callers applying snapshots from a hot updater callback must
/// make sure nothing else reads or writes the environment concurrently.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSink for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var_os(name).map(|v| v.to_string_lossy().into_owned())
    }

    fn set(&mut self, name: &str, value: &str) {
        std::env::set_var(name, value);
    }
}

/// An in-memory environment.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryEnv {
    vars: BTreeMap<String, String>,
}

impl MemoryEnv {
    /// Creates an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all variables.
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MemoryEnv {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl EnvSink for MemoryEnv {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: &str) {
        self.vars.insert(name.to_string(), value.to_string());
    }
}

/// Writes every entry of `snapshot` into `sink`.
///
/// Without `overwrite`, variables that already exist are left untouched.
/// Names that are not valid variable names and values containing NUL are
/// skipped with a warning. Returns the names that were written, in
/// canonical order.
pub fn apply_to_environment<E: EnvSink + ?Sized>(
    snapshot: &Snapshot,
    overwrite: bool,
    sink: &mut E,
) -> Vec<String> {
    let mut written = Vec::new();
    for (name, value) in &snapshot.entries {
        if !is_valid_key(name) || value.contains('\0') {
            warn!(name = %name.escape_debug(), "skipping variable that cannot be set");
            continue;
        }
        if !overwrite && sink.get(name).is_some() {
            continue;
        }
        sink.set(name, value);
        written.push(name.clone());
    }
    written
}
