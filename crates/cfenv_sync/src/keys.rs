//! Remote key naming.
//!
//! ```text
//! {prefix}:{project}:{environment}:meta
//! {prefix}:{project}:{environment}:vars:{name}
//! {prefix}:{project}:{environment}:current
//! {prefix}:{project}:{environment}:versions:{id}
//! ```

/// Key layout for one project environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    base: String,
}

impl KeyLayout {
    /// Creates the layout for a project environment.
    pub fn new(prefix: &str, project: &str, environment: &str) -> Self {
        Self {
            base: format!("{prefix}:{project}:{environment}"),
        }
    }

    /// Key holding the metadata record.
    pub fn meta_key(&self) -> String {
        format!("{}:meta", self.base)
    }

    /// Prefix shared by every variable key.
    pub fn vars_prefix(&self) -> String {
        format!("{}:vars:", self.base)
    }

    /// Key holding a single variable.
    pub fn var_key(&self, name: &str) -> String {
        format!("{}{}", self.vars_prefix(), name)
    }

    /// Recovers the variable name from a listed key.
    ///
    /// Returns `None` for keys outside the prefix or with an empty name.
    pub fn var_name<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.base.as_str())
            .and_then(|rest| rest.strip_prefix(":vars:"))
            .filter(|name| !name.is_empty())
    }

    /// Key holding the snapshot-mode current pointer.
    pub fn current_key(&self) -> String {
        format!("{}:current", self.base)
    }

    /// Prefix shared by every snapshot version key.
    pub fn versions_prefix(&self) -> String {
        format!("{}:versions:", self.base)
    }

    /// Key holding one snapshot version.
    pub fn version_key(&self, id: &str) -> String {
        format!("{}{}", self.versions_prefix(), id)
    }

    /// Recovers the version ID from a listed key.
    pub fn version_id<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.base.as_str())
            .and_then(|rest| rest.strip_prefix(":versions:"))
            .filter(|id| !id.is_empty())
    }
}
