//! Canonical form and checksum of env entries.
//!
//! The checksum is shared with the JavaScript writer that publishes the
//! metadata record, so the canonical bytes must match `JSON.stringify`
//! exactly: `serde_json` string quoting produces the same escapes and
//! leaves non-ASCII characters as UTF-8.

use crate::snapshot::EnvEntries;
use sha2::{Digest, Sha256};

/// Serializes entries into their canonical text form.
///
/// Keys are visited in byte-wise order, each line is `key=<json string>`,
/// and lines are joined with `\n` without a trailing newline.
pub fn canonicalize(entries: &EnvEntries) -> String {
    entries
        .iter()
        .map(|(key, value)| format!("{}={}", key, json_string(value)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Computes the lowercase hex SHA-256 of [`canonicalize`].
pub fn checksum_entries(entries: &EnvEntries) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonicalize(entries).as_bytes());
    hex::encode(hasher.finalize())
}

/// JSON-quotes a string value.
pub(crate) fn json_string(value: &str) -> String {
    // Serializing a &str cannot fail.
    serde_json::to_string(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, &str)]) -> EnvEntries {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn canonical_form_is_sorted_without_trailing_newline() {
        let e = entries(&[("B", "2"), ("A", "1")]);
        assert_eq!(canonicalize(&e), "A=\"1\"\nB=\"2\"");
    }

    #[test]
    fn canonical_form_uses_byte_order() {
        // Uppercase sorts before lowercase byte-wise.
        let e = entries(&[("a", "x"), ("B", "y"), ("_", "z")]);
        assert_eq!(canonicalize(&e), "B=\"y\"\n_=\"z\"\na=\"x\"");
    }

    #[test]
    fn canonical_form_escapes_values() {
        let e = entries(&[("MSG", "say \"hi\"\n"), ("PATH", "C:\\bin")]);
        assert_eq!(
            canonicalize(&e),
            "MSG=\"say \\\"hi\\\"\\n\"\nPATH=\"C:\\\\bin\""
        );
    }

    #[test]
    fn control_characters_use_unicode_escapes() {
        let e = entries(&[("CTRL", "\u{1}\t")]);
        assert_eq!(canonicalize(&e), "CTRL=\"\\u0001\\t\"");
    }

    #[test]
    fn non_ascii_stays_utf8() {
        let e = entries(&[("GREETING", "héllo")]);
        assert_eq!(canonicalize(&e), "GREETING=\"héllo\"");
    }

    #[test]
    fn empty_entries_hash_to_empty_digest() {
        assert_eq!(
            checksum_entries(&EnvEntries::new()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn known_checksum() {
        let e = entries(&[("A", "1"), ("B", "2")]);
        assert_eq!(
            checksum_entries(&e),
            "f5203cbf84d5f7df912d98293da15fb8235a30adc28c393988d2ed127859e16b"
        );
    }

    #[test]
    fn value_change_changes_checksum() {
        let a = entries(&[("A", "1")]);
        let b = entries(&[("A", "2")]);
        assert_ne!(checksum_entries(&a), checksum_entries(&b));
    }
}
