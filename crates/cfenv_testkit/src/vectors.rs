//! Cross-language checksum test vectors.
//!
//! Every expected value here was produced by the JavaScript writer, so a
//! metadata record it publishes verifies here. No other writer has been
//! checked against these vectors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A checksum test vector that can be shared across languages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Input entries.
    pub entries: BTreeMap<String, String>,
    /// Expected canonical text.
    pub canonical: String,
    /// Expected lowercase hex SHA-256 of the canonical text.
    pub checksum: String,
}

fn vector(
    id: &str,
    description: &str,
    entries: &[(&str, &str)],
    canonical: &str,
    checksum: &str,
) -> ChecksumVector {
    ChecksumVector {
        id: id.into(),
        description: description.into(),
        entries: entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        canonical: canonical.into(),
        checksum: checksum.into(),
    }
}

/// Checksum vectors.
pub fn checksum_vectors() -> Vec<ChecksumVector> {
    vec![
        vector(
            "empty",
            "No entries hash the empty string",
            &[],
            "",
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        ),
        vector(
            "single",
            "One entry",
            &[("A", "1")],
            "A=\"1\"",
            "57d51f057dc0c4f4a8c68e1f9f6442c1f2ee8298206bc552b940706a671d1e69",
        ),
        vector(
            "single_changed",
            "Same key, different value",
            &[("A", "2")],
            "A=\"2\"",
            "27f62800ff442f9175dd166ef7f5b155f367073e00250d1d3542914fc30d3073",
        ),
        vector(
            "two_sorted",
            "Keys are sorted before joining",
            &[("B", "2"), ("A", "1")],
            "A=\"1\"\nB=\"2\"",
            "f5203cbf84d5f7df912d98293da15fb8235a30adc28c393988d2ed127859e16b",
        ),
        vector(
            "three",
            "Three entries",
            &[("C", "3"), ("A", "1"), ("B", "2")],
            "A=\"1\"\nB=\"2\"\nC=\"3\"",
            "ee9eac9fc1f2939c9c49aadf182acab1bba68c1a7f6e7deb630163745fd262de",
        ),
        vector(
            "escapes",
            "Quotes and newlines are JSON-escaped",
            &[("MSG", "say \"hi\"\n")],
            "MSG=\"say \\\"hi\\\"\\n\"",
            "28af36cc8708afbf86d20c9cd21344e9574a35b645aaa330fdaefd9df693c6de",
        ),
        vector(
            "non_ascii",
            "Non-ASCII characters stay UTF-8",
            &[("GREETING", "h\u{e9}llo")],
            "GREETING=\"h\u{e9}llo\"",
            "547b45ae27b0f17c2e2bf76ceb320caad7fe2b9d44d53f40079c775de8c70e76",
        ),
        vector(
            "control",
            "Control characters use \\u00XX or short escapes",
            &[("CTRL", "\u{1}\t")],
            "CTRL=\"\\u0001\\t\"",
            "94531655f6c740d8a0c2cd28226c2c5d27bf4602f31b99263c2d32c63315c4fa",
        ),
    ]
}

/// Generate all test vectors as JSON for cross-language use.
pub fn all_vectors_json() -> String {
    let vectors = AllTestVectors {
        checksum: checksum_vectors(),
    };

    serde_json::to_string_pretty(&vectors).expect("Failed to serialize vectors")
}

#[derive(Debug, Serialize, Deserialize)]
struct AllTestVectors {
    checksum: Vec<ChecksumVector>,
}
