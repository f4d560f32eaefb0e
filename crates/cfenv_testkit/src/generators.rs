//! Property-based test generators using proptest.

use cfenv_sync::EnvEntries;
use proptest::prelude::*;

/// Strategy for valid variable names.
pub fn env_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z_][A-Za-z0-9_]{0,23}").expect("Invalid regex")
}

/// Strategy for values: printable ASCII, escapes, control and non-ASCII
/// characters.
pub fn env_value_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => prop::string::string_regex("[ -~]{0,32}").expect("Invalid regex"),
        1 => prop::string::string_regex("[\"\\\\\n\r\t\u{1}\u{7f}]{0,8}").expect("Invalid regex"),
        1 => any::<String>(),
    ]
}

/// Strategy for entry sets of up to `max_len` variables.
pub fn entries_strategy(max_len: usize) -> impl Strategy<Value = EnvEntries> {
    prop::collection::btree_map(env_key_strategy(), env_value_strategy(), 0..=max_len)
}

/// Strategy for a non-empty entry set plus the name of one of its keys.
pub fn entries_with_key_strategy(max_len: usize) -> impl Strategy<Value = (EnvEntries, String)> {
    prop::collection::btree_map(env_key_strategy(), env_value_strategy(), 1..=max_len.max(1))
        .prop_flat_map(|entries| {
            let keys: Vec<String> = entries.keys().cloned().collect();
            (Just(entries), prop::sample::select(keys))
        })
}
