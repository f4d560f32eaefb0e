//! Local `.env` files.

use crate::error::{CfenvError, CfenvResult};
use crate::snapshot::EnvEntries;
use std::io::Write;
use std::path::Path;

/// Returns true if `name` is a valid variable name (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_valid_key(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parses the contents of a `.env` file.
///
/// - blank lines and lines starting with `#` are skipped
/// - an `export ` prefix is allowed
/// - lines without a `KEY=` part are skipped
/// - double-quoted values are JSON-decoded, single-quoted values are taken
///   literally, anything else is trimmed
///
/// Later assignments to the same key win.
pub fn parse_dotenv(contents: &str) -> CfenvResult<EnvEntries> {
    let mut entries = EnvEntries::new();

    for (index, line) in contents.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let content = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value)) = content.split_once('=') else {
            continue;
        };
        if key.is_empty() {
            continue;
        }

        let key = key.trim();
        if !is_valid_key(key) {
            return Err(CfenvError::InvalidEnvFile {
                line: index + 1,
                message: format!("invalid env key {key:?}"),
            });
        }
        entries.insert(key.to_string(), decode_value(value));
    }

    Ok(entries)
}

fn decode_value(raw: &str) -> String {
    let value = raw.trim();
    if value.len() >= 2 {
        if value.starts_with('"') && value.ends_with('"') {
            return serde_json::from_str::<String>(value)
                .unwrap_or_else(|_| value[1..value.len() - 1].to_string());
        }
        if value.starts_with('\'') && value.ends_with('\'') {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

/// Reads and parses a `.env` file.
pub fn read_dotenv(path: impl AsRef<Path>) -> CfenvResult<EnvEntries> {
    let contents = std::fs::read_to_string(path)?;
    parse_dotenv(&contents)
}

/// Writes `contents` to `path` atomically.
///
/// The data goes to a temporary file in the same directory, readable only
/// by the owner on Unix, which is then renamed over `path`.
pub fn write_atomic(path: impl AsRef<Path>, contents: &str) -> CfenvResult<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(contents.as_bytes())?;
    temp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(0o600))?;
    }

    temp.persist(path).map_err(|e| CfenvError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation() {
        assert!(is_valid_key("API_URL"));
        assert!(is_valid_key("_private"));
        assert!(is_valid_key("a1"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("1ABC"));
        assert!(!is_valid_key("A-B"));
        assert!(!is_valid_key("A.B"));
    }

    #[test]
    fn parses_common_forms() {
        let contents = "\
# comment
A=1
export B = two
C=\"line\\nbreak\"
D='single \"quoted\"'

E=
NOEQUALS
=novalue
";
        let entries = parse_dotenv(contents).unwrap();
        assert_eq!(entries.get("A").map(String::as_str), Some("1"));
        assert_eq!(entries.get("B").map(String::as_str), Some("two"));
        assert_eq!(entries.get("C").map(String::as_str), Some("line\nbreak"));
        assert_eq!(entries.get("D").map(String::as_str), Some("single \"quoted\""));
        assert_eq!(entries.get("E").map(String::as_str), Some(""));
        assert_eq!(entries.len(), 5);
    }

    #[test]
    fn bad_json_string_falls_back_to_stripping() {
        let entries = parse_dotenv("A=\"bad \\q escape\"\n").unwrap();
        assert_eq!(entries.get("A").map(String::as_str), Some("bad \\q escape"));
    }

    #[test]
    fn value_keeps_later_equals_signs() {
        let entries = parse_dotenv("URL=postgres://u:p@h/db?sslmode=require\n").unwrap();
        assert_eq!(
            entries.get("URL").map(String::as_str),
            Some("postgres://u:p@h/db?sslmode=require")
        );
    }

    #[test]
    fn invalid_key_reports_line() {
        let err = parse_dotenv("A=1\nBAD-KEY=2\n").unwrap_err();
        match err {
            CfenvError::InvalidEnvFile { line, message } => {
                assert_eq!(line, 2);
                assert!(message.contains("BAD-KEY"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn crlf_lines() {
        let entries = parse_dotenv("A=1\r\nB=2\r\n").unwrap();
        assert_eq!(entries.get("B").map(String::as_str), Some("2"));
    }

    #[test]
    fn atomic_write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "OLD=1\n").unwrap();

        write_atomic(&path, "A=\"1\"\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "A=\"1\"\n");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn read_parses_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "A=1\n").unwrap();
        assert_eq!(read_dotenv(&path).unwrap().len(), 1);
    }
}
