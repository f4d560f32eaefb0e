//! Checksum command implementation.

use cfenv_sync::{canonicalize, checksum_entries, read_dotenv};
use std::path::Path;

/// Runs the checksum command.
pub fn run(path: &Path, show_canonical: bool) -> Result<(), Box<dyn std::error::Error>> {
    let entries = read_dotenv(path)?;
    if show_canonical {
        println!("{}", canonicalize(&entries));
        println!();
    }
    println!("{}  {} entries", checksum_entries(&entries), entries.len());
    Ok(())
}
