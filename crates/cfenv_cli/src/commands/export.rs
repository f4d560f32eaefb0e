//! Export command implementation.

use cfenv_sync::{
    export_as_json, export_as_lines, write_atomic, CfenvClient, CfenvResult, HttpClient, Snapshot,
};
use clap::ValueEnum;
use std::path::Path;
use tracing::info;

/// Output format of `export`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// `KEY="value"` lines
    Dotenv,
    /// Pretty-printed JSON object
    Json,
}

/// Renders a snapshot in the requested format.
pub fn render(snapshot: &Snapshot, format: Format) -> CfenvResult<String> {
    match format {
        Format::Dotenv => Ok(export_as_lines(snapshot)),
        Format::Json => export_as_json(snapshot),
    }
}

/// Runs the export command.
///
/// `version` pins a snapshot-mode version instead of the current one.
pub fn run<C: HttpClient>(
    client: &CfenvClient<C>,
    format: Format,
    output: Option<&Path>,
    version: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = match version {
        Some(id) => client.fetch_snapshot_env(Some(id))?,
        None => client.fetch_env()?,
    };
    let rendered = render(&snapshot, format)?;

    match output {
        Some(path) => {
            write_atomic(path, &rendered)?;
            info!(
                path = %path.display(),
                entries = snapshot.len(),
                checksum = snapshot.checksum(),
                "wrote snapshot"
            );
        }
        None => print!("{rendered}"),
    }
    Ok(())
}
