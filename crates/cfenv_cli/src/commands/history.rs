//! History command implementation.

use cfenv_sync::{CfenvClient, History, HttpClient};

/// Renders history the way the publisher prints it.
pub fn render(history: &History) -> String {
    match history {
        History::Flat(None) => "No flat metadata found.\n".to_string(),
        History::Flat(Some(metadata)) => format!(
            "mode=flat | updatedAt={} | updatedBy={} | entries={} | checksum={}\n",
            metadata.updated_at,
            metadata.updated_by.as_deref().unwrap_or("unknown"),
            metadata.entries_count,
            metadata.checksum
        ),
        History::Versions(ids) if ids.is_empty() => "No versions found.\n".to_string(),
        History::Versions(ids) => ids.iter().map(|id| format!("{id}\n")).collect(),
    }
}

/// Runs the history command.
pub fn run<C: HttpClient>(
    client: &CfenvClient<C>,
    limit: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    print!("{}", render(&client.history(limit)?));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfenv_sync::FlatMetadata;
    use cfenv_testkit::EnvFixture;

    #[test]
    fn renders_flat_metadata() {
        assert_eq!(render(&History::Flat(None)), "No flat metadata found.\n");

        let metadata = FlatMetadata {
            checksum: "abc".into(),
            updated_at: "2026-01-01T00:00:00.000Z".into(),
            updated_by: None,
            entries_count: 2,
        };
        assert_eq!(
            render(&History::Flat(Some(metadata))),
            "mode=flat | updatedAt=2026-01-01T00:00:00.000Z | updatedBy=unknown | entries=2 \
             | checksum=abc\n"
        );
    }

    #[test]
    fn lists_versions_newest_first() {
        let fixture = EnvFixture::snapshot_mode();
        assert_eq!(
            render(&fixture.client().history(20).unwrap()),
            "No versions found.\n"
        );

        fixture.publish_version("20260101000000000-aaaaaaaa", &[]);
        fixture.publish_version("20260103000000000-cccccccc", &[]);
        fixture.publish_version("20260102000000000-bbbbbbbb", &[]);
        assert_eq!(
            render(&fixture.client().history(2).unwrap()),
            "20260103000000000-cccccccc\n20260102000000000-bbbbbbbb\n"
        );
    }
}
