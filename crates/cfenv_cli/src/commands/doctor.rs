//! Doctor command implementation.

use cfenv_sync::{CfenvClient, HttpClient};

/// Runs the doctor command.
pub fn run<C: HttpClient>(client: &CfenvClient<C>) -> Result<(), Box<dyn std::error::Error>> {
    let config = client.config();
    println!(
        "Target: {}:{}:{} in namespace {} ({} mode)",
        config.key_prefix,
        config.project,
        config.environment,
        config.namespace_id,
        config.storage_mode
    );
    println!();

    let token = client.verify_token()?;
    if !token.is_active() {
        println!("✗ API token is {}", token.status);
        return Err("API token is not active".into());
    }
    println!("✓ API token is active");

    let snapshot = client.fetch_env()?;
    println!(
        "✓ Snapshot verified: {} entries, updated {}",
        snapshot.len(),
        snapshot.metadata.updated_at
    );
    if let Some(version) = &snapshot.version {
        let sealed = if version.encrypted { ", encrypted" } else { "" };
        println!("✓ Current version: {}{sealed}", version.id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfenv_testkit::{error_json, test_config, EnvFixture, ScriptedHttpClient};
    use serde_json::json;

    fn token_json(status: &str) -> serde_json::Value {
        json!({ "success": true, "errors": [], "result": { "id": "t1", "status": status } })
    }

    #[test]
    fn healthy_target_passes() {
        let fixture = EnvFixture::new();
        fixture.publish(&[]);
        let meta = fixture.store().remove(&fixture.layout().meta_key()).unwrap();

        let http = ScriptedHttpClient::new();
        http.push_json(200, token_json("active"))
            .push_status(200, &meta)
            .push_json(200, cfenv_testkit::keys_page_json(&[], None));
        let client = CfenvClient::with_http_client(test_config(), http).unwrap();
        assert!(run(&client).is_ok());
    }

    #[test]
    fn snapshot_mode_target_passes() {
        let fixture = EnvFixture::snapshot_mode();
        fixture.publish_encrypted_version("20260101000000000-aaaaaaaa", &[("A", "1")]);
        let current = fixture.store().remove(&fixture.layout().current_key()).unwrap();
        let version = fixture
            .store()
            .remove(&fixture.layout().version_key("20260101000000000-aaaaaaaa"))
            .unwrap();

        let http = ScriptedHttpClient::new();
        http.push_json(200, token_json("active"))
            .push_status(200, &current)
            .push_status(200, &version);
        let client = CfenvClient::with_http_client(fixture.config().clone(), http).unwrap();
        assert!(run(&client).is_ok());
    }

    #[test]
    fn inactive_token_fails() {
        let http = ScriptedHttpClient::new();
        http.push_json(200, token_json("disabled"));
        let client = CfenvClient::with_http_client(test_config(), http).unwrap();
        assert!(run(&client).is_err());
    }

    #[test]
    fn api_error_fails() {
        let http = ScriptedHttpClient::new();
        http.push_json(401, error_json(&["Invalid API Token"]));
        let client = CfenvClient::with_http_client(test_config(), http).unwrap();
        let err = run(&client).unwrap_err();
        assert!(err.to_string().contains("Invalid API Token"));
    }
}
