//! Integration tests for snapshot fetching over the KV API.

use cfenv_sync::{
    checksum_entries, CancelToken, CfenvClient, CfenvError, CfenvResult, History, HttpFailure,
    IntegrityError, KeyPage, KvStore, MemoryKv, SnapshotFetcher, Transport, USER_AGENT,
};
use cfenv_testkit::prelude::*;
use std::sync::Arc;

#[test]
fn fetch_through_api_paginates() {
    let fixture = EnvFixture::with_page_size(2);
    let checksum = fixture.publish(&[("A", "1"), ("B", "2"), ("C", "3"), ("D", "4"), ("E", "5")]);

    let api = Arc::new(fixture.api());
    let client = CfenvClient::with_http_client(fixture.config().clone(), Arc::clone(&api)).unwrap();
    let snapshot = client.fetch_flat_env().unwrap();

    assert_eq!(snapshot.len(), 5);
    assert_eq!(snapshot.checksum(), checksum);

    let requests = api.requests();
    let list_requests: Vec<_> = requests.iter().filter(|r| r.url.ends_with("/keys")).collect();
    assert_eq!(list_requests.len(), 3);
    assert_eq!(list_requests[0].query_param("cursor"), None);
    assert!(list_requests[1].query_param("cursor").is_some());
    for request in &requests {
        assert_eq!(request.header("authorization"), Some("Bearer test-token"));
        assert_eq!(request.header("user-agent"), Some(USER_AGENT));
    }
}

#[test]
fn bad_checksum_is_rejected() {
    let fixture = EnvFixture::new();
    fixture.publish_with_checksum(&[("A", "1")], "bad");

    let err = fixture.client().fetch_flat_env().unwrap_err();
    match err {
        CfenvError::Integrity(IntegrityError::ChecksumMismatch { expected, actual }) => {
            assert_eq!(expected, "bad");
            assert_eq!(actual, checksum_entries(&entries(&[("A", "1")])));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn missing_metadata_over_api() {
    let fixture = EnvFixture::new();
    fixture.publish(&[("A", "1")]);
    fixture.remove_metadata();

    let err = fixture.client().fetch_flat_env().unwrap_err();
    assert!(matches!(
        err,
        CfenvError::Integrity(IntegrityError::MetadataNotFound)
    ));
}

#[test]
fn added_var_without_republish_fails() {
    let fixture = EnvFixture::new();
    fixture.publish(&[("A", "1")]);
    fixture.set_var("B", "2");

    let err = fixture.client().fetch_flat_env().unwrap_err();
    assert!(err.is_integrity());
}

/// Deletes one key right after it has been listed.
struct VanishingStore {
    inner: MemoryKv,
    victim: String,
}

impl KvStore for VanishingStore {
    fn get_value(&self, key: &str, cancel: &CancelToken) -> CfenvResult<Option<String>> {
        self.inner.get_value(key, cancel)
    }

    fn list_keys_page(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        cancel: &CancelToken,
    ) -> CfenvResult<KeyPage> {
        let page = self.inner.list_keys_page(prefix, cursor, cancel)?;
        self.inner.remove(&self.victim);
        Ok(page)
    }
}

#[test]
fn vanished_values_are_skipped() {
    let fixture = EnvFixture::new();
    let config = fixture.config().clone();
    let layout = fixture.layout().clone();

    // Metadata describes the state after B was deleted.
    let inner = MemoryKv::new();
    inner.set(layout.var_key("A"), "1");
    inner.set(layout.var_key("B"), "2");
    inner.set(
        layout.meta_key(),
        serde_json::json!({ "checksum": checksum_entries(&entries(&[("A", "1")])) }).to_string(),
    );
    let store = VanishingStore {
        inner,
        victim: layout.var_key("B"),
    };

    let snapshot = SnapshotFetcher::new(store, &config).fetch_flat_env().unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.get("A"), Some("1"));
}

#[test]
fn throttled_requests_are_retried() {
    let fixture = EnvFixture::new();
    fixture.publish(&[("A", "1")]);
    let meta = fixture
        .store()
        .get_value(&fixture.layout().meta_key(), &CancelToken::new())
        .unwrap()
        .unwrap();

    let http = Arc::new(ScriptedHttpClient::new());
    http.push_response(
        cfenv_sync::HttpResponse::new(429, "").with_header("Retry-After", "0"),
    )
    .push_status(200, &meta)
    .push_failure(HttpFailure::timeout("slow"))
    .push_json(200, keys_page_json(&["cfenv:demo:development:vars:A"], None))
    .push_status(503, "")
    .push_status(200, "1");

    let client =
        CfenvClient::with_http_client(fixture.config().clone(), Arc::clone(&http)).unwrap();
    let snapshot = client.fetch_flat_env().unwrap();
    assert_eq!(snapshot.get("A"), Some("1"));
    assert_eq!(http.request_count(), 6);
    assert_eq!(http.remaining(), 0);
}

#[test]
fn forbidden_value_read_fails() {
    let fixture = EnvFixture::new();
    fixture.publish(&[("A", "1")]);
    let meta = fixture
        .store()
        .get_value(&fixture.layout().meta_key(), &CancelToken::new())
        .unwrap()
        .unwrap();

    let http = ScriptedHttpClient::new();
    http.push_status(200, &meta)
        .push_json(200, keys_page_json(&["cfenv:demo:development:vars:A"], None))
        .push_status(403, "");

    let client = CfenvClient::with_http_client(fixture.config().clone(), http).unwrap();
    let err = client.fetch_flat_env().unwrap_err();
    assert_eq!(
        err.to_string(),
        "transport error: failed to read key cfenv:demo:development:vars:A (HTTP 403)"
    );
}

#[test]
fn listing_errors_surface_api_messages() {
    let fixture = EnvFixture::new();
    fixture.publish(&[("A", "1")]);
    let meta = fixture
        .store()
        .get_value(&fixture.layout().meta_key(), &CancelToken::new())
        .unwrap()
        .unwrap();

    let http = ScriptedHttpClient::new();
    http.push_status(200, &meta)
        .push_json(403, error_json(&["Authentication error"]));

    let client = CfenvClient::with_http_client(fixture.config().clone(), http).unwrap();
    let err = client.fetch_flat_env().unwrap_err();
    assert_eq!(err.to_string(), "transport error: Authentication error");
    assert!(!err.is_retryable());
}

#[test]
fn network_failures_exhaust_retries() {
    let http = Arc::new(ScriptedHttpClient::new());
    for _ in 0..3 {
        http.push_failure(HttpFailure::connect("connection refused"));
    }
    let client = CfenvClient::with_http_client(test_config(), Arc::clone(&http)).unwrap();

    let err = client.fetch_flat_env().unwrap_err();
    assert!(err.is_retryable());
    // One attempt plus two retries.
    assert_eq!(http.request_count(), 3);
}

#[test]
fn cancelled_transport_returns_cancelled() {
    let http = ScriptedHttpClient::new();
    http.push_status(200, "");
    let transport = Transport::new(http, TEST_BASE_URL, "t", test_config().retry);
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = transport
        .execute(cfenv_sync::Method::Get, "/x", &[], &cancel)
        .unwrap_err();
    assert!(matches!(err, CfenvError::Cancelled));
}

#[test]
fn null_metadata_fields_report_missing_checksum() {
    let fixture = EnvFixture::new();
    fixture.set_raw_metadata(
        r#"{"schema":1,"checksum":null,"updatedAt":null,"entriesCount":null}"#,
    );

    let err = fixture.client().fetch_flat_env().unwrap_err();
    assert!(matches!(
        err,
        CfenvError::Integrity(IntegrityError::MissingChecksum)
    ));
}

#[test]
fn snapshot_mode_over_api() {
    let fixture = EnvFixture::snapshot_mode();
    fixture.publish_version("20260101000000000-aaaaaaaa", &[("A", "1")]);
    let checksum =
        fixture.publish_encrypted_version("20260102000000000-bbbbbbbb", &[("A", "2"), ("B", "x")]);

    let client = fixture.client();
    let snapshot = client.fetch_env().unwrap();
    assert_eq!(snapshot.checksum(), checksum);
    assert_eq!(snapshot.get("B"), Some("x"));
    let version = snapshot.version.as_ref().unwrap();
    assert_eq!(version.id, "20260102000000000-bbbbbbbb");
    assert!(version.encrypted);

    let older = client
        .fetch_snapshot_env(Some("20260101000000000-aaaaaaaa"))
        .unwrap();
    assert_eq!(older.get("A"), Some("1"));
    assert!(!older.version.unwrap().encrypted);

    assert_eq!(
        client.history(20).unwrap(),
        History::Versions(vec![
            "20260102000000000-bbbbbbbb".into(),
            "20260101000000000-aaaaaaaa".into(),
        ])
    );
}

#[test]
fn encrypted_version_without_key_fails() {
    let fixture = EnvFixture::snapshot_mode();
    fixture.publish_encrypted_version("v1", &[("A", "1")]);

    let config = fixture.config().clone();
    let keyless = cfenv_sync::ClientConfig {
        encryption_key: None,
        ..config.clone()
    };
    let err = CfenvClient::with_http_client(keyless, fixture.api())
        .unwrap()
        .fetch_env()
        .unwrap_err();
    assert!(matches!(err, CfenvError::Encryption(_)));

    let wrong = config.with_encryption_key("not-the-key");
    let err = CfenvClient::with_http_client(wrong, fixture.api())
        .unwrap()
        .fetch_env()
        .unwrap_err();
    assert!(err.to_string().contains("failed to decrypt snapshot"));
}

#[test]
fn dangling_pointer_is_reported() {
    let fixture = EnvFixture::snapshot_mode();
    fixture.set_current("missing", "abc", false);

    let err = fixture.client().fetch_env().unwrap_err();
    assert_eq!(
        err.to_string(),
        "integrity error: snapshot version \"missing\" not found"
    );
}

#[test]
fn flat_history_over_api() {
    let fixture = EnvFixture::new();
    assert_eq!(fixture.client().history(20).unwrap(), History::Flat(None));

    fixture.publish(&[("A", "1"), ("B", "2")]);
    match fixture.client().history(20).unwrap() {
        History::Flat(Some(metadata)) => {
            assert_eq!(metadata.entries_count, 2);
            assert_eq!(metadata.updated_by.as_deref(), Some("cfenv-testkit"));
        }
        other => panic!("unexpected history: {other:?}"),
    }
}
