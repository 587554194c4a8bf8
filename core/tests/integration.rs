//! End-to-end tests against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port, then drives `DataService` over
//! real HTTP with the blocking `ureq` transport. Covers the token exchange,
//! the read/update concurrency protocol and the remaining CRUD surface.

use gds_core::{
    resolve_credentials, Credentials, DataService, EnvOverrides, GdsError, ListQuery, Record, SessionState,
};
use mock_server::MockConfig;

/// Start a mock server on a random port and return its base URL.
fn start_server(config: MockConfig) -> String {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run_with(listener, config).await
        })
        .unwrap();
    });

    format!("http://{addr}/")
}

fn credentials(base_url: &str, token: &str) -> Credentials {
    resolve_credentials(Some(base_url), Some(token), &EnvOverrides::default(), true).unwrap()
}

fn mandatory_name() -> MockConfig {
    MockConfig {
        mandatory: vec!["Name".to_string()],
        ..MockConfig::default()
    }
}

#[test]
fn construction_with_unknown_api_token_fails() {
    let url = start_server(MockConfig::default());
    let err = DataService::objects(credentials(&url, "not-the-token")).unwrap_err();
    assert!(matches!(err, GdsError::Authentication(_)));
}

#[test]
fn construction_against_closed_port_fails() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let err = DataService::fragments(credentials(&format!("http://{addr}"), "test-api-token")).unwrap_err();
    assert!(matches!(err, GdsError::Authentication(_)));
}

#[test]
fn read_update_concurrency_lifecycle() {
    let url = start_server(mandatory_name());
    let objects = DataService::objects(credentials(&url, "test-api-token")).unwrap();
    assert_eq!(objects.session().state(), SessionState::Authenticated);
    assert_eq!(objects.session().credentials().base_url(), url.trim_end_matches('/'));

    // Step 1: create.
    let id = objects
        .create(
            "Incident",
            &Record::new()
                .with("Name", "Printer jam")
                .with("Priority", 2)
                .with("Owner", "ops"),
        )
        .unwrap();

    // Step 2: read with the marker.
    let original = objects.get("Incident", &id).unwrap();
    assert_eq!(original.id(), Some(id.as_str()));
    assert!(original.timestamp().is_some());

    // Step 3: partial update; omitted fields stay as they were.
    let change = Record::update_of(&original).with("Priority", 1);
    objects.update("Incident", &change).unwrap();
    let updated = objects.get("Incident", &id).unwrap();
    assert_eq!(updated.get("Priority"), Some(&serde_json::json!(1)));
    assert_eq!(updated.get("Name"), original.get("Name"));
    assert_eq!(updated.get("Owner"), original.get("Owner"));
    assert_ne!(updated.timestamp(), original.timestamp());

    // Step 4: a second writer holding the original marker loses.
    let competing = Record::update_of(&original).with("Priority", 3);
    let err = objects.update("Incident", &competing).unwrap_err();
    assert!(matches!(err, GdsError::ConcurrencyConflict { .. }), "got {err:?}");

    // Step 5: retrying with the same stale marker fails identically.
    let err = objects.update("Incident", &competing).unwrap_err();
    assert!(matches!(err, GdsError::ConcurrencyConflict { .. }));

    // Step 6: re-fetch, then the retry succeeds.
    let fresh = objects.get("Incident", &id).unwrap();
    let retry = Record::update_of(&fresh).with("Priority", 3);
    objects.update("Incident", &retry).unwrap();
    assert_eq!(
        objects.get("Incident", &id).unwrap().get("Priority"),
        Some(&serde_json::json!(3))
    );

    // Step 7: explicit null clears; clearing a mandatory attribute is rejected.
    let mut clear = Record::update_of(&objects.get("Incident", &id).unwrap());
    clear.clear("Owner");
    objects.update("Incident", &clear).unwrap();
    assert_eq!(
        objects.get("Incident", &id).unwrap().get("Owner"),
        Some(&serde_json::Value::Null)
    );

    let mut bad = Record::update_of(&objects.get("Incident", &id).unwrap());
    bad.clear("Name");
    let err = objects.update("Incident", &bad).unwrap_err();
    assert!(matches!(err, GdsError::Validation { .. }), "got {err:?}");

    // Step 8: partial read has no marker.
    let partial = objects.get_with("Incident", &id, false).unwrap();
    assert!(partial.timestamp().is_none());

    // Step 9: delete, then the record is gone.
    objects.delete("Incident", &id).unwrap();
    assert!(matches!(objects.get("Incident", &id), Err(GdsError::NotFound)));
    assert!(matches!(objects.delete("Incident", &id), Err(GdsError::NotFound)));
}

#[test]
fn get_bad_id_is_not_found() {
    let url = start_server(MockConfig::default());
    let objects = DataService::objects(credentials(&url, "test-api-token")).unwrap();
    assert!(matches!(objects.get("Incident", "bad-id"), Err(GdsError::NotFound)));
}

#[test]
fn create_error_kinds() {
    let url = start_server(mandatory_name());
    let objects = DataService::objects(credentials(&url, "test-api-token")).unwrap();

    let err = objects.create("Incident", &Record::new()).unwrap_err();
    assert!(matches!(err, GdsError::Validation { .. }), "got {err:?}");

    let caller_id = uuid::Uuid::new_v4().to_string();
    let id = objects
        .create("Incident", &Record::new().with("ID", caller_id.as_str()).with("Name", "x"))
        .unwrap();
    assert_eq!(id, caller_id);

    let err = objects
        .create("Incident", &Record::new().with("ID", caller_id.as_str()).with("Name", "y"))
        .unwrap_err();
    assert!(matches!(err, GdsError::Validation { .. }), "got {err:?}");
}

#[test]
fn fragments_list_and_relations() {
    let url = start_server(MockConfig::default());
    let fragments = DataService::fragments(credentials(&url, "test-api-token")).unwrap();

    let mut ids = Vec::new();
    for name in ["Gamma", "Alpha", "Beta"] {
        let id = fragments
            .create("SPSActivityClassBase", &Record::new().with("Name", name).with("Category", "ops"))
            .unwrap();
        ids.push(id);
    }

    // No parameters: every fragment, ids only.
    let all = fragments.list("SPSActivityClassBase", &ListQuery::new()).unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|r| r.id().is_some() && r.get("Name").is_none()));

    let query = ListQuery::new()
        .filter("Category = 'ops'")
        .columns("Name")
        .sort("Name ASC")
        .page(2, 0)
        .include_localizations(false);
    let page = fragments.list("SPSActivityClassBase", &query).unwrap();
    let names: Vec<_> = page.iter().filter_map(|r| r.get("Name")?.as_str()).collect();
    assert_eq!(names, ["Alpha", "Beta"]);

    let err = fragments
        .list("SPSActivityClassBase", &ListQuery::new().filter("nonsense"))
        .unwrap_err();
    assert!(matches!(err, GdsError::Validation { status: 400, .. }));

    // One edge per call.
    let (owner, a, b) = (&ids[0], &ids[1], &ids[2]);
    fragments.add_relation("SPSActivityClassBase", owner, "Related", a).unwrap();
    fragments.add_relation("SPSActivityClassBase", owner, "Related", b).unwrap();
    let full = fragments.get("SPSActivityClassBase", owner).unwrap();
    assert_eq!(full.get("Related").and_then(|v| v.as_array()).map(Vec::len), Some(2));

    let err = fragments
        .add_relation("SPSActivityClassBase", owner, "Related", "not-a-guid")
        .unwrap_err();
    assert!(matches!(err, GdsError::Validation { status: 400, .. }), "got {err:?}");

    fragments.remove_relation("SPSActivityClassBase", owner, "Related", a).unwrap();
    let err = fragments
        .remove_relation("SPSActivityClassBase", owner, "Related", a)
        .unwrap_err();
    assert!(matches!(err, GdsError::NotFound));
}

#[test]
fn services_authenticate_independently() {
    let url = start_server(MockConfig::default());
    let objects = DataService::objects(credentials(&url, "test-api-token")).unwrap();
    let fragments = DataService::fragments(credentials(&url, "test-api-token")).unwrap();
    assert!(objects.session().is_authenticated());
    assert!(fragments.session().is_authenticated());
}
