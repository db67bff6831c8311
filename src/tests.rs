//! Integration tests for the assignments backend.

use std::sync::Arc;

use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::db::{init_database, Repository};
use crate::select::DataSelector;
use crate::{create_router, AppState};

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_psk(Some("test-api-key".to_string())).await
    }

    async fn with_psk(psk: Option<String>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");

        // Initialize database
        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool));

        // Seeded selector so pick sequences are reproducible
        let selector = Arc::new(Mutex::new(DataSelector::new(Some(42))));

        // Create config
        let config = Config {
            api_psk: psk.clone(),
            db_path,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
            rng_seed: Some(42),
        };

        let state = AppState {
            repo,
            selector,
            config: Arc::new(config),
        };

        let app = create_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        // Spawn server
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        let mut client_builder = Client::builder();
        if let Some(key) = psk {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert("x-api-key", key.parse().unwrap());
            client_builder = client_builder.default_headers(headers);
        }

        TestFixture {
            client: client_builder.build().unwrap(),
            base_url,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Client without credentials, for exercising the public surface.
    fn public_client(&self) -> Client {
        Client::new()
    }

    /// Create an assignment and return its JSON representation.
    async fn create_assignment(&self, body: Value) -> Value {
        let resp = self
            .client
            .post(self.url("/api/assignments"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200, "assignment creation failed");
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], true);
        body["data"].clone()
    }

    /// Create an open assignment with a single text field.
    async fn open_text_assignment(&self, overrides: Value) -> Value {
        let mut body = json!({
            "title": "Test Assignment",
            "description": "A test assignment",
            "owner": "admin",
            "registration": "optional",
            "open": true,
            "fields": [
                {"label": "Comment", "type": "text"}
            ]
        });
        if let (Some(base), Some(extra)) = (body.as_object_mut(), overrides.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        self.create_assignment(body).await
    }

    /// Fetch the live form definitions.
    async fn get_form(&self, assignment_id: &str) -> Vec<Value> {
        let resp = self
            .public_client()
            .get(self.url(&format!("/api/assignments/{}/form", assignment_id)))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        body["data"].as_array().unwrap().clone()
    }

    /// Fetch the assignment's data items (admin).
    async fn get_data(&self, assignment_id: &str) -> Vec<Value> {
        let resp = self
            .client
            .get(self.url(&format!("/api/assignments/{}/data", assignment_id)))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        body["data"].as_array().unwrap().clone()
    }

    /// Ask which datum an identity should work on next.
    async fn next_for(&self, assignment_id: &str, query: &str) -> Value {
        let resp = self
            .public_client()
            .get(self.url(&format!(
                "/api/assignments/{}/next?{}",
                assignment_id, query
            )))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        body["data"].clone()
    }

    /// Submit a response, asserting success, and return it.
    async fn submit(&self, assignment_id: &str, body: Value) -> Value {
        let resp = self
            .public_client()
            .post(self.url(&format!("/api/assignments/{}/responses", assignment_id)))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200, "submission failed");
        let body: Value = resp.json().await.unwrap();
        body["data"].clone()
    }
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_admin_routes_require_psk() {
    let fixture = TestFixture::new().await;

    // No key
    let resp = fixture
        .public_client()
        .get(fixture.url("/api/assignments"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    // Wrong key
    let resp = fixture
        .public_client()
        .get(fixture.url("/api/assignments"))
        .header("x-api-key", "wrong-key")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // Correct key
    let resp = fixture
        .client
        .get(fixture.url("/api/assignments"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_public_routes_need_no_psk() {
    let fixture = TestFixture::new().await;
    let assignment = fixture.open_text_assignment(json!({})).await;
    let id = assignment["id"].as_str().unwrap();

    let resp = fixture
        .public_client()
        .get(fixture.url(&format!("/api/assignments/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let form = fixture.get_form(id).await;
    assert_eq!(form.len(), 1);
    assert_eq!(form[0]["label"], "Comment");
    assert_eq!(form[0]["type"], "text");
}

#[tokio::test]
async fn test_create_assignment_validation() {
    let fixture = TestFixture::new().await;

    // Empty title
    let resp = fixture
        .client
        .post(fixture.url("/api/assignments"))
        .json(&json!({
            "title": "",
            "owner": "admin",
            "fields": [{"label": "A", "type": "text"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    // No fields at all
    let resp = fixture
        .client
        .post(fixture.url("/api/assignments"))
        .json(&json!({
            "title": "No fields",
            "owner": "admin",
            "fields": []
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("at least one field"));

    // Unknown field type
    let resp = fixture
        .client
        .post(fixture.url("/api/assignments"))
        .json(&json!({
            "title": "Bad type",
            "owner": "admin",
            "fields": [{"label": "A", "type": "dropdown"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Bad type dropdown"));

    // Select without choices
    let resp = fixture
        .client
        .post(fixture.url("/api/assignments"))
        .json(&json!({
            "title": "Select",
            "owner": "admin",
            "fields": [{"label": "Pick", "type": "select"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("select requires choices"));

    // Data limit below one
    let resp = fixture
        .client
        .post(fixture.url("/api/assignments"))
        .json(&json!({
            "title": "Limit",
            "owner": "admin",
            "dataLimit": 0,
            "fields": [{"label": "A", "type": "text"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_assignment_update_and_version_conflict() {
    let fixture = TestFixture::new().await;
    let assignment = fixture.open_text_assignment(json!({})).await;
    let id = assignment["id"].as_str().unwrap();
    assert_eq!(assignment["version"], 1);

    // Update settings
    let resp = fixture
        .client
        .put(fixture.url(&format!("/api/assignments/{}", id)))
        .json(&json!({
            "title": "Renamed",
            "dataLimit": 5,
            "expectedVersion": 1
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["title"], "Renamed");
    assert_eq!(body["data"]["slug"], "renamed");
    assert_eq!(body["data"]["dataLimit"], 5);
    assert_eq!(body["data"]["version"], 2);

    // Stale version is rejected
    let resp = fixture
        .client
        .put(fixture.url(&format!("/api/assignments/{}", id)))
        .json(&json!({
            "title": "Should Fail",
            "expectedVersion": 1
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VERSION_MISMATCH");
    assert_eq!(body["error"]["details"]["currentVersion"], 2);
}

#[tokio::test]
async fn test_status_transitions_are_monotonic() {
    let fixture = TestFixture::new().await;
    let assignment = fixture
        .create_assignment(json!({
            "title": "Lifecycle",
            "owner": "admin",
            "fields": [{"label": "A", "type": "text"}]
        }))
        .await;
    let id = assignment["id"].as_str().unwrap();
    assert_eq!(assignment["status"], "draft");

    // Draft cannot close
    let resp = fixture
        .client
        .post(fixture.url(&format!("/api/assignments/{}/close", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Draft -> open
    let resp = fixture
        .client
        .post(fixture.url(&format!("/api/assignments/{}/open", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["status"], "open");
    assert!(body["data"]["datetimeOpened"].is_string());

    // Open -> closed
    let resp = fixture
        .client
        .post(fixture.url(&format!("/api/assignments/{}/close", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["status"], "closed");
    assert!(body["data"]["datetimeClosed"].is_string());

    // Closed cannot reopen
    let resp = fixture
        .client
        .post(fixture.url(&format!("/api/assignments/{}/open", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("closed to open"));
}

#[tokio::test]
async fn test_duplicate_labels_get_numeric_suffixes() {
    let fixture = TestFixture::new().await;
    let assignment = fixture
        .create_assignment(json!({
            "title": "Duplicates",
            "owner": "admin",
            "open": true,
            "fields": [
                {"label": "Name", "type": "text"},
                {"label": "Name", "type": "text"}
            ]
        }))
        .await;
    let id = assignment["id"].as_str().unwrap();

    let form = fixture.get_form(id).await;
    let labels: Vec<&str> = form.iter().map(|f| f["label"].as_str().unwrap()).collect();
    assert_eq!(labels, vec!["Name", "Name-1"]);
}

#[tokio::test]
async fn test_form_labels_are_sanitized() {
    let fixture = TestFixture::new().await;
    let assignment = fixture
        .create_assignment(json!({
            "title": "Sanitized",
            "owner": "admin",
            "open": true,
            "fields": [
                {"label": "<script>alert(1)</script>Name &amp; Title", "type": "text"}
            ]
        }))
        .await;
    let id = assignment["id"].as_str().unwrap();

    let form = fixture.get_form(id).await;
    assert_eq!(form[0]["label"], "alert(1)Name & Title");
}

#[tokio::test]
async fn test_form_reconcile_soft_deletes_and_renumbers() {
    let fixture = TestFixture::new().await;
    let assignment = fixture
        .create_assignment(json!({
            "title": "Reconcile",
            "owner": "admin",
            "open": true,
            "fields": [{"label": "Delete Me", "type": "text"}]
        }))
        .await;
    let id = assignment["id"].as_str().unwrap();

    // Replace the form entirely
    let resp = fixture
        .client
        .put(fixture.url(&format!("/api/assignments/{}/form", id)))
        .json(&json!([
            {"label": "Text Field", "type": "text", "description": "Here is some help"},
            {"label": "Select Field", "type": "select", "values": [
                {"label": "Choice 1", "value": "choice-1"},
                {"label": "Choice 2", "value": "choice-2"}
            ]}
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let form = fixture.get_form(id).await;
    assert_eq!(form.len(), 2);
    assert_eq!(form[0]["label"], "Text Field");
    assert_eq!(form[0]["description"], "Here is some help");
    assert_eq!(form[1]["label"], "Select Field");
    assert_eq!(form[1]["values"].as_array().unwrap().len(), 2);

    // The dropped field survives soft-deleted in the export header
    let csv = fixture
        .client
        .get(fixture.url(&format!("/api/assignments/{}/export", id)))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let header = csv.lines().next().unwrap();
    assert!(header.contains("Text Field"));
    assert!(header.contains("Select Field"));
    assert!(header.contains("Delete Me (deleted)"));
}

#[tokio::test]
async fn test_form_reconcile_replaces_choices() {
    let fixture = TestFixture::new().await;
    let assignment = fixture
        .create_assignment(json!({
            "title": "Choices",
            "owner": "admin",
            "open": true,
            "fields": [
                {"label": "Pick", "type": "select", "values": [
                    {"label": "A", "value": "a"},
                    {"label": "B", "value": "b"},
                    {"label": "C", "value": "c"}
                ]}
            ]
        }))
        .await;
    let id = assignment["id"].as_str().unwrap();
    let form = fixture.get_form(id).await;
    let field_name = form[0]["name"].as_str().unwrap().to_string();

    let resp = fixture
        .client
        .put(fixture.url(&format!("/api/assignments/{}/form", id)))
        .json(&json!([
            {"name": field_name, "label": "Pick", "type": "select", "values": [
                {"label": "X", "value": "x"},
                {"label": "Y", "value": "y"}
            ]}
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let form = fixture.get_form(id).await;
    assert_eq!(form.len(), 1);
    // Same persisted field, fully replaced choice list
    assert_eq!(form[0]["name"].as_str().unwrap(), field_name);
    let values: Vec<(&str, &str)> = form[0]["values"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| (v["label"].as_str().unwrap(), v["value"].as_str().unwrap()))
        .collect();
    assert_eq!(values, vec![("X", "x"), ("Y", "y")]);
}

#[tokio::test]
async fn test_form_reconcile_idempotent_with_identifiers() {
    let fixture = TestFixture::new().await;
    let assignment = fixture
        .create_assignment(json!({
            "title": "Idempotent",
            "owner": "admin",
            "open": true,
            "fields": [
                {"label": "One", "type": "text"},
                {"label": "Two", "type": "select", "values": [{"label": "A", "value": "a"}]}
            ]
        }))
        .await;
    let id = assignment["id"].as_str().unwrap();
    let first = fixture.get_form(id).await;

    // Replay the rendered form (which carries the identifiers)
    let resp = fixture
        .client
        .put(fixture.url(&format!("/api/assignments/{}/form", id)))
        .json(&first)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let second = fixture.get_form(id).await;
    assert_eq!(second.len(), first.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a["name"], b["name"]);
        assert_eq!(a["label"], b["label"]);
        assert_eq!(a["type"], b["type"]);
    }

    // Nothing was soft-deleted along the way
    let csv = fixture
        .client
        .get(fixture.url(&format!("/api/assignments/{}/export", id)))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(!csv.lines().next().unwrap().contains("(deleted)"));
}

#[tokio::test]
async fn test_submit_requires_open_assignment() {
    let fixture = TestFixture::new().await;
    let assignment = fixture
        .create_assignment(json!({
            "title": "Draft Only",
            "owner": "admin",
            "registration": "optional",
            "fields": [{"label": "A", "type": "text"}]
        }))
        .await;
    let id = assignment["id"].as_str().unwrap();
    let form = fixture.get_form(id).await;
    let field_name = form[0]["name"].as_str().unwrap();

    let resp = fixture
        .public_client()
        .post(fixture.url(&format!("/api/assignments/{}/responses", id)))
        .json(&json!({
            "user": "alice",
            "values": {field_name: "hello"}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("No submitting to draft"));
}

#[tokio::test]
async fn test_registration_required_rejects_anonymous() {
    let fixture = TestFixture::new().await;
    let assignment = fixture
        .open_text_assignment(json!({"registration": "required"}))
        .await;
    let id = assignment["id"].as_str().unwrap();

    let resp = fixture
        .public_client()
        .post(fixture.url(&format!("/api/assignments/{}/responses", id)))
        .json(&json!({
            "ipAddress": "10.0.0.1",
            "values": {}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Registration is required"));
}

#[tokio::test]
async fn test_anonymous_registration_needs_name_and_email_together() {
    let fixture = TestFixture::new().await;
    let assignment = fixture.open_text_assignment(json!({})).await;
    let id = assignment["id"].as_str().unwrap();

    let resp = fixture
        .public_client()
        .post(fixture.url(&format!("/api/assignments/{}/responses", id)))
        .json(&json!({
            "ipAddress": "10.0.0.1",
            "email": "someone@example.com",
            "values": {}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Name is required"));
}

#[tokio::test]
async fn test_user_limit_allows_one_response() {
    let fixture = TestFixture::new().await;
    let assignment = fixture.open_text_assignment(json!({})).await;
    let id = assignment["id"].as_str().unwrap();
    let form = fixture.get_form(id).await;
    let field_name = form[0]["name"].as_str().unwrap().to_string();

    // First response goes through
    let next = fixture.next_for(id, "user=alice").await;
    assert_eq!(next["hasAssignment"], true);
    assert!(next["datum"].is_null());
    let response = fixture
        .submit(id, json!({"user": "alice", "values": {&field_name: "hi"}}))
        .await;
    assert_eq!(response["number"], 1);

    // No work left for alice
    let next = fixture.next_for(id, "user=alice").await;
    assert_eq!(next["hasAssignment"], false);

    // And a second submission is rejected
    let resp = fixture
        .public_client()
        .post(fixture.url(&format!("/api/assignments/{}/responses", id)))
        .json(&json!({"user": "alice", "values": {&field_name: "again"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // A different identity still has work
    let next = fixture.next_for(id, "user=bob").await;
    assert_eq!(next["hasAssignment"], true);
}

#[tokio::test]
async fn test_data_exhaustion_and_non_repetition() {
    let fixture = TestFixture::new().await;
    let assignment = fixture
        .create_assignment(json!({
            "title": "Data Walk",
            "owner": "admin",
            "registration": "optional",
            "dataLimit": 2,
            "open": true,
            "fields": [{"label": "Notes", "type": "text"}],
            "data": [
                {"url": "https://example.com/d0"},
                {"url": "https://example.com/d1"},
                {"url": "https://example.com/d2"},
                {"url": "https://example.com/d3"}
            ]
        }))
        .await;
    let id = assignment["id"].as_str().unwrap();
    let data = fixture.get_data(id).await;
    assert_eq!(data.len(), 4);
    let id_for = |url: &str| {
        data.iter()
            .find(|d| d["url"] == url)
            .unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string()
    };
    let d0 = id_for("https://example.com/d0");
    let d1 = id_for("https://example.com/d1");

    // U responds to d0
    fixture
        .submit(id, json!({"user": "u", "dataId": d0, "values": {}}))
        .await;

    // pick(U) never offers d0 again
    for _ in 0..15 {
        let next = fixture.next_for(id, "user=u").await;
        assert_eq!(next["hasAssignment"], true);
        let offered = next["datum"]["id"].as_str().unwrap();
        assert_ne!(offered, d0, "U was offered an item they already completed");
    }

    // Two other identities exhaust d1 (dataLimit = 2)
    fixture
        .submit(id, json!({"user": "v", "dataId": d1, "values": {}}))
        .await;
    fixture
        .submit(id, json!({"ipAddress": "10.1.1.1", "dataId": d1, "values": {}}))
        .await;

    // pick(U) now excludes both d0 and d1
    for _ in 0..15 {
        let next = fixture.next_for(id, "user=u").await;
        assert_eq!(next["hasAssignment"], true);
        let offered = next["datum"]["id"].as_str().unwrap();
        assert!(offered != d0 && offered != d1, "exhausted datum offered");
    }

    // A fresh identity is not offered the exhausted d1 either
    for _ in 0..15 {
        let next = fixture.next_for(id, "user=w").await;
        let offered = next["datum"]["id"].as_str().unwrap();
        assert_ne!(offered, d1);
    }
}

#[tokio::test]
async fn test_selector_exhausts_to_none() {
    let fixture = TestFixture::new().await;
    let assignment = fixture
        .create_assignment(json!({
            "title": "Tiny",
            "owner": "admin",
            "registration": "optional",
            "dataLimit": 1,
            "open": true,
            "fields": [{"label": "Notes", "type": "text"}],
            "data": [{"url": "https://example.com/only"}]
        }))
        .await;
    let id = assignment["id"].as_str().unwrap();
    let data = fixture.get_data(id).await;
    let only = data[0]["id"].as_str().unwrap();

    fixture
        .submit(id, json!({"user": "first", "dataId": only, "values": {}}))
        .await;

    // The sole datum is exhausted: no error, just no work
    let next = fixture.next_for(id, "user=second").await;
    assert_eq!(next["hasAssignment"], false);
    assert!(next["datum"].is_null());
}

#[tokio::test]
async fn test_duplicate_submission_against_same_datum_rejected() {
    let fixture = TestFixture::new().await;
    let assignment = fixture
        .create_assignment(json!({
            "title": "No Repeats",
            "owner": "admin",
            "registration": "optional",
            "open": true,
            "fields": [{"label": "Notes", "type": "text"}],
            "data": [{"url": "https://example.com/d0"}]
        }))
        .await;
    let id = assignment["id"].as_str().unwrap();
    let data = fixture.get_data(id).await;
    let d0 = data[0]["id"].as_str().unwrap();

    fixture
        .submit(id, json!({"user": "alice", "dataId": d0, "values": {}}))
        .await;

    let resp = fixture
        .public_client()
        .post(fixture.url(&format!("/api/assignments/{}/responses", id)))
        .json(&json!({"user": "alice", "dataId": d0, "values": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("already responded"));
}

#[tokio::test]
async fn test_multiple_per_page_numbers_submissions() {
    let fixture = TestFixture::new().await;
    let assignment = fixture
        .create_assignment(json!({
            "title": "Multi",
            "owner": "admin",
            "registration": "optional",
            "multiplePerPage": true,
            "open": true,
            "fields": [{"label": "Record", "type": "text"}],
            "data": [{"url": "https://example.com/d0"}]
        }))
        .await;
    let id = assignment["id"].as_str().unwrap();
    let data = fixture.get_data(id).await;
    let d0 = data[0]["id"].as_str().unwrap();
    let form = fixture.get_form(id).await;
    let field_name = form[0]["name"].as_str().unwrap().to_string();

    let first = fixture
        .submit(
            id,
            json!({"user": "alice", "dataId": d0, "values": {&field_name: "row 1"}}),
        )
        .await;
    assert_eq!(first["number"], 1);

    let second = fixture
        .submit(
            id,
            json!({"user": "alice", "dataId": d0, "values": {&field_name: "row 2"}}),
        )
        .await;
    assert_eq!(second["number"], 2);

    // Only the first completion counts toward exhaustion, so a second
    // identity is still offered the datum (dataLimit defaults to 3).
    let next = fixture.next_for(id, "user=bob").await;
    assert_eq!(next["hasAssignment"], true);
    assert_eq!(next["datum"]["id"].as_str().unwrap(), d0);
}

#[tokio::test]
async fn test_skip_counts_against_identity() {
    let fixture = TestFixture::new().await;
    let assignment = fixture
        .create_assignment(json!({
            "title": "Skippable",
            "owner": "admin",
            "registration": "optional",
            "dataLimit": 5,
            "open": true,
            "fields": [{"label": "Notes", "type": "text"}],
            "data": [
                {"url": "https://example.com/d0"},
                {"url": "https://example.com/d1"}
            ]
        }))
        .await;
    let id = assignment["id"].as_str().unwrap();
    let data = fixture.get_data(id).await;
    let d0 = data[0]["id"].as_str().unwrap();

    let response = fixture
        .submit(id, json!({"user": "alice", "dataId": d0, "skip": true}))
        .await;
    assert_eq!(response["skip"], true);

    // The skipped datum is not offered to alice again
    for _ in 0..10 {
        let next = fixture.next_for(id, "user=alice").await;
        assert_ne!(next["datum"]["id"].as_str().unwrap(), d0);
    }
}

#[tokio::test]
async fn test_next_requires_identity() {
    let fixture = TestFixture::new().await;
    let assignment = fixture.open_text_assignment(json!({})).await;
    let id = assignment["id"].as_str().unwrap();

    let resp = fixture
        .public_client()
        .get(fixture.url(&format!("/api/assignments/{}/next", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_csv_export_rows() {
    let fixture = TestFixture::new().await;
    let assignment = fixture
        .create_assignment(json!({
            "title": "Export",
            "owner": "admin",
            "registration": "optional",
            "open": true,
            "fields": [
                {"label": "Comment", "type": "text"},
                {"label": "Section", "type": "header"},
                {"label": "Tags", "type": "checkbox-group", "values": [
                    {"label": "Foo", "value": "foo"},
                    {"label": "Bar", "value": "bar"}
                ]}
            ]
        }))
        .await;
    let id = assignment["id"].as_str().unwrap();
    let form = fixture.get_form(id).await;
    let comment = form[0]["name"].as_str().unwrap().to_string();
    let checks = form[2]["name"].as_str().unwrap().to_string();

    fixture
        .submit(
            id,
            json!({
                "user": "alice",
                "values": {
                    &comment: "hello world",
                    &checks: ["foo", "bar"]
                }
            }),
        )
        .await;

    let csv = fixture
        .client
        .get(fixture.url(&format!("/api/assignments/{}/export", id)))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let mut lines = csv.lines();
    let header = lines.next().unwrap();
    // Static header field is excluded from the columns
    assert_eq!(
        header,
        "user,email,public,datetime,skip,flag,gallery,tags,Comment,Tags"
    );
    let row = lines.next().unwrap();
    assert!(row.starts_with("alice,,false,"));
    assert!(row.ends_with(",hello world,\"foo, bar\""));
}

#[tokio::test]
async fn test_csv_export_includes_datum_metadata() {
    let fixture = TestFixture::new().await;
    let assignment = fixture
        .create_assignment(json!({
            "title": "Export Data",
            "owner": "admin",
            "registration": "optional",
            "open": true,
            "fields": [{"label": "Notes", "type": "text"}],
            "data": [{"url": "https://example.com/doc", "metadata": {"page": "7"}}]
        }))
        .await;
    let id = assignment["id"].as_str().unwrap();
    let data = fixture.get_data(id).await;
    let d0 = data[0]["id"].as_str().unwrap();

    fixture
        .submit(id, json!({"user": "alice", "dataId": d0, "values": {}}))
        .await;

    let csv = fixture
        .client
        .get(fixture.url(&format!("/api/assignments/{}/export", id)))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let mut lines = csv.lines();
    assert_eq!(
        lines.next().unwrap(),
        "user,email,public,datetime,skip,flag,gallery,tags,datum,page,Notes"
    );
    let row = lines.next().unwrap();
    assert!(row.contains("https://example.com/doc"));
    assert!(row.contains(",7,"));
}

#[tokio::test]
async fn test_edit_and_revert_response() {
    let fixture = TestFixture::new().await;
    let assignment = fixture.open_text_assignment(json!({})).await;
    let id = assignment["id"].as_str().unwrap();
    let form = fixture.get_form(id).await;
    let field_name = form[0]["name"].as_str().unwrap().to_string();

    let response = fixture
        .submit(
            id,
            json!({"user": "alice", "values": {&field_name: "original text"}}),
        )
        .await;
    let response_id = response["id"].as_str().unwrap();

    // Edit the value
    let resp = fixture
        .client
        .put(fixture.url(&format!("/api/responses/{}", response_id)))
        .json(&json!({
            "editor": "admin",
            "values": {&field_name: "edited text"}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["editUser"], "admin");

    let list: Value = fixture
        .client
        .get(fixture.url(&format!("/api/assignments/{}/responses", id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["data"][0]["values"][0]["value"], "edited text");

    // Revert restores the as-submitted value
    let resp = fixture
        .client
        .post(fixture.url(&format!("/api/responses/{}/revert", response_id)))
        .json(&json!({"editor": "admin"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let list: Value = fixture
        .client
        .get(fixture.url(&format!("/api/assignments/{}/responses", id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["data"][0]["values"][0]["value"], "original text");
}

#[tokio::test]
async fn test_gallery_credits_only_public_responses() {
    let fixture = TestFixture::new().await;
    let assignment = fixture
        .create_assignment(json!({
            "title": "Gallery",
            "owner": "admin",
            "registration": "optional",
            "open": true,
            "fields": [{"label": "Quote", "type": "text", "gallery": true}]
        }))
        .await;
    let id = assignment["id"].as_str().unwrap();
    let form = fixture.get_form(id).await;
    let field_name = form[0]["name"].as_str().unwrap().to_string();

    let public_resp = fixture
        .submit(
            id,
            json!({"user": "alice", "public": true, "values": {&field_name: "credit me"}}),
        )
        .await;
    let anon_resp = fixture
        .submit(
            id,
            json!({"user": "bob", "public": false, "values": {&field_name: "keep me hidden"}}),
        )
        .await;

    // Gallery is empty until a moderator promotes responses into it
    let gallery: Value = fixture
        .public_client()
        .get(fixture.url(&format!("/api/assignments/{}/gallery", id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(gallery["data"].as_array().unwrap().len(), 0);

    for resp_id in [
        public_resp["id"].as_str().unwrap(),
        anon_resp["id"].as_str().unwrap(),
    ] {
        let resp = fixture
            .client
            .put(fixture.url(&format!("/api/responses/{}", resp_id)))
            .json(&json!({"editor": "admin", "gallery": true}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let gallery: Value = fixture
        .public_client()
        .get(fixture.url(&format!("/api/assignments/{}/gallery", id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let entries = gallery["data"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["user"], "alice");
    assert_eq!(entries[0]["values"][0]["value"], "credit me");
    // bob did not opt into public credit
    assert_eq!(entries[1]["user"], "Anonymous");
}

#[tokio::test]
async fn test_stats_track_completion() {
    let fixture = TestFixture::new().await;
    let assignment = fixture
        .create_assignment(json!({
            "title": "Stats",
            "owner": "admin",
            "registration": "optional",
            "dataLimit": 2,
            "open": true,
            "fields": [{"label": "Notes", "type": "text"}],
            "data": [
                {"url": "https://example.com/d0"},
                {"url": "https://example.com/d1"}
            ]
        }))
        .await;
    let id = assignment["id"].as_str().unwrap();
    let data = fixture.get_data(id).await;
    let d0 = data[0]["id"].as_str().unwrap();

    fixture
        .submit(id, json!({"user": "alice", "dataId": d0, "values": {}}))
        .await;

    let stats: Value = fixture
        .public_client()
        .get(fixture.url(&format!("/api/assignments/{}/stats", id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["data"]["responseCount"], 1);
    assert_eq!(stats["data"]["contributorCount"], 1);
    assert_eq!(stats["data"]["totalAssignments"], 4);
    assert_eq!(stats["data"]["percentComplete"], 25);
    assert_eq!(stats["data"]["responsesPerDay"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_revision_increments_on_writes() {
    let fixture = TestFixture::new().await;

    let assignment = fixture
        .create_assignment(json!({
            "title": "Revisions",
            "owner": "admin",
            "registration": "optional",
            "open": true,
            "fields": [{"label": "A", "type": "text"}]
        }))
        .await;
    let id = assignment["id"].as_str().unwrap();

    let before: Value = fixture
        .client
        .get(fixture.url("/api/assignments"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let revision_before = before["revisionId"].as_i64().unwrap();

    fixture
        .submit(id, json!({"user": "alice", "values": {}}))
        .await;

    let after: Value = fixture
        .client
        .get(fixture.url("/api/assignments"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let revision_after = after["revisionId"].as_i64().unwrap();
    assert!(revision_after > revision_before);
}

#[tokio::test]
async fn test_not_found_errors() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .public_client()
        .get(fixture.url("/api/assignments/no-such-id"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let resp = fixture
        .client
        .put(fixture.url("/api/responses/no-such-id"))
        .json(&json!({"editor": "admin"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
