//! Integration tests for the consent backend.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::{header, Client, Response};
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::config::Config;
use crate::consent::ConsentSessions;
use crate::db::{init_database, StorageProvider};
use crate::{create_router, AppState};

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base_url = spawn_server(&temp_dir.path().join("test.sqlite")).await;

        TestFixture {
            client: Client::new(),
            base_url,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// First page view: returns the `Cookie` header to send from then on.
    async fn visit(&self) -> String {
        let resp = self
            .client
            .get(self.url("/api/consent"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        session_cookie(&resp).expect("session cookie issued")
    }

    async fn get(&self, path: &str, cookie: &str) -> Response {
        self.client
            .get(self.url(path))
            .header(header::COOKIE, cookie)
            .send()
            .await
            .unwrap()
    }

    async fn post(&self, path: &str, cookie: &str) -> Response {
        self.client
            .post(self.url(path))
            .header(header::COOKIE, cookie)
            .send()
            .await
            .unwrap()
    }

    async fn consent(&self, cookie: &str) -> Value {
        let body: Value = self.get("/api/consent", cookie).await.json().await.unwrap();
        assert_eq!(body["success"], true);
        body["data"].clone()
    }

    /// Poll until the delayed banner flag settles.
    async fn wait_for_banner(&self, cookie: &str) -> Value {
        for _ in 0..50 {
            let consent = self.consent(cookie).await;
            if consent["showBanner"] == true {
                return consent;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("banner never shown");
    }
}

/// Start a server on a random port backed by the database at `db_path`.
async fn spawn_server(db_path: &Path) -> String {
    let pool = init_database(db_path).await.expect("Failed to init DB");

    let config = Arc::new(Config {
        db_path: db_path.to_path_buf(),
        in_memory: false,
        ..Config::for_tests()
    });

    let state = AppState {
        sessions: Arc::new(ConsentSessions::new(
            StorageProvider::Sqlite(pool),
            config.clone(),
        )),
        config,
    };

    let app = create_router(state);

    // Bind to random port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get addr");

    // Spawn server
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Wait for server to start
    tokio::time::sleep(Duration::from_millis(100)).await;

    format!("http://{}", addr)
}

fn set_cookies(resp: &Response) -> Vec<String> {
    resp.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

fn session_cookie(resp: &Response) -> Option<String> {
    set_cookies(resp)
        .into_iter()
        .find(|c| c.starts_with("session_id="))
        .and_then(|c| c.split(';').next().map(str::to_string))
}

/// Read an SSE body until an event named `name` arrives; returns its data.
async fn next_event(resp: Response, name: &str) -> Value {
    let mut body = resp.bytes_stream();
    let mut buffer = String::new();
    let marker = format!("event: {}\n", name);

    let read = async {
        while let Some(chunk) = body.next().await {
            buffer.push_str(&String::from_utf8_lossy(&chunk.unwrap()));
            if let Some(start) = buffer.find(&marker) {
                let rest = &buffer[start + marker.len()..];
                if let Some(end) = rest.find("\n\n") {
                    let data = rest[..end]
                        .lines()
                        .find_map(|l| l.strip_prefix("data: "))
                        .expect("event data");
                    return serde_json::from_str(data).unwrap();
                }
            }
        }
        panic!("stream ended before {}", name);
    };

    tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("event not received")
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
async fn test_first_visit_issues_session_and_shows_banner() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/api/consent"))
        .send()
        .await
        .unwrap();
    let issued = set_cookies(&resp)
        .into_iter()
        .find(|c| c.starts_with("session_id="))
        .expect("session cookie issued");
    assert!(issued.contains("; Max-Age=31536000"));
    assert!(issued.contains("; HttpOnly"));
    assert!(!issued.contains("; Secure"));
    let cookie = session_cookie(&resp).unwrap();

    let consent = fixture.wait_for_banner(&cookie).await;
    assert_eq!(consent["isLoaded"], true);
    assert_eq!(consent["needsConsent"], true);
    assert_eq!(consent["showPreferences"], false);
    assert_eq!(consent["preferences"]["essential"], true);
    assert_eq!(consent["preferences"]["analytics"], false);
    assert_eq!(consent["preferences"]["version"], "1.0.0");
    assert_eq!(consent["consentMode"]["analytics_storage"], "denied");
    assert_eq!(consent["consentMode"]["ad_storage"], "denied");

    // A known session is not reissued
    let resp = fixture.get("/api/consent", &cookie).await;
    assert!(session_cookie(&resp).is_none());
}

#[tokio::test]
async fn test_invalid_session_cookie_is_replaced() {
    let fixture = TestFixture::new().await;

    let resp = fixture.get("/api/consent", "session_id=not-a-uuid").await;
    assert_eq!(resp.status(), 200);
    let cookie = session_cookie(&resp).expect("fresh session issued");
    assert_ne!(cookie, "session_id=not-a-uuid");
}

#[tokio::test]
async fn test_accept_all_hides_banner_and_grants_everything() {
    let fixture = TestFixture::new().await;
    let cookie = fixture.visit().await;
    fixture.wait_for_banner(&cookie).await;

    let resp = fixture.post("/api/consent/accept-all", &cookie).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);

    let data = &body["data"];
    assert_eq!(data["persisted"], true);
    assert_eq!(data["reconciliation"]["signals"]["analytics"], "granted");
    assert_eq!(data["reconciliation"]["signals"]["marketing"], "granted");
    assert_eq!(data["reconciliation"]["purged"], json!([]));
    assert_eq!(data["consent"]["showBanner"], false);
    assert_eq!(data["consent"]["needsConsent"], false);
    assert_eq!(data["consent"]["consentMode"]["ad_user_data"], "granted");
    assert_eq!(
        body["revisionId"],
        data["consent"]["preferences"]["timestamp"]
    );

    for category in ["essential", "analytics", "marketing", "preferences"] {
        let body: Value = fixture
            .get(&format!("/api/consent/allowed/{}", category), &cookie)
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(body["data"]["allowed"], true, "{} allowed", category);
    }
}

#[tokio::test]
async fn test_reject_all_purges_tracking_cookies() {
    let fixture = TestFixture::new().await;
    let session = fixture.visit().await;
    let cookie = format!("{}; _ga=GA1.1; _ga_ABC=GS1.1; _fbp=fb.1; unrelated=1", session);

    let resp = fixture.post("/api/consent/reject-all", &cookie).await;
    assert_eq!(resp.status(), 200);

    let expired = set_cookies(&resp);
    for name in ["_ga", "_ga_ABC", "_fbp"] {
        let prefix = format!("{}=;", name);
        let scopes: Vec<_> = expired.iter().filter(|c| c.starts_with(&prefix)).collect();
        assert_eq!(scopes.len(), 2, "{} expired on both scopes", name);
        assert!(scopes.iter().all(|c| c.contains("Max-Age=0")));
        assert!(scopes.iter().any(|c| c.contains("Domain=127.0.0.1")));
    }
    assert!(!expired.iter().any(|c| c.starts_with("unrelated=")));
    assert!(!expired.iter().any(|c| c.starts_with("session_id=")));

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["reconciliation"]["purged"], json!(["_ga", "_ga_ABC", "_fbp"]));
    assert_eq!(body["data"]["reconciliation"]["signals"]["analytics"], "denied");
    assert_eq!(body["data"]["consent"]["preferences"]["essential"], true);
    assert_eq!(body["data"]["consent"]["preferences"]["marketing"], false);
}

#[tokio::test]
async fn test_essential_only_matches_reject_all() {
    let fixture = TestFixture::new().await;
    let cookie = fixture.visit().await;
    fixture.post("/api/consent/accept-all", &cookie).await;

    let body: Value = fixture
        .post("/api/consent/essential-only", &cookie)
        .await
        .json()
        .await
        .unwrap();

    let prefs = &body["data"]["consent"]["preferences"];
    assert_eq!(prefs["essential"], true);
    assert_eq!(prefs["analytics"], false);
    assert_eq!(prefs["marketing"], false);
    assert_eq!(prefs["preferences"], false);
}

#[tokio::test]
async fn test_partial_preferences_merge() {
    let fixture = TestFixture::new().await;
    let cookie = fixture.visit().await;

    let resp = fixture
        .client
        .put(fixture.url("/api/consent/preferences"))
        .header(header::COOKIE, &cookie)
        .json(&json!({ "analytics": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = fixture
        .client
        .put(fixture.url("/api/consent/preferences"))
        .header(header::COOKIE, &cookie)
        .json(&json!({ "marketing": true, "essential": false }))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();

    let prefs = &body["data"]["consent"]["preferences"];
    assert_eq!(prefs["essential"], true);
    assert_eq!(prefs["analytics"], true);
    assert_eq!(prefs["marketing"], true);
    assert_eq!(prefs["preferences"], false);
}

#[tokio::test]
async fn test_preferences_panel_open_close() {
    let fixture = TestFixture::new().await;
    let cookie = fixture.visit().await;

    let body: Value = fixture
        .post("/api/consent/panel/open", &cookie)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["showPreferences"], true);

    let body: Value = fixture
        .post("/api/consent/panel/close", &cookie)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["showPreferences"], false);
    assert_eq!(body["data"]["needsConsent"], true);

    // Saving from an open panel closes it
    fixture.post("/api/consent/panel/open", &cookie).await;
    let body: Value = fixture
        .post("/api/consent/accept-all", &cookie)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["consent"]["showPreferences"], false);
}

#[tokio::test]
async fn test_consent_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.sqlite");
    let client = Client::new();

    let first = spawn_server(&db_path).await;
    let resp = client.get(format!("{}/api/consent", first)).send().await.unwrap();
    let cookie = session_cookie(&resp).unwrap();
    client
        .put(format!("{}/api/consent/preferences", first))
        .header(header::COOKIE, &cookie)
        .json(&json!({ "analytics": true }))
        .send()
        .await
        .unwrap();

    let second = spawn_server(&db_path).await;
    let body: Value = client
        .get(format!("{}/api/consent", second))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let data = &body["data"];
    assert_eq!(data["needsConsent"], false);
    assert_eq!(data["showBanner"], false);
    assert_eq!(data["preferences"]["analytics"], true);
    assert_eq!(data["preferences"]["marketing"], false);
    assert_eq!(data["consentMode"]["analytics_storage"], "granted");
    assert_eq!(data["consentMode"]["ad_storage"], "denied");
}

#[tokio::test]
async fn test_categories_catalogue() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/api/consent/categories"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();

    assert_eq!(body["data"]["policyVersion"], "1.0.0");
    let categories = body["data"]["categories"].as_array().unwrap();
    let ids: Vec<_> = categories.iter().map(|c| c["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["essential", "analytics", "marketing", "preferences"]);
    assert_eq!(categories[0]["required"], true);
    assert_eq!(categories[1]["required"], false);
}

#[tokio::test]
async fn test_unknown_category_is_rejected() {
    let fixture = TestFixture::new().await;
    let cookie = fixture.visit().await;

    let resp = fixture.get("/api/consent/allowed/tracking", &cookie).await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let fixture = TestFixture::new().await;
    let cookie = fixture.visit().await;

    let resp = fixture
        .client
        .put(fixture.url("/api/consent/preferences"))
        .header(header::COOKIE, &cookie)
        .header(header::CONTENT_TYPE, "application/json")
        .body("{\"analytics\": \"yes\"")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    // Nothing was saved
    assert_eq!(fixture.consent(&cookie).await["needsConsent"], true);
}

#[tokio::test]
async fn test_unknown_route_returns_envelope() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/api/properties"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_change_event_streams_after_save() {
    let fixture = TestFixture::new().await;
    let cookie = fixture.visit().await;

    let events = fixture.get("/api/consent/events", &cookie).await;
    assert_eq!(events.status(), 200);

    fixture.post("/api/consent/accept-all", &cookie).await;

    let detail = next_event(events, "cookieConsentUpdated").await;
    assert_eq!(detail["essential"], true);
    assert_eq!(detail["analytics"], true);
    assert_eq!(detail["marketing"], true);
    assert_eq!(detail["version"], "1.0.0");
}

#[tokio::test]
async fn test_state_stream_starts_with_current_snapshot() {
    let fixture = TestFixture::new().await;
    let cookie = fixture.visit().await;
    fixture.post("/api/consent/reject-all", &cookie).await;

    let events = fixture.get("/api/consent/state/events", &cookie).await;
    assert_eq!(events.status(), 200);

    let snapshot = next_event(events, "consentState").await;
    assert_eq!(snapshot["isLoaded"], true);
    assert_eq!(snapshot["needsConsent"], false);
    assert_eq!(snapshot["preferences"]["analytics"], false);
}

#[tokio::test]
async fn test_cookieless_reads_do_not_register_visitors() {
    let fixture = TestFixture::new().await;

    for _ in 0..5 {
        let resp = fixture
            .client
            .get(fixture.url("/api/consent/allowed/analytics"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert!(session_cookie(&resp).is_none());
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["data"]["allowed"], false);
    }

    let body: Value = fixture
        .client
        .get(fixture.url("/api/consent/allowed/essential"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["allowed"], true);

    let resp = fixture
        .client
        .get(fixture.url("/api/consent/events"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}
