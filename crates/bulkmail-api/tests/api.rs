//! End-to-end tests of the HTTP API over in-memory storage

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use bulkmail_api::{create_router, AppState};
use bulkmail_common::Config;
use bulkmail_core::{MailTransport, OutgoingEmail, SendOutcome, SmtpCredentials};
use bulkmail_storage::Repositories;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tower::ServiceExt;

const BOUNDARY: &str = "bulkmail-test-boundary";

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<OutgoingEmail>>,
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, _credentials: &SmtpCredentials, email: &OutgoingEmail) -> SendOutcome {
        self.sent.lock().await.push(email.clone());
        SendOutcome::success("Email sent successfully")
    }

    async fn verify(&self, _credentials: &SmtpCredentials) -> SendOutcome {
        SendOutcome::success("SMTP connection successful")
    }
}

struct TestApp {
    router: Router,
    transport: Arc<RecordingTransport>,
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.dispatch.pacing_min_ms = 0;
    config.dispatch.pacing_max_ms = 0;
    config.auth.admin_emails = vec!["admin@example.com".to_string()];
    config
}

fn app_with(config: Config) -> TestApp {
    let transport = Arc::new(RecordingTransport::default());
    let state = AppState::new(config, Repositories::in_memory(), transport.clone(), None);
    TestApp {
        router: create_router(Arc::new(state)),
        transport,
    }
}

fn app() -> TestApp {
    app_with(test_config())
}

fn json_request(method: Method, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn empty_request(method: Method, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

fn multipart_request(uri: &str, token: &str, fields: &[(&str, &str)], csv: &str) -> Request<Body> {
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    body.push_str(&format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"csv_file\"; filename=\"list.csv\"\r\nContent-Type: text/csv\r\n\r\n{csv}\r\n--{BOUNDARY}--\r\n"
    ));

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn call(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn login_as(app: &TestApp, email: &str) -> String {
    let credentials = json!({ "email": email, "password": "correct horse" });
    let (status, _) = call(
        app,
        json_request(Method::POST, "/api/auth/register", None, credentials.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call(
        app,
        json_request(Method::POST, "/api/auth/login", None, credentials),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().unwrap().to_string()
}

async fn add_account(app: &TestApp, token: &str) -> String {
    let (status, body) = call(
        app,
        json_request(
            Method::POST,
            "/api/smtp",
            Some(token),
            json!({
                "email": "news@example.com",
                "password": "secret",
                "smtp_server": "smtp.example.com",
                "smtp_port": 587
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["account"].get("password").is_none());
    body["account"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let (status, body) = call(&app, empty_request(Method::GET, "/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_protected_routes_require_session() {
    let app = app();
    let (status, body) = call(&app, empty_request(Method::GET, "/api/stats", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "UNAUTHORIZED");

    let (status, _) = call(&app, empty_request(Method::GET, "/api/stats", Some("bogus"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_validation_and_duplicates() {
    let app = app();
    let (status, body) = call(
        &app,
        json_request(
            Method::POST,
            "/api/auth/register",
            None,
            json!({ "email": "not-an-email", "password": "correct horse" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid email address");

    login_as(&app, "jane@example.com").await;
    let (status, _) = call(
        &app,
        json_request(
            Method::POST,
            "/api/auth/register",
            None,
            json!({ "email": "Jane@Example.com", "password": "correct horse" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_logout_ends_session() {
    let app = app();
    let token = login_as(&app, "jane@example.com").await;

    let (status, _) = call(&app, empty_request(Method::POST, "/api/auth/logout", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&app, empty_request(Method::GET, "/api/stats", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_expired_session_is_removed() {
    let mut config = test_config();
    config.auth.session_ttl_hours = 0;
    let app = app_with(config);
    let token = login_as(&app, "jane@example.com").await;

    let (status, body) = call(&app, empty_request(Method::GET, "/api/stats", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Session expired");

    let (status, body) = call(&app, empty_request(Method::GET, "/api/stats", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid session");
}

#[tokio::test]
async fn test_stats_for_new_user() {
    let app = app();
    let token = login_as(&app, "jane@example.com").await;

    let (status, body) = call(&app, empty_request(Method::GET, "/api/stats", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plan"], "free");
    assert_eq!(body["daily_limit"], 10);
    assert_eq!(body["remaining_today"], 10);
    assert_eq!(body["email_stats"]["total"], 0);
    assert_eq!(body["smtp_accounts"], 0);
}

#[tokio::test]
async fn test_single_send_history_and_open_tracking() {
    let app = app();
    let token = login_as(&app, "jane@example.com").await;
    let account_id = add_account(&app, &token).await;

    let (status, body) = call(
        &app,
        json_request(
            Method::POST,
            "/api/send",
            Some(&token),
            json!({
                "to_email": "reader@example.org",
                "subject": "Hello {{email}}",
                "body": "Plain",
                "html_body": "<html><body><p>Hi</p></body></html>",
                "smtp_account_id": account_id
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let email_id = body["email_id"].as_str().unwrap().to_string();

    {
        let sent = app.transport.sent.lock().await;
        assert_eq!(sent[0].subject, "Hello reader@example.org");
        assert!(sent[0]
            .html_body
            .as_deref()
            .unwrap()
            .contains(&format!("/api/track/open/{}", email_id)));
    }

    let (_, body) = call(&app, empty_request(Method::GET, "/api/history", Some(&token))).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["history"][0]["opened"], false);

    let response = app
        .router
        .clone()
        .oneshot(empty_request(
            Method::GET,
            &format!("/api/track/open/{}", email_id),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/gif");
    let pixel = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(pixel.len(), 43);

    let (_, body) = call(&app, empty_request(Method::GET, "/api/history", Some(&token))).await;
    assert_eq!(body["history"][0]["opened"], true);
}

#[tokio::test]
async fn test_unsubscribe_link_blocks_further_sends() {
    let app = app();
    let token = login_as(&app, "jane@example.com").await;
    let account_id = add_account(&app, &token).await;
    let send = json!({
        "to_email": "reader@example.org",
        "subject": "News",
        "body": "Leave: {{unsubscribe_url}}",
        "smtp_account_id": account_id
    });

    let (status, _) = call(
        &app,
        json_request(Method::POST, "/api/send", Some(&token), send.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let link = {
        let sent = app.transport.sent.lock().await;
        sent[0]
            .text_body
            .strip_prefix("Leave: http://localhost:5000")
            .unwrap()
            .to_string()
    };
    assert!(link.starts_with("/unsubscribe/"));

    let response = app
        .router
        .clone()
        .oneshot(empty_request(Method::GET, &link, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&page).contains("unsubscribed"));

    let (status, body) = call(
        &app,
        json_request(Method::POST, "/api/send", Some(&token), send),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Recipient has unsubscribed");
    assert_eq!(app.transport.sent.lock().await.len(), 1);

    let (status, body) = call(&app, empty_request(Method::GET, "/unsubscribe/forged", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid unsubscribe link");
}

#[tokio::test]
async fn test_tracking_ignores_unknown_ids() {
    let app = app();
    let response = app
        .router
        .clone()
        .oneshot(empty_request(Method::GET, "/api/track/open/12345", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_single_send_rejects_when_quota_exhausted() {
    let app = app();
    let token = login_as(&app, "jane@example.com").await;
    let account_id = add_account(&app, &token).await;
    let send = || {
        json_request(
            Method::POST,
            "/api/send",
            Some(&token),
            json!({
                "to_email": "reader@example.org",
                "subject": "Hello",
                "body": "Plain",
                "smtp_account_id": account_id
            }),
        )
    };

    for _ in 0..10 {
        let (status, _) = call(&app, send()).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = call(&app, send()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "QUOTA_EXCEEDED");
    assert_eq!(body["message"], "Daily limit reached (10/10)");
    assert_eq!(app.transport.sent.lock().await.len(), 10);
}

#[tokio::test]
async fn test_single_send_validates_fields() {
    let app = app();
    let token = login_as(&app, "jane@example.com").await;

    let (status, body) = call(
        &app,
        json_request(
            Method::POST,
            "/api/send",
            Some(&token),
            json!({ "subject": "Hello", "body": "Plain" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Missing to_email");
    assert!(app.transport.sent.lock().await.is_empty());
}

#[tokio::test]
async fn test_bulk_send_drops_bad_rows() {
    let app = app();
    let token = login_as(&app, "jane@example.com").await;
    let account_id = add_account(&app, &token).await;

    let (status, body) = call(
        &app,
        multipart_request(
            "/api/send/bulk",
            &token,
            &[("smtp_account_id", &account_id), ("body", "Hi {{email}}")],
            "email,subject\na@x.com,Hello\nbad,Hello\na@x.com,Hello\n",
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dropped_invalid"], 1);
    assert_eq!(body["dropped_duplicate"], 1);
    assert_eq!(body["sent"], 1);
    assert_eq!(body["results"][0]["status"], "success");
    assert_eq!(body["message"], "Sent 1 emails");
}

#[tokio::test]
async fn test_campaign_lifecycle() {
    let app = app();
    let token = login_as(&app, "jane@example.com").await;
    let account_id = add_account(&app, &token).await;

    let (status, body) = call(
        &app,
        multipart_request(
            "/api/campaigns",
            &token,
            &[
                ("name", "Spring"),
                ("subject", "Hi {{first_name}}"),
                ("body", "Hello from {{sender_name}}"),
                ("smtp_account_id", &account_id),
            ],
            "email,name\nann@example.com,Ann Lee\nbob@example.com,Bob\nnope,Nobody\n",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["campaign"]["status"], "draft");
    assert_eq!(body["campaign"]["total_recipients"], 2);
    assert_eq!(body["dropped_invalid"], 1);
    let campaign_id = body["campaign"]["id"].as_str().unwrap().to_string();
    let campaign_uri = format!("/api/campaigns/{}", campaign_id);

    let (status, body) = call(
        &app,
        empty_request(Method::POST, &format!("{}/start", campaign_uri), Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["campaign"]["status"], "queued");

    let mut detail = Value::Null;
    for _ in 0..200 {
        let (_, body) = call(&app, empty_request(Method::GET, &campaign_uri, Some(&token))).await;
        if body["campaign"]["status"] == "completed" && body["running"] == false {
            detail = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(detail["campaign"]["sent_count"], 2);
    assert_eq!(detail["pending_recipients"], 0);

    let sent = app.transport.sent.lock().await.clone();
    assert_eq!(sent[0].subject, "Hi Ann");

    let (status, body) = call(
        &app,
        empty_request(Method::POST, &format!("{}/start", campaign_uri), Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "Campaign cannot be started while completed");

    let (_, body) = call(
        &app,
        empty_request(Method::GET, &format!("{}/recipients", campaign_uri), Some(&token)),
    )
    .await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["recipients"][1]["status"], "sent");

    let (status, _) = call(&app, empty_request(Method::DELETE, &campaign_uri, Some(&token))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, empty_request(Method::GET, &campaign_uri, Some(&token))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_campaign_csv_without_valid_rows_is_rejected() {
    let app = app();
    let token = login_as(&app, "jane@example.com").await;
    let account_id = add_account(&app, &token).await;

    let (status, body) = call(
        &app,
        multipart_request(
            "/api/campaigns",
            &token,
            &[
                ("name", "Empty"),
                ("subject", "Hi"),
                ("body", "Hello"),
                ("smtp_account_id", &account_id),
            ],
            "email\nbad\n",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("no valid recipients"));

    let (_, body) = call(&app, empty_request(Method::GET, "/api/campaigns", Some(&token))).await;
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_campaigns_are_private() {
    let app = app();
    let owner = login_as(&app, "jane@example.com").await;
    let other = login_as(&app, "mallory@example.com").await;
    let account_id = add_account(&app, &owner).await;

    let (_, body) = call(
        &app,
        multipart_request(
            "/api/campaigns",
            &owner,
            &[
                ("name", "Spring"),
                ("subject", "Hi"),
                ("body", "Hello"),
                ("smtp_account_id", &account_id),
            ],
            "email\nann@example.com\n",
        ),
    )
    .await;
    let campaign_id = body["campaign"]["id"].as_str().unwrap().to_string();

    let (status, _) = call(
        &app,
        empty_request(
            Method::POST,
            &format!("/api/campaigns/{}/start", campaign_id),
            Some(&other),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upgrade_requires_admin_approval() {
    let app = app();
    let user = login_as(&app, "jane@example.com").await;
    let admin = login_as(&app, "admin@example.com").await;

    let (status, body) = call(&app, empty_request(Method::POST, "/api/upgrade", Some(&user))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["plan"], "free");
    let request_id = body["request"]["id"].as_str().unwrap().to_string();

    let (status, _) = call(
        &app,
        empty_request(Method::GET, "/api/admin/premium-requests", Some(&user)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &app,
        empty_request(Method::GET, "/api/admin/premium-requests", Some(&admin)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["requests"].as_array().unwrap().len(), 1);

    let approve_uri = format!("/api/admin/premium-requests/{}/approve", request_id);
    let (status, body) = call(&app, empty_request(Method::POST, &approve_uri, Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["request"]["status"], "approved");

    let (status, _) = call(&app, empty_request(Method::POST, &approve_uri, Some(&admin))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = call(&app, empty_request(Method::GET, "/api/stats", Some(&user))).await;
    assert_eq!(body["plan"], "premium");
    assert_eq!(body["daily_limit"], 100);
}

#[tokio::test]
async fn test_upgrade_auto_approved() {
    let mut config = test_config();
    config.quota.auto_approve_upgrades = true;
    let app = app_with(config);
    let token = login_as(&app, "jane@example.com").await;

    let (status, body) = call(&app, empty_request(Method::POST, "/api/upgrade", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plan"], "premium");
    assert_eq!(body["daily_limit"], 100);
}
