use super::support::{api_path, user_json, Harness};
use lexis_core::{ApiError, AuthScheme, SessionFile, SessionStore};
use tempfile::TempDir;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn chat_answer() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "answer": "Theo Điều 25, quyền nhân thân được bảo vệ.",
        "sources": ["Điều_25"]
    }))
}

#[tokio::test]
async fn expired_access_token_is_refreshed_and_the_request_replayed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(api_path("/chat")))
        .and(header("authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(api_path("/auth/refresh")))
        .and(body_json(json!({"refresh_token": "r1"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "new", "refresh_token": "r2"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(api_path("/chat")))
        .and(header("authorization", "Bearer new"))
        .and(body_json(json!({"message": "Điều 25?"})))
        .respond_with(chat_answer())
        .expect(1)
        .mount(&server)
        .await;

    let h = Harness::signed_in_bearer(&server, "old", "r1");
    let reply = h.client.send_message("Điều 25?").await.expect("reply");

    assert_eq!(reply.sources, vec!["Điều_25".to_string()]);
    assert_eq!(h.session.access_token().as_deref(), Some("new"));
    assert_eq!(h.session.refresh_token().as_deref(), Some("r2"));
    assert_eq!(h.redirect_count(), 0);
}

#[tokio::test]
async fn concurrent_unauthorized_requests_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(api_path("/chat")))
        .and(header("authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(30)))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(api_path("/auth/refresh")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "new"}))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(api_path("/chat")))
        .and(header("authorization", "Bearer new"))
        .respond_with(chat_answer())
        .expect(2)
        .mount(&server)
        .await;

    let h = Harness::signed_in_bearer(&server, "old", "r1");
    let (first, second) = tokio::join!(
        h.client.send_message("first"),
        h.client.send_message("second")
    );

    assert!(first.is_ok() && second.is_ok());
    assert_eq!(h.session.refresh_token().as_deref(), Some("r1"));
}

#[tokio::test]
async fn rejected_refresh_clears_the_session_and_redirects_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(api_path("/chat")))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(api_path("/auth/refresh")))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "expired"})))
        .expect(1)
        .mount(&server)
        .await;

    let h = Harness::signed_in_bearer(&server, "old", "r1");
    let err = h.client.send_message("hi").await.unwrap_err();

    assert_eq!(err, ApiError::SessionExpired);
    assert!(!h.session.is_authenticated());
    assert!(h.session.user().is_none());
    assert_eq!(h.redirect_count(), 1);
}

#[tokio::test]
async fn concurrent_requests_share_one_rejected_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(api_path("/chat")))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(30)))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(api_path("/auth/refresh")))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(50)))
        .expect(1)
        .mount(&server)
        .await;

    let h = Harness::signed_in_bearer(&server, "old", "r1");
    let (first, second) = tokio::join!(
        h.client.send_message("first"),
        h.client.send_message("second")
    );

    assert_eq!(first.unwrap_err(), ApiError::SessionExpired);
    assert_eq!(second.unwrap_err(), ApiError::SessionExpired);
    assert!(!h.session.is_authenticated());
    assert_eq!(h.redirect_count(), 1);
}

#[tokio::test]
async fn rate_limits_reach_the_caller_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(api_path("/chat")))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({"detail": "5 per 1 minute"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(api_path("/auth/refresh")))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let h = Harness::signed_in_bearer(&server, "old", "r1");
    let err = h.client.send_message("hi").await.unwrap_err();

    assert_eq!(err.status(), Some(429));
    assert!(h.session.is_authenticated());
}

#[tokio::test]
async fn bearer_login_and_logout_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(api_path("/auth/login/google")))
        .and(body_json(json!({"credential": "google-id-token"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "a1",
            "refresh_token": "r1",
            "token_type": "bearer",
            "user": user_json()
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(api_path("/auth/logout")))
        .and(header("authorization", "Bearer a1"))
        .and(body_json(json!({"refresh_token": "r1"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let h = Harness::new(&server, AuthScheme::Bearer, SessionStore::new());
    let user = h.auth.login_google("google-id-token").await.expect("login");
    assert_eq!(user.display_name(), "Tran Binh");
    assert_eq!(h.session.access_token().as_deref(), Some("a1"));

    // Already signed in: no second exchange.
    h.auth.login_google("google-id-token").await.expect("login");

    h.auth.logout().await;
    assert!(!h.session.is_authenticated());
    assert!(h.session.snapshot().credential.is_none());
}

#[tokio::test]
async fn logout_clears_locally_even_when_the_server_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(api_path("/auth/logout")))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let h = Harness::signed_in_bearer(&server, "a1", "r1");
    h.auth.logout().await;

    assert!(!h.session.is_authenticated());
    assert_eq!(h.redirect_count(), 0);
}

#[tokio::test]
async fn rejected_login_leaves_the_session_empty() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(api_path("/auth/login/google")))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "bad token"})))
        .mount(&server)
        .await;

    let h = Harness::new(&server, AuthScheme::Bearer, SessionStore::new());
    let err = h.auth.login_google("forged").await.unwrap_err();

    assert_eq!(err.status(), Some(401));
    assert!(!h.session.is_authenticated());
}

#[tokio::test]
async fn cookie_scheme_rides_on_the_cookie_jar() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(api_path("/auth/login/google")))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("set-cookie", "access_token=a1; Path=/; HttpOnly")
                .set_body_json(user_json()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(api_path("/chat")))
        .and(header("cookie", "access_token=a1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(api_path("/auth/refresh")))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("set-cookie", "access_token=a2; Path=/; HttpOnly"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(api_path("/chat")))
        .and(header("cookie", "access_token=a2"))
        .respond_with(chat_answer())
        .expect(1)
        .mount(&server)
        .await;

    let h = Harness::new(&server, AuthScheme::Cookie, SessionStore::new());
    h.auth.login_google("google-id-token").await.expect("login");
    assert!(h.session.is_authenticated());
    assert!(h.session.snapshot().credential.is_none());

    let reply = h.client.send_message("Điều 25?").await.expect("reply");
    assert_eq!(reply.sources.len(), 1);
}

#[tokio::test]
async fn restored_cookie_session_keeps_its_cookies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(api_path("/auth/login/google")))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("set-cookie", "access_token=a1; Path=/; HttpOnly")
                .append_header("set-cookie", "refresh_token=r1; Path=/api/v1/auth; HttpOnly")
                .set_body_json(user_json()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(api_path("/chat")))
        .and(header("cookie", "access_token=a1"))
        .respond_with(chat_answer())
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(api_path("/auth/refresh")))
        .respond_with(ResponseTemplate::new(401))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("temp dir");
    let file = SessionFile::new(dir.path().to_path_buf());
    let first = Harness::persisted(&server, AuthScheme::Cookie, &file);
    first.auth.login_google("google-id-token").await.expect("login");
    first.client.send_message("Điều 25?").await.expect("first run");
    assert!(file.cookie_path().exists());

    let second = Harness::persisted(&server, AuthScheme::Cookie, &file);
    assert!(second.session.is_authenticated());
    second.client.send_message("Điều 26?").await.expect("second run");

    assert!(second.session.is_authenticated());
    assert_eq!(second.redirect_count(), 0);
}

#[tokio::test]
async fn logout_forgets_persisted_cookies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(api_path("/auth/login/google")))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("set-cookie", "access_token=a1; Path=/; HttpOnly")
                .set_body_json(user_json()),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(api_path("/auth/logout")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("temp dir");
    let file = SessionFile::new(dir.path().to_path_buf());
    let first = Harness::persisted(&server, AuthScheme::Cookie, &file);
    first.auth.login_google("google-id-token").await.expect("login");
    first.auth.logout().await;

    let cookies = std::fs::read_to_string(file.cookie_path()).expect("cookie file");
    assert!(!cookies.contains("a1"));
    let second = Harness::persisted(&server, AuthScheme::Cookie, &file);
    assert!(!second.session.is_authenticated());
}
