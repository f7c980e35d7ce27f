use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use mockito::Matcher;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

use super::*;
use crate::{
    models::Credential,
    storage::{CredentialStore, MemoryStore},
};

/// Memory store that counts how often it was cleared.
#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    clears: AtomicUsize,
}

impl CredentialStore for CountingStore {
    fn get(&self) -> Credential {
        self.inner.get()
    }

    fn set(&self, credential: Credential) {
        self.inner.set(credential)
    }

    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.inner.clear()
    }
}

fn signed_in(access: &str, refresh: Option<&str>) -> Arc<CountingStore> {
    let store = CountingStore::default();
    store.set(Credential {
        access_token: Some(access.to_string()),
        refresh_token: refresh.map(str::to_string),
        user: None,
    });
    Arc::new(store)
}

fn refresh_body(access: &str) -> String {
    json!({"access_token": access, "refresh_token": "refresh-2", "token_type": "bearer"}).to_string()
}

#[tokio::test]
async fn test_request_is_decorated() {
    let mut server = mockito::Server::new_async().await;
    let handler = server
        .mock("GET", "/conversations")
        .match_header("Authorization", "Bearer access-1")
        .match_header("X-Test-Mode", "2")
        .match_query(Matcher::UrlEncoded("mode".into(), "chat".into()))
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;

    let store = signed_in("access-1", Some("refresh-1"));
    let client = SessionClient::new(&format!("{}/", server.url()), store)
        .with_test_mode(Some(TestMode::Confirm));

    let res: Vec<Value> = client
        .send_json(ApiRequest::get("/conversations").with_query("mode", Some("chat")))
        .await
        .expect("list conversations");

    assert!(res.is_empty());
    handler.assert_async().await;
}

#[tokio::test]
async fn test_test_mode_header_omitted_when_unset() {
    let mut server = mockito::Server::new_async().await;
    let handler = server
        .mock("GET", "/auth/me")
        .match_header("X-Test-Mode", Matcher::Missing)
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let client = SessionClient::new(&server.url(), signed_in("access-1", None));
    client
        .send_empty(ApiRequest::get("/auth/me"))
        .await
        .expect("request without test mode");
    handler.assert_async().await;
}

#[tokio::test]
async fn test_non_401_error_propagates_without_refresh() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/conversations/c1")
        .with_status(404)
        .with_body(r#"{"detail": "Conversation not found"}"#)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", REFRESH_PATH)
        .expect(0)
        .create_async()
        .await;

    let client = SessionClient::new(&server.url(), signed_in("access-1", Some("refresh-1")));
    let err = client
        .send(ApiRequest::get("/conversations/c1"))
        .await
        .expect_err("missing conversation");

    match err {
        ApiError::Http { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "Conversation not found");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    refresh.assert_async().await;
}

#[tokio::test]
async fn test_401_refreshes_and_replays() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/auth/me")
        .match_header("Authorization", "Bearer access-1")
        .with_status(401)
        .create_async()
        .await;
    let replay = server
        .mock("GET", "/auth/me")
        .match_header("Authorization", "Bearer access-2")
        .with_status(200)
        .with_body(r#"{"id": "u1", "email": "ada@example.com"}"#)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", REFRESH_PATH)
        .match_header("Authorization", Matcher::Missing)
        .match_body(Matcher::Json(json!({"refresh_token": "refresh-1"})))
        .with_status(200)
        .with_body(refresh_body("access-2"))
        .expect(1)
        .create_async()
        .await;

    let store = signed_in("access-1", Some("refresh-1"));
    let client = SessionClient::new(&server.url(), store.clone());

    let user: Value = client
        .send_json(ApiRequest::get("/auth/me"))
        .await
        .expect("replayed request");

    assert_eq!(user["email"], "ada@example.com");
    let credential = store.get();
    assert_eq!(credential.access_token.as_deref(), Some("access-2"));
    assert_eq!(credential.refresh_token.as_deref(), Some("refresh-2"));
    assert!(!client.is_refreshing());
    refresh.assert_async().await;
    replay.assert_async().await;
}

#[tokio::test]
async fn test_401_without_refresh_token_propagates() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/notes")
        .with_status(401)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", REFRESH_PATH)
        .expect(0)
        .create_async()
        .await;

    let store = signed_in("access-1", None);
    let client = SessionClient::new(&server.url(), store.clone());

    let err = client
        .send(ApiRequest::get("/notes"))
        .await
        .expect_err("no refresh token");

    assert!(matches!(err, ApiError::Unauthorized));
    assert_eq!(store.clears.load(Ordering::SeqCst), 0);
    refresh.assert_async().await;
}

#[tokio::test]
async fn test_auth_flow_401_never_refreshes() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/auth/login")
        .with_status(401)
        .with_body(r#"{"detail": "Incorrect email or password"}"#)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", REFRESH_PATH)
        .expect(0)
        .create_async()
        .await;

    let client = SessionClient::new(&server.url(), signed_in("access-1", Some("refresh-1")));
    let err = client
        .send(ApiRequest::post("/auth/login").auth_flow())
        .await
        .expect_err("bad password");

    match err {
        ApiError::Http { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Incorrect email or password");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    refresh.assert_async().await;
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    const REQUESTS: usize = 6;

    let first_attempts = Arc::new(Mutex::new(Vec::<String>::new()));
    let replayed = Arc::new(Mutex::new(Vec::<String>::new()));

    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", Matcher::Regex(r"^/conversations/c\d+$".to_string()))
        .match_header("Authorization", "Bearer access-1")
        .with_status(401)
        .with_body_from_request(record_path(first_attempts.clone(), b""))
        .expect(REQUESTS)
        .create_async()
        .await;
    let replays = server
        .mock("GET", Matcher::Regex(r"^/conversations/c\d+$".to_string()))
        .match_header("Authorization", "Bearer access-2")
        .with_status(200)
        .with_body_from_request(record_path(replayed.clone(), b"{}"))
        .expect(REQUESTS)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", REFRESH_PATH)
        .with_status(200)
        .with_body(refresh_body("access-2"))
        .expect(1)
        .create_async()
        .await;

    let store = signed_in("access-1", Some("refresh-1"));
    let client = SessionClient::new(&server.url(), store.clone());

    let requests = (0..REQUESTS)
        .map(|i| client.send_empty(ApiRequest::get(format!("/conversations/c{i}"))))
        .collect::<Vec<_>>();
    let results = futures::future::join_all(requests).await;

    for result in results {
        result.expect("every request is replayed");
    }
    assert_eq!(store.get().access_token.as_deref(), Some("access-2"));
    refresh.assert_async().await;
    replays.assert_async().await;

    let first_attempts = first_attempts.lock().clone();
    let replayed = replayed.lock().clone();
    assert_eq!(first_attempts.len(), REQUESTS);
    assert_eq!(replayed, first_attempts, "replays keep the original order");
}

/// Mock body callback that logs the request path before answering.
fn record_path(
    log: Arc<Mutex<Vec<String>>>,
    body: &'static [u8],
) -> impl Fn(&mockito::Request) -> Vec<u8> + Send + Sync + 'static {
    move |request| {
        log.lock().push(request.path().to_string());
        body.to_vec()
    }
}

#[tokio::test]
async fn test_refresh_failure_rejects_all_and_clears_once() {
    const REQUESTS: usize = 4;

    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", Matcher::Regex(r"^/tasks/t\d+$".to_string()))
        .with_status(401)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", REFRESH_PATH)
        .with_status(401)
        .with_body(r#"{"detail": "Refresh token expired"}"#)
        .expect(1)
        .create_async()
        .await;

    let store = signed_in("access-1", Some("refresh-1"));
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let client = SessionClient::new(&server.url(), store.clone()).with_event_tx(Arc::new(tx));

    let requests = (0..REQUESTS)
        .map(|i| client.send_empty(ApiRequest::get(format!("/tasks/t{i}"))))
        .collect::<Vec<_>>();
    let results = futures::future::join_all(requests).await;

    for result in results {
        let err = result.expect_err("refresh failed");
        assert!(err.is_auth_failure(), "unexpected error: {err:?}");
    }
    assert_eq!(store.clears.load(Ordering::SeqCst), 1);
    assert_eq!(store.get(), Credential::default());
    assert!(matches!(rx.try_recv(), Ok(Event::SessionExpired)));
    assert!(rx.try_recv().is_err(), "session expiry is announced once");
    refresh.assert_async().await;
}

#[tokio::test]
async fn test_refresh_rejection_carries_backend_message() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/notes")
        .with_status(401)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", REFRESH_PATH)
        .with_status(401)
        .with_body(r#"{"detail": "Refresh token expired"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = SessionClient::new(&server.url(), signed_in("access-1", Some("refresh-1")));
    let err = client
        .send(ApiRequest::get("/notes"))
        .await
        .expect_err("refresh rejected");

    match err {
        ApiError::Refresh(RefreshError::Rejected(message)) => {
            assert!(message.contains("Refresh token expired"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    refresh.assert_async().await;
}

#[tokio::test]
async fn test_replay_rejected_again_is_unauthorized() {
    let mut server = mockito::Server::new_async().await;
    let rejected = server
        .mock("GET", "/notes")
        .with_status(401)
        .expect(2)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", REFRESH_PATH)
        .with_status(200)
        .with_body(refresh_body("access-2"))
        .expect(1)
        .create_async()
        .await;

    let client = SessionClient::new(&server.url(), signed_in("access-1", Some("refresh-1")));
    let err = client
        .send(ApiRequest::get("/notes"))
        .await
        .expect_err("replay rejected");

    assert!(matches!(err, ApiError::Unauthorized));
    rejected.assert_async().await;
    refresh.assert_async().await;
}

#[tokio::test]
async fn test_stale_token_is_replayed_without_refresh() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/notes")
        .match_header("Authorization", "Bearer access-1")
        .with_status(401)
        .create_async()
        .await;
    let replay = server
        .mock("GET", "/notes")
        .match_header("Authorization", "Bearer access-2")
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", REFRESH_PATH)
        .expect(0)
        .create_async()
        .await;

    let store = signed_in("access-1", Some("refresh-1"));
    let client = SessionClient::new(&server.url(), store.clone());

    // Another caller refreshed before this request's rejection arrived
    let request = client.send_empty(ApiRequest::get("/notes"));
    tokio::pin!(request);
    assert!(futures::poll!(&mut request).is_pending());
    store.set(Credential {
        access_token: Some("access-2".to_string()),
        refresh_token: Some("refresh-2".to_string()),
        user: None,
    });

    request.await.expect("replayed with the stored token");
    replay.assert_async().await;
    refresh.assert_async().await;
}
