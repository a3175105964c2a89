//! Test utilities: a local hub, a mock GitHub hooks API, and captured output.

#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use hookrelay::github::{Hook, HookConfig};
use hookrelay::hub::{self, Hub};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::AsyncWrite;
use tokio::net::TcpListener;

/// Token the mock API accepts.
pub const TEST_TOKEN: &str = "test-token";

/// Start a hub on a loopback port. Returns its base URL and registry.
pub async fn spawn_hub() -> (String, Arc<Hub>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hub = Arc::new(Hub::new());

    let served = Arc::clone(&hub);
    tokio::spawn(async move {
        hub::serve(listener, served, std::future::pending()).await.unwrap();
    });

    (format!("http://{addr}"), hub)
}

/// Poll `hub` until it holds exactly `n` subscribers. Panics after 5 seconds.
pub async fn wait_for_subscribers(hub: &Hub, n: usize) {
    for _ in 0..500 {
        if hub.subscriber_count().await == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {n} subscribers, hub has {}",
        hub.subscriber_count().await
    );
}

/// Poll `check` until it returns true. Panics after 5 seconds.
pub async fn wait_until<F: FnMut() -> bool>(what: &str, mut check: F) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// POST a delivery to the hub the way GitHub would.
pub async fn post_delivery(url: &str, event: &str, body: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(url)
        .header("Content-Type", "application/json")
        .header("X-GitHub-Delivery", "72d3162e-cc78-11e3-81ab-4c9367dc0958")
        .header("X-GitHub-Event", event)
        .body(body.to_string())
        .send()
        .await
        .unwrap()
}

/// In-memory stand-in for the repository hooks API.
#[derive(Debug, Default)]
pub struct MockGithub {
    pub hooks: Mutex<Vec<Hook>>,
    /// Bodies of create requests, in order.
    pub created: Mutex<Vec<Value>>,
    /// Ids passed to delete requests, in order, found or not.
    pub deleted: Mutex<Vec<u64>>,
    /// Authorization headers seen.
    pub auth: Mutex<Vec<String>>,
    pub list_requests: AtomicUsize,
    next_id: AtomicU64,
}

impl MockGithub {
    /// A mock holding hooks with the given ids and URLs. New hooks get ids
    /// from 1000 up.
    pub fn with_hooks(hooks: &[(u64, &str)]) -> Arc<Self> {
        let hooks = hooks
            .iter()
            .map(|(id, url)| hook(*id, url))
            .collect::<Vec<_>>();

        Arc::new(Self {
            hooks: Mutex::new(hooks),
            next_id: AtomicU64::new(1000),
            ..Default::default()
        })
    }

    pub fn hook_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.hooks.lock().unwrap().iter().map(|h| h.id).collect();
        ids.sort_unstable();
        ids
    }

    pub fn deleted_ids(&self) -> Vec<u64> {
        let mut ids = self.deleted.lock().unwrap().clone();
        ids.sort_unstable();
        ids
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let value = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let ok = value == format!("Bearer {TEST_TOKEN}");
        self.auth.lock().unwrap().push(value);
        ok
    }
}

pub fn hook(id: u64, url: &str) -> Hook {
    Hook {
        id,
        name: "web".to_string(),
        active: true,
        events: vec!["*".to_string()],
        config: HookConfig {
            url: Some(url.to_string()),
            content_type: Some("json".to_string()),
        },
    }
}

/// Serve `mock` on a loopback port and return its base URL.
pub async fn spawn_github(mock: Arc<MockGithub>) -> String {
    let app = Router::new()
        .route(
            "/repos/{owner}/{repo}/hooks",
            get(list_hooks).post(create_hook),
        )
        .route("/repos/{owner}/{repo}/hooks/{id}", delete(delete_hook))
        .with_state(mock);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "message": "Bad credentials" })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<usize>,
    per_page: Option<usize>,
}

async fn list_hooks(
    State(mock): State<Arc<MockGithub>>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> Response {
    if !mock.authorized(&headers) {
        return unauthorized();
    }
    mock.list_requests.fetch_add(1, Ordering::SeqCst);

    let per_page = query.per_page.unwrap_or(30);
    let page = query.page.unwrap_or(1).max(1);
    let hooks: Vec<Hook> = mock
        .hooks
        .lock()
        .unwrap()
        .iter()
        .skip((page - 1) * per_page)
        .take(per_page)
        .cloned()
        .collect();

    Json(hooks).into_response()
}

async fn create_hook(
    State(mock): State<Arc<MockGithub>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !mock.authorized(&headers) {
        return unauthorized();
    }

    let id = mock.next_id.fetch_add(1, Ordering::SeqCst);
    let url = body["config"]["url"].as_str().unwrap_or_default().to_string();
    let created = hook(id, &url);

    mock.created.lock().unwrap().push(body);
    mock.hooks.lock().unwrap().push(created.clone());

    (StatusCode::CREATED, Json(created)).into_response()
}

async fn delete_hook(
    State(mock): State<Arc<MockGithub>>,
    headers: HeaderMap,
    Path((_owner, _repo, id)): Path<(String, String, u64)>,
) -> Response {
    if !mock.authorized(&headers) {
        return unauthorized();
    }
    mock.deleted.lock().unwrap().push(id);

    let mut hooks = mock.hooks.lock().unwrap();
    let before = hooks.len();
    hooks.retain(|h| h.id != id);
    if hooks.len() == before {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "Not Found" })),
        )
            .into_response();
    }

    StatusCode::NO_CONTENT.into_response()
}

/// Cloneable in-memory writer for capturing agent output.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
