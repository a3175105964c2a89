//! Forwarding deliveries to a local endpoint.

use std::sync::{Arc, Mutex};

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
};
use hookrelay::agent::{DispatchOptions, DispatchOutcome, Dispatcher, Forwarder};
use hookrelay_protocol::DeliveryEnvelope;
use tokio::net::TcpListener;

mod common;
use common::{SharedBuffer, wait_until};

#[derive(Debug, Clone)]
struct Received {
    headers: HeaderMap,
    body: Bytes,
}

type Inbox = Arc<Mutex<Vec<Received>>>;

async fn record(State(inbox): State<Inbox>, headers: HeaderMap, body: Bytes) -> StatusCode {
    inbox.lock().unwrap().push(Received { headers, body });
    StatusCode::ACCEPTED
}

async fn spawn_receiver() -> (String, Inbox) {
    let inbox: Inbox = Arc::default();
    let app = Router::new()
        .route("/hook", post(record))
        .with_state(Arc::clone(&inbox));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/hook"), inbox)
}

fn header<'a>(received: &'a Received, name: &str) -> &'a str {
    received.headers.get(name).unwrap().to_str().unwrap()
}

#[tokio::test]
async fn test_forward_request_shape() {
    let (url, inbox) = spawn_receiver().await;
    let forwarder = Forwarder::new(&url).unwrap();
    let frame = r#"{"event":"push","payload":{"ref": "refs/heads/main"}}"#;
    let envelope = DeliveryEnvelope::from_frame(frame).unwrap();

    let status = forwarder.forward(&envelope).await.unwrap();
    assert_eq!(status, reqwest::StatusCode::ACCEPTED);

    let received = inbox.lock().unwrap()[0].clone();
    assert_eq!(header(&received, "content-type"), "application/json");
    assert_eq!(header(&received, "x-github-event"), "push");
    assert!(uuid::Uuid::parse_str(header(&received, "x-github-delivery")).is_ok());
    // The payload is passed through byte for byte.
    assert_eq!(&received.body[..], br#"{"ref": "refs/heads/main"}"#);
}

#[tokio::test]
async fn test_each_forward_gets_a_fresh_delivery_id() {
    let (url, inbox) = spawn_receiver().await;
    let forwarder = Forwarder::new(&url).unwrap();
    let envelope = DeliveryEnvelope::from_frame(r#"{"event":"ping","payload":{}}"#).unwrap();

    forwarder.forward(&envelope).await.unwrap();
    forwarder.forward(&envelope).await.unwrap();

    let inbox = inbox.lock().unwrap();
    assert_ne!(
        header(&inbox[0], "x-github-delivery"),
        header(&inbox[1], "x-github-delivery")
    );
}

#[tokio::test]
async fn test_dispatcher_prints_and_forwards() {
    let (url, inbox) = spawn_receiver().await;
    let out = SharedBuffer::default();
    let options = DispatchOptions {
        pretty: true,
        forward_url: Some(url),
        ..Default::default()
    };
    let mut dispatcher = Dispatcher::new(options, Box::new(out.clone())).unwrap();

    let frame = r#"{"event":"issues","payload":{"action":"opened","number":7}}"#;
    let envelope = DeliveryEnvelope::from_frame(frame).unwrap();
    let outcome = dispatcher.dispatch(frame, envelope).await;

    assert_eq!(
        outcome,
        DispatchOutcome::Delivered {
            saved: None,
            forwarded: true
        }
    );
    assert_eq!(
        out.contents(),
        "{\n  \"event\": \"issues\",\n  \"payload\": {\n    \"action\": \"opened\",\n    \"number\": 7\n  }\n}\n"
    );

    wait_until("forwarded request", || !inbox.lock().unwrap().is_empty()).await;
    let received = inbox.lock().unwrap()[0].clone();
    assert_eq!(header(&received, "x-github-event"), "issues");
    assert_eq!(&received.body[..], br#"{"action":"opened","number":7}"#);
}

#[tokio::test]
async fn test_unreachable_forward_target_is_not_fatal() {
    let out = SharedBuffer::default();
    let options = DispatchOptions {
        forward_url: Some("http://127.0.0.1:9/hook".to_string()),
        ..Default::default()
    };
    let mut dispatcher = Dispatcher::new(options, Box::new(out.clone())).unwrap();

    let frame = r#"{"event":"push","payload":{}}"#;
    let envelope = DeliveryEnvelope::from_frame(frame).unwrap();
    dispatcher.dispatch(frame, envelope).await;

    assert_eq!(out.contents(), format!("{frame}\n"));
}
