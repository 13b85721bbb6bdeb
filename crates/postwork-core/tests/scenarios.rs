//! End-to-end scenarios over the in-memory adapters: HTTP in, worker out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use postwork_core::domain::{Message, MessageId, QueueMessage, Status};
use postwork_core::impls::{InMemoryBroker, InMemoryStore, RecordingMailer};
use postwork_core::ports::{MailError, Mailer};
use postwork_core::{App, AppBuilder, ServiceConfig};
use rstest::rstest;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct Env {
    broker: InMemoryBroker,
    store: InMemoryStore,
    app: App,
}

impl Env {
    async fn start(mailer: Arc<dyn Mailer>) -> Self {
        Self::start_with(InMemoryBroker::new(), InMemoryStore::new(), mailer).await
    }

    async fn start_with(
        broker: InMemoryBroker,
        store: InMemoryStore,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let app = AppBuilder::new()
            .with_producer(broker.producer_connector())
            .with_database(store.connector())
            .with_consumer(broker.stream_connector())
            .with_mailer(mailer)
            .with_config(ServiceConfig::default().with_transport_attempts(1))
            .start(&CancellationToken::new())
            .await
            .unwrap();
        // let the worker install the first subscription
        settle().await;
        Self { broker, store, app }
    }

    fn router(&self) -> Router {
        self.app.api_router().unwrap()
    }

    async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn post(&self) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/messages")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from("to=a%40x.com&from=b%40x.com&text=hi&subject=s"))
            .unwrap();
        self.call(request).await
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.call(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn seed(&self) -> MessageId {
        let stored = self
            .app
            .database()
            .insert_message(Message::new("s", "hi", "b@x.com", "a@x.com"))
            .await
            .unwrap();
        stored.id.unwrap()
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[rstest]
#[case(None, "DELIVERED")]
#[case(Some(MailError::Rejected("550 mailbox unavailable".into())), "UN-DELIVERABLE")]
#[tokio::test(start_paused = true)]
async fn posted_message_reaches_a_final_status(
    #[case] failure: Option<MailError>,
    #[case] expected: &str,
) {
    let mailer = Arc::new(RecordingMailer::new());
    mailer.fail_with(failure);
    let env = Env::start(mailer.clone()).await;

    let (status, body) = env.post().await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Queued, Thank you.");
    let id = body["id"].as_str().unwrap().to_string();
    assert_eq!(id.len(), 26);

    settle().await;
    let (status, body) = env.get(&format!("/messages/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], expected);
    assert_eq!(mailer.calls(), 1);
    assert_eq!(env.app.metrics().request_count("POST", "/messages"), 1);
    env.app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unknown_id_is_404_and_short_id_is_400_without_storage_access() {
    let env = Env::start(Arc::new(RecordingMailer::new())).await;

    let (status, _) = env.get(&format!("/messages/{}", MessageId::random())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let reads = env.store.reads();
    let (status, _) = env.get("/messages/0123456789").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(env.store.reads(), reads);
    env.app.shutdown().await;
}

/// Takes the store down while "sending", so the final status write has to
/// survive a dropped session.
struct StoreDroppingMailer {
    store: InMemoryStore,
}

#[async_trait]
impl Mailer for StoreDroppingMailer {
    async fn send(&self, _message: &Message) -> Result<(), MailError> {
        self.store.set_available(false);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn status_update_survives_a_dropped_session() {
    let broker = InMemoryBroker::new();
    let store = InMemoryStore::new();
    let mailer = Arc::new(StoreDroppingMailer {
        store: store.clone(),
    });
    let env = Env::start_with(broker, store, mailer).await;
    let connects = env.store.connects();
    let id = env.seed().await;

    env.broker.publish(QueueMessage::email(&id).to_bytes().unwrap());
    tokio::time::sleep(Duration::from_millis(3500)).await;

    // still retrying, the pending value is not lost
    assert_eq!(env.store.get(&id).unwrap().status, Status::Sending);

    env.store.set_available(true);
    tokio::time::sleep(Duration::from_millis(2100)).await;

    assert_eq!(env.store.get(&id).unwrap().status, Status::Delivered);
    assert_eq!(
        env.store.status_history(&id),
        vec![Status::New, Status::Sending, Status::Delivered]
    );
    assert!(env.store.connects() > connects, "supervisor must republish a session");
    assert!(env.app.database().is_connected());
    env.app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_payload_is_skipped_without_storage_access() {
    let mailer = Arc::new(RecordingMailer::new());
    let env = Env::start(mailer.clone()).await;
    let id = env.seed().await;
    let reads = env.store.reads();

    env.broker.publish(b"<<not json>>".to_vec());
    settle().await;
    assert_eq!(env.store.reads(), reads);

    env.broker.publish(QueueMessage::email(&id).to_bytes().unwrap());
    settle().await;
    assert_eq!(env.store.get(&id).unwrap().status, Status::Delivered);
    assert_eq!(mailer.calls(), 1);
    env.app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn redelivery_of_a_finished_message_changes_nothing() {
    let mailer = Arc::new(RecordingMailer::new());
    let env = Env::start(mailer.clone()).await;
    let id = env.seed().await;
    let envelope = QueueMessage::email(&id).to_bytes().unwrap();

    env.broker.publish(envelope.clone());
    settle().await;
    env.broker.publish(envelope);
    settle().await;

    assert_eq!(
        env.store.status_history(&id),
        vec![Status::New, Status::Sending, Status::Delivered]
    );
    assert_eq!(mailer.calls(), 1);
    env.app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pings_never_touch_storage() {
    let mailer = Arc::new(RecordingMailer::new());
    let env = Env::start(mailer.clone()).await;
    let id = env.seed().await;
    let reads = env.store.reads();

    let (status, body) = env.get("/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
    env.broker.publish(br#"{"id":"","type":"ping"}"#.to_vec());
    settle().await;

    assert_eq!(env.broker.published().len(), 2);
    assert_eq!(env.store.reads(), reads);
    assert_eq!(env.store.status_history(&id), vec![Status::New]);
    assert_eq!(mailer.calls(), 0);
    env.app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn start_returns_with_dependencies_down_and_fails_fast() {
    let broker = InMemoryBroker::new();
    let store = InMemoryStore::new();
    broker.set_available(false);
    store.set_available(false);
    let env = Env::start_with(broker, store, Arc::new(RecordingMailer::new())).await;

    assert!(!env.app.database().is_connected());
    assert!(!env.app.producer().unwrap().is_connected());

    let started = tokio::time::Instant::now();
    let (status, _) = env.post().await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let (status, _) = env.get(&format!("/messages/{}", MessageId::random())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let (status, body) = env.get("/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["ready"], false);
    assert_eq!(started.elapsed(), Duration::ZERO);

    // both come back on their own once reachable
    env.broker.set_available(true);
    env.store.set_available(true);
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert!(env.app.database().is_connected());
    assert!(env.app.producer().unwrap().is_connected());
    assert!(env.app.consumer().unwrap().is_connected());

    let (status, _) = env.post().await;
    assert_eq!(status, StatusCode::OK);
    env.app.shutdown().await;
}
