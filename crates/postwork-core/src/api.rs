//! HTTP API.
//!
//! | route                | process | behavior                                   |
//! |----------------------|---------|--------------------------------------------|
//! | `POST /messages`     | api     | validate, persist as NEW, enqueue `email`  |
//! | `GET /messages/{id}` | api     | load one message                           |
//! | `GET /healthz`       | both    | readiness of the process' dependencies     |
//! | `GET /metrics`       | api     | request count, latency, internal errors    |
//!
//! Errors are JSON `{"error": "..."}`. Storage or broker failures map to 503
//! when the dependency is unreachable and 500 otherwise.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::rejection::FormRejection;
use axum::extract::{Form, MatchedPath, Path, Request, State};
use axum::http::{StatusCode, Uri, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::app::{ConsumerManager, DatabaseManager, ProducerManager};
use crate::domain::{Message, MessageId, NewMessageResponse, QueueMessage};
use crate::error::{Error, ErrorKind};
use crate::observability::{HealthReport, HttpMetrics};

/// Every request must complete within this.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

pub const QUEUED_REPLY: &str = "Queued, Thank you.";

/// Endpoint label for requests no route matched.
const UNMATCHED: &str = "unmatched";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Backend(#[from] Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Backend(err) => match err.kind() {
                ErrorKind::Connection => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::BadRequest(message) => message.clone(),
            ApiError::Backend(err) => err.message().to_string(),
        };
        if status.is_server_error() {
            warn!(component = "api", %status, error = %self, "request failed");
        }
        let mut response = (status, Json(json!({ "error": message }))).into_response();
        if let ApiError::Backend(err) = &self
            && status.is_server_error()
        {
            response.extensions_mut().insert(err.kind());
        }
        response
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub producer: Arc<ProducerManager>,
    pub database: Arc<DatabaseManager>,
    pub metrics: Arc<HttpMetrics>,
}

#[derive(Clone)]
pub struct WorkerState {
    pub consumer: Arc<ConsumerManager>,
    pub database: Arc<DatabaseManager>,
}

/// Form body of `POST /messages`. Missing fields are empty and fail
/// validation.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NewMessageForm {
    pub subject: String,
    pub text: String,
    pub from: String,
    pub to: String,
}

pub fn router(state: ApiState) -> Router {
    let metrics = Arc::clone(&state.metrics);
    Router::new()
        .route("/messages", post(new_message))
        .route("/messages/{id}", get(get_message))
        .route("/healthz", get(api_health))
        .route("/metrics", get(metrics_text))
        .fallback(not_found)
        .with_state(state)
        .layer(middleware::from_fn_with_state(metrics, track_requests))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
}

pub fn worker_router(state: WorkerState) -> Router {
    Router::new()
        .route("/healthz", get(worker_health))
        .fallback(not_found)
        .with_state(state)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
}

async fn new_message(
    State(state): State<ApiState>,
    form: Result<Form<NewMessageForm>, FormRejection>,
) -> Result<Json<NewMessageResponse>, ApiError> {
    let Form(form) = form.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let message = Message::new(form.subject, form.text, form.from, form.to);
    message
        .validate()
        .map_err(|err| ApiError::BadRequest(err.message().to_string()))?;

    let stored = state.database.insert_message(message).await?;
    let id = stored
        .id
        .ok_or_else(|| Error::internal("stored message has no id"))?;
    state.producer.send(&QueueMessage::email(&id)).await?;

    info!(component = "api", message_id = %id, "message queued");
    Ok(Json(NewMessageResponse {
        id,
        message: QUEUED_REPLY.to_string(),
    }))
}

async fn get_message(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Message>, ApiError> {
    let id =
        MessageId::parse(&id).map_err(|err| ApiError::BadRequest(err.message().to_string()))?;
    let message = state.database.get_message(&id).await?;
    Ok(Json(message))
}

async fn api_health(State(state): State<ApiState>) -> Response {
    let producer = match state.producer.send(&QueueMessage::ping()).await {
        Ok(()) => true,
        Err(err) => {
            warn!(component = "api", error = %err, "health ping failed");
            false
        }
    };
    health_response(HealthReport::api(producer, state.database.is_connected()))
}

async fn worker_health(State(state): State<WorkerState>) -> Response {
    health_response(HealthReport::worker(
        state.consumer.is_connected(),
        state.database.is_connected(),
    ))
}

fn health_response(report: HealthReport) -> Response {
    let status = if report.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

async fn metrics_text(State(state): State<ApiState>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}

/// Count and time every request; count 5xx backend failures by kind.
async fn track_requests(
    State(metrics): State<Arc<HttpMetrics>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map_or(UNMATCHED, MatchedPath::as_str)
        .to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    metrics.record_request(&method, &endpoint, started.elapsed());
    if let Some(kind) = response.extensions().get::<ErrorKind>() {
        metrics.record_internal_error(*kind, &method);
    }
    response
}

async fn not_found(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("Path '{}' Not Found", uri.path()) })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Status;
    use crate::impls::{InMemoryBroker, InMemoryStore};
    use crate::ports::RandomIdGenerator;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    struct Fixture {
        broker: InMemoryBroker,
        store: InMemoryStore,
        state: ApiState,
    }

    async fn fixture() -> Fixture {
        let broker = InMemoryBroker::new();
        let store = InMemoryStore::new();
        let token = CancellationToken::new();
        let producer =
            ProducerManager::start(broker.producer_connector(), Duration::from_secs(2), &token)
                .await;
        let database = DatabaseManager::start(
            store.connector(),
            Arc::new(RandomIdGenerator),
            true,
            Duration::from_secs(1),
            &token,
        )
        .await;
        Fixture {
            broker,
            store,
            state: ApiState {
                producer: Arc::new(producer),
                database: Arc::new(database),
                metrics: Arc::new(HttpMetrics::new()),
            },
        }
    }

    async fn call(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn post_form(body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/messages")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn post_persists_and_enqueues() {
        let f = fixture().await;
        let (status, body) = call(
            router(f.state.clone()),
            post_form("subject=hi&text=hello&from=a%40x.com&to=Derrick+%3Cb%40x.com%3E"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], QUEUED_REPLY);
        let id = MessageId::parse(body["id"].as_str().unwrap()).unwrap();

        let stored = f.store.get(&id).unwrap();
        assert_eq!(stored.status, Status::New);
        assert_eq!(stored.to, "Derrick <b@x.com>");

        let published = f.broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(QueueMessage::from_bytes(&published[0]).unwrap(), QueueMessage::email(&id));
    }

    #[tokio::test]
    async fn post_rejects_bad_addresses_before_storage() {
        let f = fixture().await;
        let (status, body) = call(
            router(f.state.clone()),
            post_form("subject=hi&text=hello&from=derrick+at+google.com&to=b%40x.com"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("From:"));
        assert!(f.store.is_empty());
        assert!(f.broker.published().is_empty());
    }

    #[tokio::test]
    async fn post_with_store_down_is_unavailable() {
        let f = fixture().await;
        f.store.set_available(false);
        let (status, body) = call(
            router(f.state.clone()),
            post_form("subject=hi&text=hello&from=a%40x.com&to=b%40x.com"),
        )
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn get_checks_id_length_first() {
        let f = fixture().await;
        let reads = f.store.reads();
        let (status, _) = call(router(f.state.clone()), get("/messages/short")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(f.store.reads(), reads);
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let f = fixture().await;
        let uri = format!("/messages/{}", MessageId::random());
        let (status, body) = call(router(f.state.clone()), get(&uri)).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn get_returns_stored_message() {
        let f = fixture().await;
        let stored = f
            .state
            .database
            .insert_message(Message::new("s", "t", "a@x.com", "b@x.com"))
            .await
            .unwrap();
        let id = stored.id.clone().unwrap();

        let (status, body) = call(router(f.state.clone()), get(&format!("/messages/{id}"))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], id.as_str());
        assert_eq!(body["recipients"], "b@x.com");
        assert_eq!(body["status"], "NEW");
    }

    #[tokio::test]
    async fn healthz_reflects_dependencies() {
        let f = fixture().await;
        let (status, body) = call(router(f.state.clone()), get("/healthz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], true);

        f.broker.set_available(false);
        let (status, body) = call(router(f.state.clone()), get("/healthz")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["ready"], false);
    }

    #[tokio::test]
    async fn unknown_path_is_json_404() {
        let f = fixture().await;
        let (status, body) = call(router(f.state.clone()), get("/nope")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Path '/nope' Not Found");
    }

    #[tokio::test]
    async fn worker_healthz_needs_consumer_and_database() {
        let f = fixture().await;
        let consumer = ConsumerManager::start(
            f.broker.stream_connector(),
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await;
        let state = WorkerState {
            consumer: Arc::new(consumer),
            database: Arc::clone(&f.state.database),
        };

        let (status, _) = call(worker_router(state.clone()), get("/healthz")).await;
        assert_eq!(status, StatusCode::OK);

        f.broker.set_available(false);
        state.consumer.signal();
        let (status, body) = call(worker_router(state), get("/healthz")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["consumer"], false);
    }

    #[tokio::test]
    async fn metrics_count_requests_per_route() {
        let f = fixture().await;
        let id = MessageId::random();
        call(router(f.state.clone()), get("/healthz")).await;
        call(router(f.state.clone()), get(&format!("/messages/{id}"))).await;
        call(router(f.state.clone()), get("/nope")).await;

        let metrics = &f.state.metrics;
        assert_eq!(metrics.request_count("GET", "/healthz"), 1);
        assert_eq!(metrics.request_count("GET", "/messages/{id}"), 1);
        assert_eq!(metrics.request_count("GET", "unmatched"), 1);

        let response = router(f.state.clone())
            .oneshot(get("/metrics"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains(r#"api_http_request_count{method="GET",endpoint="/healthz"} 1"#));
        assert!(text.contains("# TYPE api_http_request_latency summary"));
    }

    #[tokio::test]
    async fn backend_failures_count_as_internal_errors() {
        let f = fixture().await;
        f.store.set_available(false);
        let (status, _) = call(
            router(f.state.clone()),
            post_form("subject=hi&text=hello&from=a%40x.com&to=b%40x.com"),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        // a rejected form is a client error, not an internal one
        call(
            router(f.state.clone()),
            post_form("subject=hi&text=hello&from=derrick+at+google.com&to=b%40x.com"),
        )
        .await;

        let metrics = &f.state.metrics;
        assert_eq!(metrics.internal_error_count(ErrorKind::Connection, "POST"), 1);
        assert_eq!(metrics.internal_error_count(ErrorKind::Validation, "POST"), 0);
        assert_eq!(metrics.request_count("POST", "/messages"), 2);
    }
}
