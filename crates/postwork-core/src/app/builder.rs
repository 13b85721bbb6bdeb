//! AppBuilder - wires managers, worker and HTTP routers together.
//!
//! # Roles
//! - **api**: producer + store
//! - **worker**: consumer + store + mailer
//! - **standalone**: all of the above in one process
//!
//! # Fail-fast
//! `start()` checks the combination of components before anything is
//! spawned and returns a [`BuildError`] naming what is missing.

use std::sync::Arc;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::consumer::ConsumerManager;
use super::database::DatabaseManager;
use super::producer::ProducerManager;
use super::worker_loop::{Worker, WorkerHandle};
use crate::api::{self, ApiState, WorkerState};
use crate::config::ServiceConfig;
use crate::observability::HttpMetrics;
use crate::ports::{
    IdGenerator, Mailer, ProducerConnector, RandomIdGenerator, StoreConnector, StreamConnector,
};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing component: {0}. It is required by the configured role.")]
    MissingComponent(&'static str),

    #[error("Nothing to run: configure a producer (api role) or a consumer (worker role).")]
    NoRole,
}

/// Collects connectors and settings, then starts everything once.
///
/// ```ignore
/// let app = AppBuilder::new()
///     .with_database(store.connector())
///     .with_producer(broker.producer_connector())
///     .start(&token)
///     .await?;
/// ```
pub struct AppBuilder {
    producer: Option<ProducerConnector>,
    database: Option<StoreConnector>,
    consumer: Option<Arc<dyn StreamConnector>>,
    mailer: Option<Arc<dyn Mailer>>,
    ids: Arc<dyn IdGenerator>,
    config: ServiceConfig,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            producer: None,
            database: None,
            consumer: None,
            mailer: None,
            ids: Arc::new(RandomIdGenerator),
            config: ServiceConfig::default(),
        }
    }

    pub fn with_producer(mut self, connector: ProducerConnector) -> Self {
        self.producer = Some(connector);
        self
    }

    pub fn with_database(mut self, connector: StoreConnector) -> Self {
        self.database = Some(connector);
        self
    }

    pub fn with_consumer(mut self, connector: Arc<dyn StreamConnector>) -> Self {
        self.consumer = Some(connector);
        self
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    fn validate(&self) -> Result<(), BuildError> {
        if self.producer.is_none() && self.consumer.is_none() {
            return Err(BuildError::NoRole);
        }
        if self.database.is_none() {
            return Err(BuildError::MissingComponent("database"));
        }
        if self.consumer.is_some() && self.mailer.is_none() {
            return Err(BuildError::MissingComponent("mailer"));
        }
        Ok(())
    }

    /// Start every configured manager, then the worker when a consumer is
    /// configured. Returns once each manager finished its first attempt.
    pub async fn start(self, token: &CancellationToken) -> Result<App, BuildError> {
        self.validate()?;
        let Self {
            producer,
            database,
            consumer,
            mailer,
            ids,
            config,
        } = self;
        let database = database.ok_or(BuildError::MissingComponent("database"))?;
        let token = token.child_token();

        let database = Arc::new(
            DatabaseManager::start(
                database,
                ids,
                config.auto_create_schema,
                config.database_backoff,
                &token,
            )
            .await,
        );

        let producer = match producer {
            Some(connector) => Some(Arc::new(
                ProducerManager::start(connector, config.producer_backoff, &token).await,
            )),
            None => None,
        };

        let (consumer, worker) = match consumer {
            Some(connector) => {
                let mailer = mailer.ok_or(BuildError::MissingComponent("mailer"))?;

                let consumer = Arc::new(
                    ConsumerManager::start(connector, config.consumer_backoff, &token).await,
                );
                let subscriptions = consumer
                    .take_subscriptions()
                    .ok_or(BuildError::MissingComponent("consumer hand-off"))?;
                let worker = Worker::new(
                    subscriptions,
                    Arc::clone(&consumer),
                    Arc::clone(&database),
                    mailer,
                    config.status_retry_interval,
                )
                .with_transport_retry(config.transport_attempts, config.transport_retry.clone())
                .spawn(&token);
                (Some(consumer), Some(worker))
            }
            None => (None, None),
        };

        info!(
            component = "app",
            api = producer.is_some(),
            worker = worker.is_some(),
            "started"
        );
        Ok(App {
            token,
            metrics: Arc::new(HttpMetrics::new()),
            producer,
            database,
            consumer,
            worker,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Running managers and worker.
pub struct App {
    token: CancellationToken,
    metrics: Arc<HttpMetrics>,
    producer: Option<Arc<ProducerManager>>,
    database: Arc<DatabaseManager>,
    consumer: Option<Arc<ConsumerManager>>,
    worker: Option<WorkerHandle>,
}

impl App {
    /// Message API; `None` without a producer.
    pub fn api_router(&self) -> Option<Router> {
        let producer = self.producer.clone()?;
        Some(api::router(ApiState {
            producer,
            database: Arc::clone(&self.database),
            metrics: Arc::clone(&self.metrics),
        }))
    }

    /// Worker health endpoint; `None` without a consumer.
    pub fn worker_router(&self) -> Option<Router> {
        let consumer = self.consumer.clone()?;
        Some(api::worker_router(WorkerState {
            consumer,
            database: Arc::clone(&self.database),
        }))
    }

    pub fn producer(&self) -> Option<&Arc<ProducerManager>> {
        self.producer.as_ref()
    }

    pub fn database(&self) -> &Arc<DatabaseManager> {
        &self.database
    }

    pub fn consumer(&self) -> Option<&Arc<ConsumerManager>> {
        self.consumer.as_ref()
    }

    /// Shared by every router returned from [`App::api_router`].
    pub fn metrics(&self) -> &Arc<HttpMetrics> {
        &self.metrics
    }

    /// Stop worker, consumer, producer and database, in that order.
    pub async fn shutdown(&self) {
        if let Some(worker) = &self.worker {
            worker.stop();
            worker.join().await;
        }
        if let Some(consumer) = &self.consumer {
            consumer.stop().await;
        }
        if let Some(producer) = &self.producer {
            producer.stop().await;
        }
        self.database.stop().await;
        self.token.cancel();
        info!(component = "app", "shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryBroker, InMemoryStore, LogMailer};

    #[tokio::test]
    async fn test_build_requires_a_role() {
        let store = InMemoryStore::new();
        let app = AppBuilder::new()
            .with_database(store.connector())
            .start(&CancellationToken::new())
            .await;
        assert!(matches!(app, Err(BuildError::NoRole)));
    }

    #[tokio::test]
    async fn test_build_missing_database() {
        let broker = InMemoryBroker::new();
        let app = AppBuilder::new()
            .with_producer(broker.producer_connector())
            .start(&CancellationToken::new())
            .await;
        assert!(matches!(app, Err(BuildError::MissingComponent("database"))));
        assert_eq!(broker.producer_connects(), 0);
    }

    #[tokio::test]
    async fn test_build_worker_without_mailer() {
        let broker = InMemoryBroker::new();
        let store = InMemoryStore::new();
        let app = AppBuilder::new()
            .with_database(store.connector())
            .with_consumer(broker.stream_connector())
            .start(&CancellationToken::new())
            .await;
        assert!(matches!(app, Err(BuildError::MissingComponent("mailer"))));
        assert_eq!(broker.stream_connects(), 0);
        assert_eq!(store.connects(), 0);
    }

    #[tokio::test]
    async fn test_api_role_has_no_worker_router() {
        let broker = InMemoryBroker::new();
        let store = InMemoryStore::new();
        let app = AppBuilder::new()
            .with_database(store.connector())
            .with_producer(broker.producer_connector())
            .start(&CancellationToken::new())
            .await
            .unwrap();

        assert!(app.api_router().is_some());
        assert!(app.worker_router().is_none());
        assert!(app.producer().unwrap().is_connected());
        assert!(app.database().is_connected());
        app.shutdown().await;
        assert!(!app.database().is_connected());
    }

    #[tokio::test]
    async fn test_standalone_role_has_both_routers() {
        let broker = InMemoryBroker::new();
        let store = InMemoryStore::new();
        let app = AppBuilder::new()
            .with_database(store.connector())
            .with_producer(broker.producer_connector())
            .with_consumer(broker.stream_connector())
            .with_mailer(Arc::new(LogMailer))
            .start(&CancellationToken::new())
            .await
            .unwrap();

        assert!(app.api_router().is_some());
        assert!(app.worker_router().is_some());
        assert!(app.consumer().unwrap().is_connected());
        app.shutdown().await;
        app.shutdown().await;
    }
}
