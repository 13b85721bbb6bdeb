//! postwork binary entry point.
//!
//! Usage: postwork [--log-level <level>] <api|worker|standalone> [options]
//!
//! `api` and `worker` talk to Kafka and PostgreSQL and need the `live`
//! feature; `standalone` runs everything in one process over the in-memory
//! adapters.

use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use postwork_core::impls::{InMemoryBroker, InMemoryStore, LogMailer};
use postwork_core::ports::Mailer;
use postwork_core::{App, AppBuilder, BuildError, ServiceConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("http server failed: {0}")]
    Serve(std::io::Error),

    #[error("`{0}` needs the live adapters; rebuild with `--features live`")]
    LiveAdaptersDisabled(&'static str),

    #[error("no router for the configured role")]
    NoRouter,

    #[error("metrics exporter: {0}")]
    Metrics(String),
}

/// postwork: HTTP mail intake and queue worker.
#[derive(Parser, Debug)]
#[command(name = "postwork", version)]
#[command(about = "Accepts mail over HTTP, queues it on Kafka and delivers it from a worker")]
struct Cli {
    /// Log level (trace, debug, info, warn, error). RUST_LOG wins when set.
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// OTLP/HTTP endpoint to push metrics to, e.g. http://localhost:4318.
    #[arg(long, global = true, env = "OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// HTTP API: persist messages and enqueue them.
    Api(ServiceArgs),
    /// Queue worker with a health endpoint.
    Worker(ServiceArgs),
    /// API and worker in one process over in-memory adapters.
    Standalone(ServiceArgs),
}

#[derive(Args, Debug, Clone)]
struct ServiceArgs {
    /// The interface to bind to.
    #[arg(short, long, env = "BIND", default_value = "0.0.0.0:8080")]
    bind: String,

    /// A comma separated list of kafka endpoints.
    #[arg(
        short = 'e',
        long,
        env = "KAFKA_ENDPOINTS",
        value_delimiter = ',',
        default_value = "localhost:9092"
    )]
    kafka_endpoints: Vec<String>,

    /// Topic used to produce and consume mail messages.
    #[arg(short = 't', long, env = "KAFKA_TOPIC", default_value = "postwork-topic")]
    kafka_topic: String,

    /// PostgreSQL server URL.
    #[arg(long, env = "DATABASE_URL", default_value = "postgres://localhost:5432")]
    database_url: String,

    /// Database name.
    #[arg(long, env = "DATABASE_NAME", default_value = "postwork")]
    database_name: String,

    /// Create the database and table if none exist.
    #[arg(long, env = "DATABASE_AUTO_CREATE", default_value_t = true, action = ArgAction::Set)]
    database_auto_create: bool,

    /// Mail transport.
    #[arg(long, env = "MAIL_TRANSPORT", value_enum, default_value_t = MailTransport::Log)]
    mail_transport: MailTransport,

    /// Delivery attempts per message.
    #[arg(long, env = "TRANSPORT_RETRY", default_value_t = 3)]
    transport_retry: u32,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum MailTransport {
    /// Log the message instead of sending it.
    Log,
}

impl ServiceArgs {
    fn service_config(&self) -> ServiceConfig {
        ServiceConfig::default()
            .with_auto_create_schema(self.database_auto_create)
            .with_transport_attempts(self.transport_retry)
    }

    fn mailer(&self) -> Arc<dyn Mailer> {
        match self.mail_transport {
            MailTransport::Log => Arc::new(LogMailer),
        }
    }
}

#[cfg(feature = "live")]
mod live {
    use std::sync::Arc;

    use postwork_core::impls::{
        KafkaConfig, KafkaProducerConnector, KafkaStreamConnector, PgConfig, PgStoreConnector,
    };
    use postwork_core::ports::{ProducerConnector, StoreConnector, StreamConnector};

    use super::{CliError, ServiceArgs};

    fn kafka(args: &ServiceArgs) -> KafkaConfig {
        KafkaConfig::new(args.kafka_endpoints.clone(), args.kafka_topic.clone())
    }

    pub fn producer(args: &ServiceArgs) -> Result<ProducerConnector, CliError> {
        Ok(Arc::new(KafkaProducerConnector::new(kafka(args))))
    }

    pub fn consumer(args: &ServiceArgs) -> Result<Arc<dyn StreamConnector>, CliError> {
        Ok(Arc::new(KafkaStreamConnector::new(kafka(args))))
    }

    pub fn database(args: &ServiceArgs) -> Result<StoreConnector, CliError> {
        Ok(Arc::new(PgStoreConnector::new(PgConfig::new(
            args.database_url.clone(),
            args.database_name.clone(),
        ))))
    }
}

#[cfg(not(feature = "live"))]
mod live {
    use std::sync::Arc;

    use postwork_core::ports::{ProducerConnector, StoreConnector, StreamConnector};

    use super::{CliError, ServiceArgs};

    pub fn producer(_: &ServiceArgs) -> Result<ProducerConnector, CliError> {
        Err(CliError::LiveAdaptersDisabled("kafka producer"))
    }

    pub fn consumer(_: &ServiceArgs) -> Result<Arc<dyn StreamConnector>, CliError> {
        Err(CliError::LiveAdaptersDisabled("kafka consumer"))
    }

    pub fn database(_: &ServiceArgs) -> Result<StoreConnector, CliError> {
        Err(CliError::LiveAdaptersDisabled("postgres store"))
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Install a global meter provider pushing to `endpoint`.
fn init_metrics(endpoint: &str) -> Result<SdkMeterProvider, CliError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|err| CliError::Metrics(err.to_string()))?;
    let reader = PeriodicReader::builder(exporter).build();
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    opentelemetry::global::set_meter_provider(provider.clone());
    info!(%endpoint, "pushing metrics over OTLP");
    Ok(provider)
}

/// Resolves on Ctrl-C or when `token` is cancelled elsewhere.
async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                error!(error = %err, "failed to listen for Ctrl-C");
            }
            info!("received shutdown signal");
        }
        _ = token.cancelled() => {}
    }
    token.cancel();
}

async fn serve(
    router: axum::Router,
    bind: &str,
    token: &CancellationToken,
) -> Result<(), CliError> {
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|source| CliError::Bind {
            address: bind.to_string(),
            source,
        })?;
    info!(address = %bind, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(token.clone()))
        .await
        .map_err(CliError::Serve)
}

async fn build(command: &Command, token: &CancellationToken) -> Result<App, CliError> {
    let builder = match command {
        Command::Api(args) => AppBuilder::new()
            .with_config(args.service_config())
            .with_producer(live::producer(args)?)
            .with_database(live::database(args)?),
        Command::Worker(args) => AppBuilder::new()
            .with_config(args.service_config())
            .with_consumer(live::consumer(args)?)
            .with_database(live::database(args)?)
            .with_mailer(args.mailer()),
        Command::Standalone(args) => {
            let broker = InMemoryBroker::new();
            let store = InMemoryStore::new();
            AppBuilder::new()
                .with_config(args.service_config())
                .with_producer(broker.producer_connector())
                .with_consumer(broker.stream_connector())
                .with_database(store.connector())
                .with_mailer(args.mailer())
        }
    };
    Ok(builder.start(token).await?)
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let token = CancellationToken::new();
    let app = build(&cli.command, &token).await?;

    let served = match &cli.command {
        Command::Api(args) | Command::Standalone(args) => match app.api_router() {
            Some(router) => serve(router, &args.bind, &token).await,
            None => Err(CliError::NoRouter),
        },
        Command::Worker(args) => match app.worker_router() {
            Some(router) => serve(router, &args.bind, &token).await,
            None => Err(CliError::NoRouter),
        },
    };

    app.shutdown().await;
    token.cancel();
    served
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let provider = match cli.otlp_endpoint.as_deref() {
        Some(endpoint) => Some(init_metrics(endpoint)?),
        None => None,
    };

    info!(command = ?cli.command, "postwork starting");
    let result = run(cli).await;

    if let Some(provider) = provider
        && let Err(err) = provider.shutdown()
    {
        warn!(error = %err, "metrics provider shutdown failed");
    }
    if let Err(err) = result {
        error!(error = %err, "postwork exited with error");
        return Err(err);
    }
    info!("postwork stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cli = Cli::try_parse_from(["postwork", "api"]).unwrap();
        let Command::Api(args) = cli.command else {
            panic!("expected api");
        };
        assert_eq!(args.bind, "0.0.0.0:8080");
        assert_eq!(args.kafka_endpoints, vec!["localhost:9092"]);
        assert_eq!(args.kafka_topic, "postwork-topic");
        assert!(args.database_auto_create);
        assert_eq!(args.mail_transport, MailTransport::Log);
        assert_eq!(args.service_config().transport_attempts, 3);
        assert!(cli.otlp_endpoint.is_none());
    }

    #[test]
    fn endpoints_are_comma_separated() {
        let cli = Cli::try_parse_from([
            "postwork",
            "worker",
            "--kafka-endpoints",
            "k1:9092,k2:9092",
            "--database-auto-create",
            "false",
        ])
        .unwrap();
        let Command::Worker(args) = cli.command else {
            panic!("expected worker");
        };
        assert_eq!(args.kafka_endpoints, vec!["k1:9092", "k2:9092"]);
        assert!(!args.service_config().auto_create_schema);
    }

    #[test]
    fn unknown_transport_is_rejected() {
        assert!(Cli::try_parse_from(["postwork", "api", "--mail-transport", "smtp"]).is_err());
    }

    #[cfg(not(feature = "live"))]
    #[tokio::test]
    async fn live_roles_need_the_feature() {
        let cli = Cli::try_parse_from(["postwork", "api"]).unwrap();
        let err = build(&cli.command, &CancellationToken::new()).await.err();
        assert!(matches!(err, Some(CliError::LiveAdaptersDisabled(_))));
    }

    #[tokio::test]
    async fn standalone_builds_both_roles() {
        let cli = Cli::try_parse_from(["postwork", "standalone"]).unwrap();
        let app = build(&cli.command, &CancellationToken::new()).await.unwrap();
        assert!(app.api_router().is_some());
        assert!(app.worker_router().is_some());
        app.shutdown().await;
    }
}
