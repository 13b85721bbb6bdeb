//! Kafka adapters (feature `kafka`).
//!
//! - producer: `FutureProducer` with all-replica acks and bounded internal
//!   retries; a metadata fetch on connect so an unreachable cluster fails the
//!   attempt instead of the first send
//! - consumer: `StreamConsumer` assigned to partition 0 at the newest offset;
//!   a pump task forwards records and errors into the [`Subscription`]
//!   channels and exits once the subscription is dropped

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message as _;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Error;
use crate::ports::{Connection, Connector, ProducerHandle, StreamConnector, Subscription};

const CONSUMER_GROUP: &str = "postwork-worker";
const PARTITION: i32 = 0;
const STREAM_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub endpoints: Vec<String>,
    pub topic: String,
    /// Producer-internal retries (`retries`).
    pub retries: u32,
    /// Send and metadata timeout.
    pub timeout: Duration,
}

impl KafkaConfig {
    pub fn new(endpoints: Vec<String>, topic: impl Into<String>) -> Self {
        Self {
            endpoints,
            topic: topic.into(),
            retries: 3,
            timeout: Duration::from_secs(5),
        }
    }

    fn bootstrap_servers(&self) -> String {
        self.endpoints.join(",")
    }
}

/// Map a client error onto the shared taxonomy.
fn classify(err: KafkaError) -> Error {
    let unreachable = matches!(err, KafkaError::Canceled)
        || matches!(
            err.rdkafka_error_code(),
            Some(
                RDKafkaErrorCode::BrokerNotAvailable
                    | RDKafkaErrorCode::AllBrokersDown
                    | RDKafkaErrorCode::BrokerTransportFailure
                    | RDKafkaErrorCode::MessageTimedOut
                    | RDKafkaErrorCode::RequestTimedOut
                    | RDKafkaErrorCode::NetworkException
                    | RDKafkaErrorCode::LeaderNotAvailable
                    | RDKafkaErrorCode::NotLeaderForPartition
            )
        );
    let message = err.to_string();
    if unreachable {
        Error::connection(message).with_source(err)
    } else {
        Error::internal(message).with_source(err)
    }
}

fn blocking_failed(err: tokio::task::JoinError) -> Error {
    Error::internal("kafka blocking call failed").with_source(err)
}

pub struct KafkaProducerConnector {
    config: KafkaConfig,
}

impl KafkaProducerConnector {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for KafkaProducerConnector {
    type Handle = dyn ProducerHandle;

    async fn connect(&self) -> Result<Arc<dyn ProducerHandle>, Error> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", self.config.bootstrap_servers())
            .set("acks", "all")
            .set("retries", self.config.retries.to_string())
            .set("message.timeout.ms", self.config.timeout.as_millis().to_string())
            .create()
            .map_err(classify)?;

        let handle = producer.clone();
        let topic = self.config.topic.clone();
        let timeout = self.config.timeout;
        tokio::task::spawn_blocking(move || {
            handle
                .client()
                .fetch_metadata(Some(&topic), timeout)
                .map(|_| ())
        })
        .await
        .map_err(blocking_failed)?
        .map_err(classify)?;

        debug!(
            component = "producer",
            servers = %self.config.bootstrap_servers(),
            "kafka producer ready"
        );
        Ok(Arc::new(KafkaProducer {
            producer,
            topic: self.config.topic.clone(),
            timeout: self.config.timeout,
        }))
    }
}

struct KafkaProducer {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

#[async_trait]
impl Connection for KafkaProducer {
    async fn close(&self) {
        let producer = self.producer.clone();
        let timeout = self.timeout;
        match tokio::task::spawn_blocking(move || producer.flush(timeout)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(component = "producer", error = %err, "flush on close failed"),
            Err(err) => warn!(component = "producer", error = %err, "flush on close panicked"),
        }
    }
}

#[async_trait]
impl ProducerHandle for KafkaProducer {
    async fn send(&self, payload: Vec<u8>) -> Result<(), Error> {
        let record = FutureRecord::<(), Vec<u8>>::to(&self.topic)
            .partition(PARTITION)
            .payload(&payload);
        self.producer
            .send(record, self.timeout)
            .await
            .map_err(|(err, _)| classify(err))?;
        Ok(())
    }
}

pub struct KafkaStreamConnector {
    config: KafkaConfig,
}

impl KafkaStreamConnector {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StreamConnector for KafkaStreamConnector {
    async fn connect(&self) -> Result<Subscription, Error> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", self.config.bootstrap_servers())
            .set("group.id", CONSUMER_GROUP)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(classify)?;

        let mut assignment = TopicPartitionList::new();
        assignment
            .add_partition_offset(&self.config.topic, PARTITION, Offset::End)
            .map_err(classify)?;
        consumer.assign(&assignment).map_err(classify)?;

        let topic = self.config.topic.clone();
        let timeout = self.config.timeout;
        let consumer = tokio::task::spawn_blocking(move || {
            consumer
                .fetch_metadata(Some(&topic), timeout)
                .map(|_| consumer)
        })
        .await
        .map_err(blocking_failed)?
        .map_err(classify)?;

        let (messages_tx, messages_rx) = mpsc::channel(STREAM_BUFFER);
        let (errors_tx, errors_rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(pump(consumer, messages_tx, errors_tx));

        Ok(Subscription {
            messages: messages_rx,
            errors: errors_rx,
        })
    }
}

/// Forward consumer output until the subscription is dropped.
async fn pump(
    consumer: StreamConsumer,
    messages: mpsc::Sender<Vec<u8>>,
    errors: mpsc::Sender<Error>,
) {
    loop {
        let received = tokio::select! {
            _ = messages.closed() => break,
            received = consumer.recv() => {
                received.map(|record| record.payload().map(<[u8]>::to_vec).unwrap_or_default())
            }
        };

        let forwarded = match received {
            Ok(payload) => messages.send(payload).await.is_ok(),
            Err(err) => errors.send(classify(err)).await.is_ok(),
        };
        if !forwarded {
            break;
        }
    }
    debug!(component = "consumer", "kafka pump stopped");
}
