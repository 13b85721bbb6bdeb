//! ProducerManager - supervised broker producer.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::supervisor::Supervisor;
use crate::domain::QueueMessage;
use crate::error::Error;
use crate::ports::{ProducerConnector, ProducerHandle};

pub struct ProducerManager {
    supervisor: Supervisor<dyn ProducerHandle>,
}

impl ProducerManager {
    pub async fn start(
        connector: ProducerConnector,
        backoff: Duration,
        token: &CancellationToken,
    ) -> Self {
        Self {
            supervisor: Supervisor::start("producer", connector, backoff, token).await,
        }
    }

    /// Publish one envelope.
    ///
    /// Fails fast with a `Connection` error while no producer is available.
    /// A `Connection` failure from the broker requests a reconnect before it
    /// is returned.
    pub async fn send(&self, message: &QueueMessage) -> Result<(), Error> {
        let payload = message.to_bytes()?;
        let Some(producer) = self.supervisor.get() else {
            return Err(Error::connection("producer not connected"));
        };

        match producer.send(payload).await {
            Ok(()) => {
                debug!(component = "producer", kind = ?message.kind, id = %message.id, "queued");
                Ok(())
            }
            Err(err) => {
                if err.is_connection() {
                    warn!(component = "producer", error = %err, "send failed; reconnecting");
                    self.supervisor.signal();
                }
                Err(err)
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.supervisor.is_connected()
    }

    pub fn signal(&self) {
        self.supervisor.signal();
    }

    pub async fn stop(&self) {
        self.supervisor.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageId;
    use crate::error::ErrorKind;
    use crate::impls::InMemoryBroker;

    #[tokio::test(start_paused = true)]
    async fn send_fails_fast_while_disconnected() {
        let broker = InMemoryBroker::new();
        broker.set_available(false);
        let token = CancellationToken::new();
        let producer =
            ProducerManager::start(broker.producer_connector(), Duration::from_secs(2), &token)
                .await;

        let err = producer.send(&QueueMessage::ping()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(broker.published().is_empty());
        producer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn send_publishes_json_envelope() {
        let broker = InMemoryBroker::new();
        let token = CancellationToken::new();
        let producer =
            ProducerManager::start(broker.producer_connector(), Duration::from_secs(2), &token)
                .await;

        let id = MessageId::random();
        producer.send(&QueueMessage::email(&id)).await.unwrap();

        let published = broker.published();
        assert_eq!(published.len(), 1);
        let envelope = QueueMessage::from_bytes(&published[0]).unwrap();
        assert_eq!(envelope.message_id().unwrap(), id);
        producer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn connection_error_triggers_reconnect() {
        let broker = InMemoryBroker::new();
        let token = CancellationToken::new();
        let producer =
            ProducerManager::start(broker.producer_connector(), Duration::from_secs(2), &token)
                .await;
        assert_eq!(broker.producer_connects(), 1);

        broker.set_available(false);
        let err = producer.send(&QueueMessage::ping()).await.unwrap_err();
        assert!(err.is_connection());

        broker.set_available(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(broker.producer_connects(), 2);
        producer.send(&QueueMessage::ping()).await.unwrap();
        producer.stop().await;
    }
}
