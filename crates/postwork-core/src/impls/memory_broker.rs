//! InMemoryBroker - single in-process topic for tests and standalone mode.
//!
//! # Semantics
//! - one topic, one partition
//! - a subscriber only sees records published after it attached (newest
//!   offset), like the partition consumer does
//! - every published record is kept in a log so tests can inspect it
//! - fault injection: `set_available(false)` refuses connects and sends and
//!   raises a stream error on every subscriber
//!
//! Locks are never held across an `.await`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use crate::error::Error;
use crate::ports::{
    Connection, Connector, ProducerConnector, ProducerHandle, StreamConnector, Subscription,
};

/// Per-subscriber buffer.
const SUBSCRIBER_BUFFER: usize = 1024;

struct Subscriber {
    messages: mpsc::Sender<Vec<u8>>,
    errors: mpsc::Sender<Error>,
}

struct BrokerState {
    available: AtomicBool,
    log: Mutex<Vec<Vec<u8>>>,
    subscribers: Mutex<Vec<Subscriber>>,
    producer_connects: AtomicUsize,
    stream_connects: AtomicUsize,
}

impl BrokerState {
    fn subscribers(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn refused(&self) -> Option<Error> {
        (!self.available.load(Ordering::SeqCst))
            .then(|| Error::connection("broker unavailable"))
    }
}

#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(BrokerState {
                available: AtomicBool::new(true),
                log: Mutex::new(Vec::new()),
                subscribers: Mutex::new(Vec::new()),
                producer_connects: AtomicUsize::new(0),
                stream_connects: AtomicUsize::new(0),
            }),
        }
    }

    pub fn producer_connector(&self) -> ProducerConnector {
        Arc::new(MemoryProducerConnector {
            state: Arc::clone(&self.state),
        })
    }

    pub fn stream_connector(&self) -> Arc<dyn StreamConnector> {
        Arc::new(MemoryStreamConnector {
            state: Arc::clone(&self.state),
        })
    }

    pub fn set_available(&self, available: bool) {
        let was = self.state.available.swap(available, Ordering::SeqCst);
        if was && !available {
            self.inject_stream_error(Error::connection("broker went away"));
        }
    }

    /// Append a record to the topic, bypassing any producer.
    pub fn publish(&self, payload: Vec<u8>) {
        self.state
            .subscribers()
            .retain(|sub| match sub.messages.try_send(payload.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(component = "memory-broker", "subscriber buffer full; record dropped");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
        self.state
            .log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload);
    }

    /// Deliver a stream error to every attached subscriber.
    pub fn inject_stream_error(&self, err: Error) {
        let message = err.message().to_string();
        let kind = err.kind();
        self.state.subscribers().retain(|sub| {
            !matches!(
                sub.errors.try_send(Error::new(kind, message.clone())),
                Err(TrySendError::Closed(_))
            )
        });
    }

    /// Close every subscription's streams.
    pub fn disconnect_subscribers(&self) {
        self.state.subscribers().clear();
    }

    pub fn published(&self) -> Vec<Vec<u8>> {
        self.state
            .log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state
            .subscribers()
            .iter()
            .filter(|sub| !sub.messages.is_closed())
            .count()
    }

    /// Producer connect attempts, successful or not.
    pub fn producer_connects(&self) -> usize {
        self.state.producer_connects.load(Ordering::SeqCst)
    }

    /// Stream attach attempts, successful or not.
    pub fn stream_connects(&self) -> usize {
        self.state.stream_connects.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryProducer {
    broker: InMemoryBroker,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for MemoryProducer {
    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.broker.state.available.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProducerHandle for MemoryProducer {
    async fn send(&self, payload: Vec<u8>) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::connection("producer closed"));
        }
        if let Some(err) = self.broker.state.refused() {
            return Err(err);
        }
        self.broker.publish(payload);
        Ok(())
    }
}

struct MemoryProducerConnector {
    state: Arc<BrokerState>,
}

#[async_trait]
impl Connector for MemoryProducerConnector {
    type Handle = dyn ProducerHandle;

    async fn connect(&self) -> Result<Arc<dyn ProducerHandle>, Error> {
        self.state.producer_connects.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.state.refused() {
            return Err(err);
        }
        Ok(Arc::new(MemoryProducer {
            broker: InMemoryBroker {
                state: Arc::clone(&self.state),
            },
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryStreamConnector {
    state: Arc<BrokerState>,
}

#[async_trait]
impl StreamConnector for MemoryStreamConnector {
    async fn connect(&self) -> Result<Subscription, Error> {
        self.state.stream_connects.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.state.refused() {
            return Err(err);
        }
        let (messages_tx, messages_rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let (errors_tx, errors_rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.state.subscribers().push(Subscriber {
            messages: messages_tx,
            errors: errors_tx,
        });
        Ok(Subscription {
            messages: messages_rx,
            errors: errors_rx,
        })
    }
}
