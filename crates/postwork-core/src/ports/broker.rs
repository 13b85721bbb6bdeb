//! Broker ports - the durable log between the HTTP layer and the worker.
//!
//! The producer side is a supervised [`Connection`]; the consumer side hands
//! out a [`Subscription`] per successful attach.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::connection::{Connection, Connector};
use crate::error::Error;

/// Publishes raw records to the single topic.
#[async_trait]
pub trait ProducerHandle: Connection {
    async fn send(&self, payload: Vec<u8>) -> Result<(), Error>;
}

/// Type-erased connector for producer handles.
pub type ProducerConnector = Arc<dyn Connector<Handle = dyn ProducerHandle>>;

/// The pair of streams produced by one successful consumer attach.
///
/// Dropping a subscription detaches it; the adapter stops forwarding once both
/// receivers are gone.
#[derive(Debug)]
pub struct Subscription {
    pub messages: mpsc::Receiver<Vec<u8>>,
    pub errors: mpsc::Receiver<Error>,
}

/// Attaches to the topic at the newest offset.
#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Subscription, Error>;
}
