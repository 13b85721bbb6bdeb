//! Implementations of the ports.
//!
//! # Always available
//! - **InMemoryBroker**, **InMemoryStore**: tests and standalone mode
//! - **LogMailer**, **RecordingMailer**
//!
//! # Feature gated
//! - `kafka`: **KafkaProducerConnector**, **KafkaStreamConnector**
//! - `postgres`: **PgStoreConnector**

pub mod mailer;
pub mod memory_broker;
pub mod memory_store;

#[cfg(feature = "kafka")]
pub mod kafka;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use self::mailer::{LogMailer, RecordingMailer};
pub use self::memory_broker::InMemoryBroker;
pub use self::memory_store::InMemoryStore;

#[cfg(feature = "kafka")]
pub use self::kafka::{KafkaConfig, KafkaProducerConnector, KafkaStreamConnector};

#[cfg(feature = "postgres")]
pub use self::postgres::{PgConfig, PgStoreConnector};
