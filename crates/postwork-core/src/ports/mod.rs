//! Ports - the seams to external systems.
//!
//! Each trait hides one dependency (broker, message store, mail transport)
//! behind an interface the supervisors and the worker program against.
//!
//! # Design rules
//! - the message store is the source of truth
//! - the broker carries only `{id, type}` references
//! - every failure is a classified [`Error`](crate::Error)

pub mod broker;
pub mod connection;
pub mod id_generator;
pub mod mailer;
pub mod store;

pub use self::broker::{ProducerConnector, ProducerHandle, StreamConnector, Subscription};
pub use self::connection::{Connection, Connector};
pub use self::id_generator::{IdGenerator, RandomIdGenerator};
pub use self::mailer::{MailError, Mailer};
pub use self::store::{StoreConnector, StoreSession};
