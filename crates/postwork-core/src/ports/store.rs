//! Store port - the `messages` table.
//!
//! # Implementations
//! - **InMemoryStore**: tests and standalone mode
//! - **PgStore** (feature `postgres`)

use std::sync::Arc;

use async_trait::async_trait;

use super::connection::{Connection, Connector};
use crate::domain::{Message, MessageChanges, MessageId};
use crate::error::Error;

/// One open session against the message store.
///
/// Errors must be classified: `NotFound` for a missing row, `Connection` for
/// an unreachable server, `Internal` for everything else.
#[async_trait]
pub trait StoreSession: Connection {
    /// Create the database/table if missing. Already existing is success.
    async fn ensure_schema(&self) -> Result<(), Error>;

    async fn get_message(&self, id: &MessageId) -> Result<Message, Error>;

    /// Insert a message whose `id` is already set.
    async fn insert_message(&self, message: &Message) -> Result<(), Error>;

    async fn update_message(&self, id: &MessageId, changes: &MessageChanges)
    -> Result<(), Error>;
}

/// Type-erased connector for store sessions.
pub type StoreConnector = Arc<dyn Connector<Handle = dyn StoreSession>>;
