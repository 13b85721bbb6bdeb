//! DatabaseManager - supervised message store session.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::supervisor::Supervisor;
use crate::domain::{Message, MessageChanges, MessageId};
use crate::error::Error;
use crate::ports::{Connector, IdGenerator, StoreConnector, StoreSession};

/// Runs the schema bootstrap on every fresh session before it is published.
struct SchemaBootstrap {
    inner: StoreConnector,
    auto_create: bool,
}

#[async_trait]
impl Connector for SchemaBootstrap {
    type Handle = dyn StoreSession;

    async fn connect(&self) -> Result<Arc<dyn StoreSession>, Error> {
        let session = self.inner.connect().await?;
        if self.auto_create {
            if let Err(err) = session.ensure_schema().await {
                session.close().await;
                return Err(err);
            }
            info!(component = "database", "schema ready");
        }
        Ok(session)
    }
}

pub struct DatabaseManager {
    supervisor: Supervisor<dyn StoreSession>,
    ids: Arc<dyn IdGenerator>,
}

impl DatabaseManager {
    pub async fn start(
        connector: StoreConnector,
        ids: Arc<dyn IdGenerator>,
        auto_create: bool,
        backoff: Duration,
        token: &CancellationToken,
    ) -> Self {
        let connector = Arc::new(SchemaBootstrap {
            inner: connector,
            auto_create,
        });
        Self {
            supervisor: Supervisor::start("database", connector, backoff, token).await,
            ids,
        }
    }

    fn session(&self) -> Result<Arc<dyn StoreSession>, Error> {
        self.supervisor
            .get()
            .ok_or_else(|| Error::connection("database not connected"))
    }

    /// Ask for a fresh session when the store looks unreachable.
    fn observe<T>(&self, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(err) = &result
            && err.is_connection()
        {
            warn!(component = "database", error = %err, "store unreachable; reconnecting");
            self.supervisor.signal();
        }
        result
    }

    pub async fn get_message(&self, id: &MessageId) -> Result<Message, Error> {
        let session = self.session()?;
        self.observe(session.get_message(id).await)
    }

    /// Persist `message`, assigning an id when it has none. Returns the stored
    /// message.
    pub async fn insert_message(&self, mut message: Message) -> Result<Message, Error> {
        let session = self.session()?;
        if message.id.is_none() {
            message.id = Some(self.ids.generate_message_id());
        }
        self.observe(session.insert_message(&message).await)?;
        Ok(message)
    }

    /// `NotFound` when no row has this id.
    pub async fn update_message(
        &self,
        id: &MessageId,
        changes: &MessageChanges,
    ) -> Result<(), Error> {
        let session = self.session()?;
        self.observe(session.update_message(id, changes).await)
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
