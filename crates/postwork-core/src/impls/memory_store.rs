//! InMemoryStore - `messages` map for tests and standalone mode.
//!
//! # Fault injection
//! - `set_available(false)`: connects and every session call fail with a
//!   `Connection` error
//! - `inject_error(err)`: the next session call fails with `err`
//! - `fail_schema(true)`: `ensure_schema` fails
//!
//! Reads, schema runs and status writes are counted so tests can check what
//! the worker touched.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::domain::{Message, MessageChanges, MessageId, Status};
use crate::error::Error;
use crate::ports::{Connection, Connector, StoreConnector, StoreSession};

#[derive(Default)]
struct Tables {
    messages: HashMap<MessageId, Message>,
    history: HashMap<MessageId, Vec<Status>>,
}

struct StoreState {
    tables: Mutex<Tables>,
    injected: Mutex<VecDeque<Error>>,
    available: AtomicBool,
    fail_schema: AtomicBool,
    schema_runs: AtomicUsize,
    connects: AtomicUsize,
    reads: AtomicUsize,
}

impl StoreState {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Gate every session call.
    fn check(&self) -> Result<(), Error> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::connection("store unavailable"));
        }
        let injected = self
            .injected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match injected {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(StoreState {
                tables: Mutex::new(Tables::default()),
                injected: Mutex::new(VecDeque::new()),
                available: AtomicBool::new(true),
                fail_schema: AtomicBool::new(false),
                schema_runs: AtomicUsize::new(0),
                connects: AtomicUsize::new(0),
                reads: AtomicUsize::new(0),
            }),
        }
    }

    pub fn connector(&self) -> StoreConnector {
        Arc::new(MemoryStoreConnector {
            state: Arc::clone(&self.state),
        })
    }

    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    pub fn fail_schema(&self, fail: bool) {
        self.state.fail_schema.store(fail, Ordering::SeqCst);
    }

    /// Queue an error for the next session call.
    pub fn inject_error(&self, err: Error) {
        self.state
            .injected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(err);
    }

    /// Peek at a row without going through a session.
    pub fn get(&self, id: &MessageId) -> Option<Message> {
        self.state.tables().messages.get(id).cloned()
    }

    /// Every status the row has been written with, oldest first.
    pub fn status_history(&self, id: &MessageId) -> Vec<Status> {
        self.state
            .tables()
            .history
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.state.tables().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn schema_runs(&self) -> usize {
        self.state.schema_runs.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// `get_message` calls that reached the store.
    pub fn reads(&self) -> usize {
        self.state.reads.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryStoreConnector {
    state: Arc<StoreState>,
}

#[async_trait]
impl Connector for MemoryStoreConnector {
    type Handle = dyn StoreSession;

    async fn connect(&self) -> Result<Arc<dyn StoreSession>, Error> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if !self.state.available.load(Ordering::SeqCst) {
            return Err(Error::connection("connection refused"));
        }
        Ok(Arc::new(MemorySession {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemorySession {
    state: Arc<StoreState>,
    closed: AtomicBool,
}

impl MemorySession {
    fn check(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::connection("session closed"));
        }
        self.state.check()
    }
}

#[async_trait]
impl Connection for MemorySession {
    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.state.available.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn ensure_schema(&self) -> Result<(), Error> {
        self.state.schema_runs.fetch_add(1, Ordering::SeqCst);
        if !self.state.available.load(Ordering::SeqCst) {
            return Err(Error::connection("store unavailable"));
        }
        if self.state.fail_schema.load(Ordering::SeqCst) {
            return Err(Error::internal("permission denied to create database"));
        }
        Ok(())
    }

    async fn get_message(&self, id: &MessageId) -> Result<Message, Error> {
        self.check()?;
        self.state.reads.fetch_add(1, Ordering::SeqCst);
        self.state
            .tables()
            .messages
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("message id - {id} not found")))
    }

    async fn insert_message(&self, message: &Message) -> Result<(), Error> {
        self.check()?;
        let id = message
            .id
            .clone()
            .ok_or_else(|| Error::validation("message has no id"))?;
        let mut tables = self.state.tables();
        if tables.messages.contains_key(&id) {
            return Err(Error::internal(format!("duplicate key '{id}'")));
        }
        tables.history.insert(id.clone(), vec![message.status]);
        tables.messages.insert(id, message.clone());
        Ok(())
    }

    async fn update_message(
        &self,
        id: &MessageId,
        changes: &MessageChanges,
    ) -> Result<(), Error> {
        self.check()?;
        let mut tables = self.state.tables();
        let Some(message) = tables.messages.get_mut(id) else {
            return Err(Error::not_found(format!("message id - {id} not found")));
        };
        message.apply(changes);
        if let Some(status) = changes.status {
            tables.history.entry(id.clone()).or_default().push(status);
        }
        Ok(())
    }
}
