//! Worker - consumes queued references and drives message delivery.
//!
//! # Event loop
//! One task owns the installed [`Subscription`] and waits on:
//! - stop
//! - a fresh subscription from the consumer manager (replaces the old one)
//! - an inbound record or stream error from the installed subscription
//!
//! # Record handling
//! decode -> drop pings -> load -> skip finished -> SENDING -> mailer ->
//! DELIVERED / UN-DELIVERABLE
//!
//! Every storage call goes through [`Worker::retry_store`]: retryable errors
//! are retried on a fixed interval until they succeed or stop is requested,
//! anything else ends processing of that record.
//!
//! Transient transport failures are retried with backoff, up to the
//! configured number of attempts. Sends and backoff waits both observe stop.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::consumer::ConsumerManager;
use super::database::DatabaseManager;
use super::retry::RetryPolicy;
use crate::domain::{Message, MessageChanges, MessageId, QueueMessage, Status};
use crate::error::Error;
use crate::ports::{Mailer, Subscription};

const NAME: &str = "worker";

enum Event {
    Stop,
    Subscribed(Option<Subscription>),
    Record(Vec<u8>),
    StreamError(Error),
    Closed,
}

/// Result of a storage call run under the retry discipline.
#[derive(Debug)]
enum RetryOutcome<T> {
    Done(T),
    NotFound,
    /// Failed with an error retrying cannot fix.
    Abandoned(Error),
    Stopped,
}

pub struct Worker {
    subscriptions: mpsc::UnboundedReceiver<Subscription>,
    consumer: Arc<ConsumerManager>,
    database: Arc<DatabaseManager>,
    mailer: Arc<dyn Mailer>,
    retry: RetryPolicy,
    transport_attempts: u32,
    transport_retry: RetryPolicy,
}

/// Handle to a spawned worker.
pub struct WorkerHandle {
    stop: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerHandle {
    /// Ask the event loop to exit. A record in flight is abandoned at its
    /// next storage call, send or wait.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Wait for the event loop to exit. Idempotent.
    pub async fn join(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task
            && let Err(err) = task.await
        {
            warn!(component = NAME, error = %err, "worker task ended abnormally");
        }
    }
}

impl Worker {
    pub fn new(
        subscriptions: mpsc::UnboundedReceiver<Subscription>,
        consumer: Arc<ConsumerManager>,
        database: Arc<DatabaseManager>,
        mailer: Arc<dyn Mailer>,
        status_retry_interval: Duration,
    ) -> Self {
        Self {
            subscriptions,
            consumer,
            database,
            mailer,
            retry: RetryPolicy::fixed(status_retry_interval),
            transport_attempts: 1,
            transport_retry: RetryPolicy::default(),
        }
    }

    /// Retry transient transport failures, `attempts` sends in total.
    pub fn with_transport_retry(mut self, attempts: u32, policy: RetryPolicy) -> Self {
        self.transport_attempts = attempts.max(1);
        self.transport_retry = policy;
        self
    }

    pub fn spawn(self, token: &CancellationToken) -> WorkerHandle {
        let stop = token.child_token();
        let task = tokio::spawn(self.run(stop.clone()));
        WorkerHandle {
            stop,
            task: Mutex::new(Some(task)),
        }
    }

    async fn run(mut self, stop: CancellationToken) {
        let mut installed: Option<Subscription> = None;
        let mut hand_off_open = true;

        info!(component = NAME, "started");
        loop {
            let event = tokio::select! {
                biased;
                _ = stop.cancelled() => Event::Stop,
                sub = self.subscriptions.recv(), if hand_off_open => Event::Subscribed(sub),
                inbound = next_inbound(&mut installed) => inbound,
            };

            match event {
                Event::Stop => break,
                Event::Subscribed(Some(mut subscription)) => {
                    // only the newest attach matters
                    while let Ok(newer) = self.subscriptions.try_recv() {
                        subscription = newer;
                    }
                    debug!(component = NAME, "subscription installed");
                    installed = Some(subscription);
                }
                Event::Subscribed(None) => {
                    debug!(component = NAME, "consumer hand-off closed");
                    hand_off_open = false;
                }
                Event::Record(payload) => self.handle_record(&payload, &stop).await,
                Event::StreamError(err) => {
                    warn!(component = NAME, error = %err, "stream error; reattaching");
                    self.consumer.signal();
                }
                Event::Closed => {
                    warn!(component = NAME, "stream closed; reattaching");
                    installed = None;
                    self.consumer.signal();
                }
            }
        }
        info!(component = NAME, "stopped");
    }

    async fn handle_record(&self, payload: &[u8], stop: &CancellationToken) {
        let envelope = match QueueMessage::from_bytes(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(component = NAME, error = %err, "discarding undecodable record");
                return;
            }
        };

        if envelope.is_ping() {
            trace!(component = NAME, "ping");
            return;
        }

        let id = match envelope.message_id() {
            Ok(id) => id,
            Err(err) => {
                warn!(component = NAME, error = %err, "discarding envelope without a valid id");
                return;
            }
        };

        let database = &self.database;
        let message = match self
            .retry_store(&id, "load", stop, || database.get_message(&id))
            .await
        {
            RetryOutcome::Done(message) => message,
            RetryOutcome::NotFound => {
                warn!(component = NAME, message_id = %id, "message not found; discarding");
                return;
            }
            RetryOutcome::Abandoned(err) => {
                warn!(component = NAME, message_id = %id, error = %err, "load abandoned");
                return;
            }
            RetryOutcome::Stopped => return,
        };

        if !message.status.can_transition_to(Status::Sending) {
            info!(
                component = NAME,
                message_id = %id,
                status = %message.status,
                "already finished; skipping redelivery"
            );
            return;
        }

        if !self.record_status(&id, message.status, Status::Sending, stop).await {
            return;
        }

        let Some(outcome) = self.deliver(&id, &message, stop).await else {
            return;
        };

        if self.record_status(&id, Status::Sending, outcome, stop).await {
            info!(component = NAME, message_id = %id, status = %outcome, "delivery recorded");
        }
    }

    /// Send through the mailer. `None` when stop was requested first.
    async fn deliver(
        &self,
        id: &MessageId,
        message: &Message,
        stop: &CancellationToken,
    ) -> Option<Status> {
        let mut attempt = 1u32;
        loop {
            let sent = tokio::select! {
                biased;
                _ = stop.cancelled() => return None,
                sent = self.mailer.send(message) => sent,
            };
            let err = match sent {
                Ok(()) => return Some(Status::Delivered),
                Err(err) => err,
            };

            if !err.is_transient() || attempt >= self.transport_attempts {
                warn!(component = NAME, message_id = %id, attempt, error = %err, "delivery failed");
                return Some(Status::Undeliverable);
            }

            let delay = self.transport_retry.next_delay(attempt);
            warn!(
                component = NAME,
                message_id = %id,
                attempt,
                error = %err,
                retry_in = ?delay,
                "transport failed"
            );
            tokio::select! {
                biased;
                _ = stop.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Persist the move `from -> to`. `false` when processing must end here.
    async fn record_status(
        &self,
        id: &MessageId,
        from: Status,
        to: Status,
        stop: &CancellationToken,
    ) -> bool {
        if !from.can_transition_to(to) {
            warn!(component = NAME, message_id = %id, %from, %to, "illegal status change refused");
            return false;
        }

        let database = &self.database;
        let changes = MessageChanges::status(to);
        match self
            .retry_store(id, to.as_str(), stop, || database.update_message(id, &changes))
            .await
        {
            RetryOutcome::Done(()) => true,
            RetryOutcome::NotFound => {
                warn!(
                    component = NAME,
                    message_id = %id,
                    status = %to,
                    "message vanished before status update"
                );
                false
            }
            RetryOutcome::Abandoned(err) => {
                warn!(component = NAME, message_id = %id, error = %err, "status update abandoned");
                false
            }
            RetryOutcome::Stopped => false,
        }
    }

    /// Run `call` until it succeeds, fails for good, or stop is requested.
    async fn retry_store<T, F, Fut>(
        &self,
        id: &MessageId,
        op: &str,
        stop: &CancellationToken,
        mut call: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut attempts = 0u32;
        loop {
            attempts = attempts.saturating_add(1);
            let err = match call().await {
                Ok(value) => return RetryOutcome::Done(value),
                Err(err) if err.is_not_found() => return RetryOutcome::NotFound,
                Err(err) if !err.is_retryable() => return RetryOutcome::Abandoned(err),
                Err(err) => err,
            };

            if err.is_connection() {
                self.database.signal();
            }
            let delay = self.retry.next_delay(attempts);
            warn!(
                component = NAME,
                message_id = %id,
                op,
                attempts,
                error = %err,
                retry_in = ?delay,
                "store call failed"
            );

            tokio::select! {
                biased;
                _ = stop.cancelled() => return RetryOutcome::Stopped,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Next record, error or close from the installed subscription. Pending
/// forever when nothing is installed.
async fn next_inbound(installed: &mut Option<Subscription>) -> Event {
    let Some(subscription) = installed.as_mut() else {
        return std::future::pending().await;
    };

    tokio::select! {
        record = subscription.messages.recv() => match record {
            Some(payload) => Event::Record(payload),
            None => Event::Closed,
        },
        Some(err) = subscription.errors.recv() => Event::StreamError(err),
    }
}
