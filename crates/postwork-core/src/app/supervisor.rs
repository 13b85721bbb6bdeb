//! Supervisor - keeps one live handle to a flaky dependency.
//!
//! # Model
//! - a background task owns the [`Connector`] and is the only writer
//! - the current handle is published wholesale through a `watch` channel, so
//!   readers see either the old handle or the new one, never a half-built one
//! - reconnects are requested through a `Notify`; concurrent requests collapse
//!   into a single attempt
//! - after a failed attempt a fixed backoff timer is armed; after a success it
//!   is disarmed and only an explicit signal triggers the next attempt
//! - every wait also listens to the stop token
//!
//! ```text
//!   start ──► attempt ──ok──► publish ──► wait{signal, stop}
//!               ▲   └─err─► arm backoff ─► wait{signal, backoff, stop}
//!               └────────────────────────────────┘
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ports::{Connection, Connector};

/// Reconnect trigger shared by the supervisor task and the consumer manager.
#[derive(Clone)]
pub(crate) struct Trigger {
    pub(crate) signal: Arc<Notify>,
    pub(crate) stop: CancellationToken,
    pub(crate) backoff: Duration,
}

impl Trigger {
    pub(crate) fn new(parent: &CancellationToken, backoff: Duration) -> Self {
        Self {
            signal: Arc::new(Notify::new()),
            stop: parent.child_token(),
            backoff,
        }
    }

    /// Wait until the next attempt is due. `false` means stop was requested.
    ///
    /// The backoff timer only counts while `armed`.
    pub(crate) async fn next(&self, armed: bool) -> bool {
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => false,
            _ = self.signal.notified() => true,
            _ = tokio::time::sleep(self.backoff), if armed => true,
        }
    }

    /// Request an attempt. Stores at most one pending permit.
    pub(crate) fn fire(&self) {
        self.signal.notify_one();
    }
}

/// Take a task handle out of its slot and wait for it.
pub(crate) async fn join_task(name: &str, slot: &Mutex<Option<JoinHandle<()>>>) {
    let task = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(task) = task
        && let Err(err) = task.await
    {
        warn!(component = %name, error = %err, "supervisor task ended abnormally");
    }
}

/// Supervised handle of type `H`.
pub struct Supervisor<H: Connection + ?Sized + 'static> {
    name: String,
    current: watch::Receiver<Option<Arc<H>>>,
    trigger: Trigger,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<H: Connection + ?Sized + 'static> Supervisor<H> {
    /// Spawn the connector task and return once the first attempt finished,
    /// successfully or not.
    pub async fn start<C>(
        name: impl Into<String>,
        connector: Arc<C>,
        backoff: Duration,
        parent: &CancellationToken,
    ) -> Self
    where
        C: Connector<Handle = H> + ?Sized,
    {
        let name = name.into();
        let (tx, rx) = watch::channel(None);
        let (ready_tx, ready_rx) = oneshot::channel();
        let trigger = Trigger::new(parent, backoff);

        let task = tokio::spawn(run(
            name.clone(),
            connector,
            tx,
            trigger.clone(),
            ready_tx,
        ));

        // Err only if the task ended before its first attempt (stop or panic).
        let _ = ready_rx.await;

        Self {
            name,
            current: rx,
            trigger,
            task: Mutex::new(Some(task)),
        }
    }

    /// Request an immediate reconnect.
    pub fn signal(&self) {
        debug!(component = %self.name, "reconnect requested");
        self.trigger.fire();
    }

    /// Current handle, if any. Never touches the network.
    pub fn get(&self) -> Option<Arc<H>> {
        self.current.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.current
            .borrow()
            .as_ref()
            .is_some_and(|handle| handle.is_connected())
    }

    /// Observe handle changes. The handle current at subscription time is
    /// already marked seen; `changed()` resolves on the next publish.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<H>>> {
        let mut changes = self.current.clone();
        changes.mark_unchanged();
        changes
    }

    /// Stop the task and close the current handle. Idempotent.
    pub async fn stop(&self) {
        self.trigger.stop.cancel();
        join_task(&self.name, &self.task).await;
    }
}

async fn run<H, C>(
    name: String,
    connector: Arc<C>,
    current: watch::Sender<Option<Arc<H>>>,
    trigger: Trigger,
    ready: oneshot::Sender<()>,
) where
    H: Connection + ?Sized + 'static,
    C: Connector<Handle = H> + ?Sized,
{
    let mut ready = Some(ready);
    let mut armed = false;

    loop {
        if ready.is_none() && !trigger.next(armed).await {
            break;
        }

        let attempt = tokio::select! {
            biased;
            _ = trigger.stop.cancelled() => break,
            attempt = connector.connect() => attempt,
        };

        match attempt {
            Ok(handle) => {
                armed = false;
                let previous = current.send_replace(Some(handle));
                info!(component = %name, "connected");
                if let Some(previous) = previous {
                    previous.close().await;
                }
            }
            Err(err) => {
                armed = true;
                warn!(
                    component = %name,
                    error = %err,
                    retry_in = ?trigger.backoff,
                    "connect failed"
                );
            }
        }

        if let Some(ready) = ready.take() {
            let _ = ready.send(());
        }
    }

    if let Some(handle) = current.send_replace(None) {
        handle.close().await;
    }
    info!(component = %name, "stopped");
}
