//! ConsumerManager - supervised attach to the topic.
//!
//! Same reconnect discipline as [`Supervisor`](super::Supervisor), but a
//! successful attach yields a [`Subscription`] that is handed to the worker
//! instead of a shared handle. The worker keeps only the newest one; older
//! subscriptions are dropped without draining.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::supervisor::{Trigger, join_task};
use crate::ports::{StreamConnector, Subscription};

const NAME: &str = "consumer";

pub struct ConsumerManager {
    trigger: Trigger,
    connected: Arc<AtomicBool>,
    subscriptions: Mutex<Option<mpsc::UnboundedReceiver<Subscription>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConsumerManager {
    /// Spawn the attach task and return once the first attempt finished.
    pub async fn start(
        connector: Arc<dyn StreamConnector>,
        backoff: Duration,
        token: &CancellationToken,
    ) -> Self {
        let trigger = Trigger::new(token, backoff);
        let connected = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = tokio::spawn(run(
            connector,
            tx,
            trigger.clone(),
            Arc::clone(&connected),
            ready_tx,
        ));
        let _ = ready_rx.await;

        Self {
            trigger,
            connected,
            subscriptions: Mutex::new(Some(rx)),
            task: Mutex::new(Some(task)),
        }
    }

    /// Request a fresh attach. The current subscription counts as lost.
    pub fn signal(&self) {
        debug!(component = NAME, "reattach requested");
        self.connected.store(false, Ordering::SeqCst);
        self.trigger.fire();
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The hand-off channel. Only the first caller gets it.
    pub fn take_subscriptions(&self) -> Option<mpsc::UnboundedReceiver<Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub async fn stop(&self) {
        self.trigger.stop.cancel();
        join_task(NAME, &self.task).await;
        self.connected.store(false, Ordering::SeqCst);
    }
}

async fn run(
    connector: Arc<dyn StreamConnector>,
    subscriptions: mpsc::UnboundedSender<Subscription>,
    trigger: Trigger,
    connected: Arc<AtomicBool>,
    ready: oneshot::Sender<()>,
) {
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
            Ok(subscription) => {
                armed = false;
                if subscriptions.send(subscription).is_err() {
                    debug!(component = NAME, "no worker listening; subscription dropped");
                }
                connected.store(true, Ordering::SeqCst);
                info!(component = NAME, "attached");
            }
            Err(err) => {
                armed = true;
                connected.store(false, Ordering::SeqCst);
                warn!(
                    component = NAME,
                    error = %err,
                    retry_in = ?trigger.backoff,
                    "attach failed"
                );
            }
        }

        if let Some(ready) = ready.take() {
            let _ = ready.send(());
        }
    }

    connected.store(false, Ordering::SeqCst);
    info!(component = NAME, "stopped");
}
