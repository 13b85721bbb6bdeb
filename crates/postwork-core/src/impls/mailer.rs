//! Mail transports.
//!
//! - **LogMailer**: logs the message and reports success (default transport)
//! - **RecordingMailer**: keeps what it was asked to send (tests, demos)
//!
//! Transport retries are driven by the worker, not by the mailers.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::info;

use crate::domain::Message;
use crate::ports::{MailError, Mailer};

#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &Message) -> Result<(), MailError> {
        info!(
            component = "mailer",
            message_id = ?message.id.as_ref().map(|id| id.as_str()),
            from = %message.from,
            to = %message.to,
            subject = %message.subject,
            "mail sent"
        );
        Ok(())
    }
}

#[derive(Default)]
struct Recorded {
    sent: Vec<Message>,
    calls: usize,
    failure: Option<MailError>,
}

/// Records every call; fails with the configured error when one is set.
#[derive(Default)]
pub struct RecordingMailer {
    inner: Mutex<Recorded>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, failure: Option<MailError>) {
        self.lock().failure = failure;
    }

    /// Successfully sent messages.
    pub fn sent(&self) -> Vec<Message> {
        self.lock().sent.clone()
    }

    /// Calls, successful or not.
    pub fn calls(&self) -> usize {
        self.lock().calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &Message) -> Result<(), MailError> {
        let mut recorded = self.lock();
        recorded.calls += 1;
        if let Some(failure) = &recorded.failure {
            return Err(failure.clone());
        }
        recorded.sent.push(message.clone());
        Ok(())
    }
}
