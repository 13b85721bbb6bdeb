//! Mailer port - the pluggable delivery transport.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::Message;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailError {
    /// The transport could not be reached; another attempt may succeed.
    #[error("mail transport unavailable: {0}")]
    Unavailable(String),

    /// The transport refused the message.
    #[error("mail rejected: {0}")]
    Rejected(String),
}

impl MailError {
    pub fn is_transient(&self) -> bool {
        matches!(self, MailError::Unavailable(_))
    }
}

/// Delivers one message. The worker calls it again only after a transient
/// failure.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &Message) -> Result<(), MailError>;
}

#[async_trait]
impl<M: Mailer + ?Sized> Mailer for Arc<M> {
    async fn send(&self, message: &Message) -> Result<(), MailError> {
        (**self).send(message).await
    }
}
