//! Message model: the persisted entity and partial updates to it.

use serde::{Deserialize, Serialize};

use super::{MessageId, Status};
use crate::error::Error;

/// A mail message as stored in the `messages` table.
///
/// Created by the HTTP layer with `Status::New`, mutated only by the worker,
/// never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Assigned on insert when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,

    pub subject: String,

    pub text: String,

    pub from: String,

    #[serde(rename = "recipients")]
    pub to: String,

    #[serde(default)]
    pub status: Status,
}

impl Message {
    pub fn new(
        subject: impl Into<String>,
        text: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            subject: subject.into(),
            text: text.into(),
            from: from.into(),
            to: to.into(),
            status: Status::New,
        }
    }

    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = Some(id);
        self
    }

    /// Check that `from` and `to` are both valid address lists.
    pub fn validate(&self) -> Result<(), Error> {
        validate_address_list(&self.from)
            .map_err(|e| Error::validation(format!("From: {}", e.message())))?;
        validate_address_list(&self.to)
            .map_err(|e| Error::validation(format!("To: {}", e.message())))?;
        Ok(())
    }

    /// Overwrite every field present in `changes`.
    pub fn apply(&mut self, changes: &MessageChanges) {
        if let Some(subject) = &changes.subject {
            self.subject.clone_from(subject);
        }
        if let Some(text) = &changes.text {
            self.text.clone_from(text);
        }
        if let Some(from) = &changes.from {
            self.from.clone_from(from);
        }
        if let Some(to) = &changes.to {
            self.to.clone_from(to);
        }
        if let Some(status) = changes.status {
            self.status = status;
        }
    }
}

/// A partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

impl MessageChanges {
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Response body for an accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessageResponse {
    pub id: MessageId,
    pub message: String,
}

/// Parse an RFC 5322 address list (`a@x.com, Name <b@y.org>`).
pub fn validate_address_list(value: &str) -> Result<(), Error> {
    let list = mailparse::addrparse(value)
        .map_err(|e| Error::validation(format!("'{value}': {e}")))?;

    let mut seen = 0usize;
    for addr in list.iter() {
        let singles = match addr {
            mailparse::MailAddr::Single(info) => std::slice::from_ref(info),
            mailparse::MailAddr::Group(group) => group.addrs.as_slice(),
        };
        for info in singles {
            if !is_plausible_addr_spec(&info.addr) {
                return Err(Error::validation(format!(
                    "'{value}': invalid address '{}'",
                    info.addr
                )));
            }
            seen += 1;
        }
    }

    if seen == 0 {
        return Err(Error::validation(format!("'{value}': no address")));
    }
    Ok(())
}

fn is_plausible_addr_spec(addr: &str) -> bool {
    match addr.rsplit_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !addr.chars().any(char::is_whitespace)
        }
        None => false,
    }
}
