//! Message identifiers.
//!
//! An identifier is 128 random bits rendered as base-32. 128 bits encode to
//! exactly 26 base-32 characters, so every identifier has the same length and
//! validation can reject anything else before it reaches storage.
//!
//! The rendering reuses ULID's Crockford base-32 codec: a ULID built from a
//! random `u128` carries no timestamp semantics, only the encoding.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::Error;

/// Length of every valid identifier.
pub const MESSAGE_ID_LEN: usize = 26;

/// Identifier of a persisted [`Message`](super::Message).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId(String);

impl MessageId {
    /// Fresh identifier from 128 bits of randomness.
    pub fn random() -> Self {
        Self::from_ulid(Ulid::from(rand::random::<u128>()))
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid.to_string())
    }

    /// Validate an identifier received from the outside world.
    pub fn parse(value: &str) -> Result<Self, Error> {
        if value.len() != MESSAGE_ID_LEN {
            return Err(Error::validation(format!(
                "invalid message id '{value}': expected {MESSAGE_ID_LEN} characters, got {}",
                value.len()
            )));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MessageId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MessageId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
