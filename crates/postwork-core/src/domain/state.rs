//! Delivery status state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Delivery status of a message.
///
/// State transitions:
/// - New -> Sending -> Delivered
/// - New -> Sending -> Undeliverable
///
/// `New` is written by the HTTP layer, `Sending` and the terminal states by
/// the worker. Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Status {
    #[default]
    #[serde(rename = "NEW")]
    New,

    #[serde(rename = "SENDING")]
    Sending,

    #[serde(rename = "DELIVERED")]
    Delivered,

    #[serde(rename = "UN-DELIVERABLE")]
    Undeliverable,
}

impl Status {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Delivered | Status::Undeliverable)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: Status) -> bool {
        match (self, next) {
            (Status::New, Status::Sending) => true,
            (Status::Sending, Status::Delivered | Status::Undeliverable) => true,
            // at-least-once redelivery may rewrite SENDING
            (Status::Sending, Status::Sending) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::New => "NEW",
            Status::Sending => "SENDING",
            Status::Delivered => "DELIVERED",
            Status::Undeliverable => "UN-DELIVERABLE",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(Status::New),
            "SENDING" => Ok(Status::Sending),
            "DELIVERED" => Ok(Status::Delivered),
            "UN-DELIVERABLE" => Ok(Status::Undeliverable),
            other => Err(Error::validation(format!("unknown status '{other}'"))),
        }
    }
}
