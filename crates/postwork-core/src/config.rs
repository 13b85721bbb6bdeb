//! Resolved service configuration.
//!
//! The binary parses flags and environment; the core only sees final values.

use std::time::Duration;

use crate::app::RetryPolicy;

pub const DEFAULT_PRODUCER_BACKOFF: Duration = Duration::from_secs(2);
pub const DEFAULT_DATABASE_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_CONSUMER_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_STATUS_RETRY_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_TRANSPORT_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Wait after a failed producer connect.
    pub producer_backoff: Duration,

    pub database_backoff: Duration,

    pub consumer_backoff: Duration,

    /// Fixed wait between storage retries in the worker.
    pub status_retry_interval: Duration,

    /// Run `ensure_schema` on every fresh store session.
    pub auto_create_schema: bool,

    /// Total attempts per mail delivery (1 disables retrying).
    pub transport_attempts: u32,

    pub transport_retry: RetryPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            producer_backoff: DEFAULT_PRODUCER_BACKOFF,
            database_backoff: DEFAULT_DATABASE_BACKOFF,
            consumer_backoff: DEFAULT_CONSUMER_BACKOFF,
            status_retry_interval: DEFAULT_STATUS_RETRY_INTERVAL,
            auto_create_schema: true,
            transport_attempts: DEFAULT_TRANSPORT_ATTEMPTS,
            transport_retry: RetryPolicy::default(),
        }
    }
}

impl ServiceConfig {
    /// Same backoff for all three supervisors.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.producer_backoff = backoff;
        self.database_backoff = backoff;
        self.consumer_backoff = backoff;
        self
    }

    pub fn with_status_retry_interval(mut self, interval: Duration) -> Self {
        self.status_retry_interval = interval;
        self
    }

    pub fn with_auto_create_schema(mut self, enabled: bool) -> Self {
        self.auto_create_schema = enabled;
        self
    }

    pub fn with_transport_attempts(mut self, attempts: u32) -> Self {
        self.transport_attempts = attempts.max(1);
        self
    }
}
