//! Connection port - what a supervisor needs from an external dependency.
//!
//! A [`Connector`] knows how to build a fresh handle; the handle itself only
//! has to report liveness and release its resources on `close`.
//!
//! # Implementations
//! - **in-memory**: `impls::memory_broker`, `impls::memory_store`
//! - **kafka** (feature): `impls::kafka`
//! - **postgres** (feature): `impls::postgres`

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Error;

/// A live handle to an external dependency.
///
/// Handles are shared (`Arc`) between many callers, so every method takes
/// `&self`.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Whether the handle still believes it is usable.
    fn is_connected(&self) -> bool {
        true
    }

    /// Release the underlying resources. Called once, after the handle has
    /// been superseded or on shutdown.
    async fn close(&self) {}
}

/// Builds fresh handles for a [`Supervisor`](crate::app::Supervisor).
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Handle: Connection + ?Sized + 'static;

    /// One connection attempt. Must not retry internally.
    async fn connect(&self) -> Result<Arc<Self::Handle>, Error>;
}
