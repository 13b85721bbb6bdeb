//! postwork-core
//!
//! Core building blocks for the postwork mail dispatch service.
//!
//! # Modules
//! - **domain**: message model, identifiers, status state machine, queue envelope
//! - **ports**: seams to the broker, the message store and the mail transport
//! - **app**: connection supervisors, worker pipeline, application builder
//! - **api**: HTTP routers
//! - **impls**: in-memory adapters plus feature-gated kafka / postgres ones
//! - **config**, **error**, **observability**: shared plumbing

pub mod api;
pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{App, AppBuilder, BuildError};
pub use config::ServiceConfig;
pub use error::{Error, ErrorKind, Result};
