//! App - supervision core and worker pipeline.
//!
//! # Components
//! - **Supervisor**: keeps one live handle to a flaky dependency
//! - **ProducerManager** / **DatabaseManager**: supervised producer and store
//! - **ConsumerManager**: supervised topic attach, hands subscriptions over
//! - **Worker**: consumes references and drives the status state machine
//! - **AppBuilder**: wiring with fail-fast validation

pub mod builder;
pub mod consumer;
pub mod database;
pub mod producer;
pub mod retry;
pub mod supervisor;
pub mod worker_loop;

pub use self::builder::{App, AppBuilder, BuildError};
pub use self::consumer::ConsumerManager;
pub use self::database::DatabaseManager;
pub use self::producer::ProducerManager;
pub use self::retry::RetryPolicy;
pub use self::supervisor::Supervisor;
pub use self::worker_loop::{Worker, WorkerHandle};
