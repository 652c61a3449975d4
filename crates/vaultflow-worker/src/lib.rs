//! Message-driven workflow worker for the VaultFlow platform
//!
//! A worker subscribes to one or more step topics, routes every
//! delivery through the matching [`vaultflow_core::WorkflowRouter`],
//! and self-terminates after a configured lifetime so the process
//! manager can recycle it. The process registry guards against two
//! workers of the same identity running at once.

use thiserror::Error;
use vaultflow_core::CoreError;

pub mod broker;
pub mod config;
pub mod dispatch;

pub use broker::{BrokerPublisher, Delivery, MemoryBroker, MessageBroker};
pub use config::WorkerConfig;
pub use dispatch::DispatchWorker;

/// Worker error types
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Broker connectivity or delivery error
    #[error("Broker error: {0}")]
    BrokerError(String),

    /// A worker with the same identity is already active
    #[error("Worker already running: {0}")]
    AlreadyRunning(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Error raised by the engine
    #[error("Engine error: {0}")]
    CoreError(#[from] CoreError),
}

/// Result alias for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Install the global tracing subscriber with the given default filter
///
/// `RUST_LOG` overrides the default. Safe to call more than once; later
/// calls are ignored.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
