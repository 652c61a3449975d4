//!
//! VaultFlow Core - durable workflow orchestration for the VaultFlow platform
//!
//! This crate defines the workflow engine, the domain models it persists,
//! the declarative step-transition registries, and the sequential nonce
//! manager. Business step logic lives outside the engine and is invoked
//! through the [`StepHandler`] contract.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use std::sync::Arc;

/// Domain layer - core business models, entities, and rules
pub mod domain;

/// Application services - engine, confirmation checks, nonce manager
pub mod application;

/// Seams to chain collaborators
pub mod chain;

/// Core types
pub mod types;

/// Error types
pub mod error;

/// Step message envelope and publisher seam
pub mod messaging;

// Re-export key types
pub use error::{CoreError, NonceError};
pub use types::StepPayload;

pub use domain::repository::{
    OutboxRepository, ProcessRegistry, TransactionMetaRepository, WorkflowRepository,
    WorkflowStepRepository,
};
pub use domain::step::{StepId, StepKind, StepStatus, WorkflowStep};
pub use domain::step_registry::{StepRegistry, TransitionRule};
pub use domain::transaction_meta::{TransactionMeta, TxMetaStatus};
pub use domain::workflow::{Workflow, WorkflowId, WorkflowKind, WorkflowStatus};

pub use application::confirmation::{Confirmation, ConfirmationChecker};
pub use application::nonce_manager::NonceManager;
pub use application::router::WorkflowRouter;

pub use messaging::{MessagePublisher, OutboxMessage, StepMessage};

/// Task status reported by a step handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// The unit of work completed synchronously
    TaskDone,
    /// A transaction was submitted but is not yet confirmed
    TaskPending,
    /// The unit of work failed for a business reason
    TaskFailed,
    /// The unit of work has not started yet (queued for a later poll)
    TaskReadyToStart,
}

/// Outcome of one step handler invocation
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// How the unit of work ended
    pub task_status: TaskStatus,

    /// Hash of the submitted transaction, required with `TaskPending`
    pub transaction_hash: Option<String>,

    /// Data persisted on the step row and exposed to `read_data_from`
    /// descendants
    pub task_response_data: Option<StepPayload>,

    /// Data surfaced to the triggering caller, never read by the engine
    pub fe_response_data: Option<StepPayload>,
}

impl StepOutcome {
    /// A synchronously completed unit of work
    pub fn done(task_response_data: Option<StepPayload>) -> Self {
        Self {
            task_status: TaskStatus::TaskDone,
            transaction_hash: None,
            task_response_data,
            fe_response_data: None,
        }
    }

    /// A submitted-but-unconfirmed transaction
    pub fn pending(transaction_hash: impl Into<String>) -> Self {
        Self {
            task_status: TaskStatus::TaskPending,
            transaction_hash: Some(transaction_hash.into()),
            task_response_data: None,
            fe_response_data: None,
        }
    }

    /// A failed unit of work
    pub fn failed() -> Self {
        Self {
            task_status: TaskStatus::TaskFailed,
            transaction_hash: None,
            task_response_data: None,
            fe_response_data: None,
        }
    }

    /// Attach response data to the outcome
    pub fn with_response(mut self, data: StepPayload) -> Self {
        self.task_response_data = Some(data);
        self
    }
}

/// The uniform contract every business-logic unit implements
///
/// Handlers never touch the registry, the broker, or step persistence;
/// they receive merged request params and report a structured outcome.
/// Expected business failures are reported as `TaskFailed`, never as
/// `Err` - `Err` is reserved for truly unexpected conditions, which the
/// engine converts into a generic failed-step outcome.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// The step kind this handler serves
    fn step_kind(&self) -> StepKind;

    /// Run the unit of work with the merged request params
    async fn perform(&self, params: &StepPayload) -> Result<StepOutcome, CoreError>;
}

/// Factory function resolving a step kind to its handler
///
/// Built once at startup as a compile-time registry; dynamic lookup by
/// string never happens.
pub type HandlerFactory =
    Arc<dyn Fn(StepKind) -> Result<Arc<dyn StepHandler>, CoreError> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_constructors() {
        let done = StepOutcome::done(Some(StepPayload::new(json!({"ok": true}))));
        assert_eq!(done.task_status, TaskStatus::TaskDone);
        assert!(done.transaction_hash.is_none());

        let pending = StepOutcome::pending("0xabc");
        assert_eq!(pending.task_status, TaskStatus::TaskPending);
        assert_eq!(pending.transaction_hash.as_deref(), Some("0xabc"));

        let failed = StepOutcome::failed();
        assert_eq!(failed.task_status, TaskStatus::TaskFailed);
        assert!(failed.task_response_data.is_none());
    }

    #[test]
    fn test_with_response() {
        let outcome = StepOutcome::pending("0xabc").with_response(StepPayload::new(json!({
            "messageHash": "0xdef"
        })));
        assert_eq!(
            outcome.task_response_data.unwrap().get_str("messageHash"),
            Some("0xdef")
        );
    }
}
