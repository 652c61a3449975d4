use thiserror::Error;

/// Core error type for the VaultFlow engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Workflow not found
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Workflow step not found
    #[error("Workflow step not found: {0}")]
    StepNotFound(String),

    /// Step kind is not present in the registry (programming error)
    #[error("Unknown step kind: {0}")]
    UnknownStepKind(String),

    /// No handler registered for a step kind (programming error)
    #[error("No handler registered for step kind: {0}")]
    HandlerNotFound(String),

    /// A declared read-data-from ancestor is missing or not done (misconfigured graph)
    #[error("Missing step data: {0}")]
    MissingStepData(String),

    /// Invalid state transition on a workflow or step
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// State store error
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Message broker error
    #[error("Broker error: {0}")]
    BrokerError(String),

    /// Chain RPC error
    #[error("Chain client error: {0}")]
    ChainClientError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A worker process with the same id and kind is already running
    #[error("Process already running: {0}")]
    ProcessAlreadyRunning(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Fatal errors indicate engine/programming bugs. They must never be
    /// converted into business failures: masking them risks inconsistent
    /// on-chain/off-chain state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::UnknownStepKind(_)
                | CoreError::HandlerNotFound(_)
                | CoreError::MissingStepData(_)
                | CoreError::ProcessAlreadyRunning(_)
        )
    }

    /// Transient infrastructure errors: the message should stay unacked or
    /// be requeued, and the step will be retried on redelivery.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::StateStoreError(_)
                | CoreError::BrokerError(_)
                | CoreError::ChainClientError(_)
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}

/// Error type returned by the sequential nonce manager
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NonceError {
    /// Another process holds the CAS lock for this transaction meta row
    #[error("Nonce lock contended for address ref {0}")]
    LockContended(String),

    /// The chain node could not be reached for the initial nonce fetch
    #[error("Chain node unreachable: {0}")]
    NodeUnreachable(String),

    /// The signer address reference could not be resolved
    #[error("Signer could not be resolved: {0}")]
    SignerUnresolvable(String),

    /// The allocation queue for this signer is gone
    #[error("Nonce queue closed for address ref {0}")]
    QueueClosed(String),

    /// Unexpected failure while processing the queue head
    #[error("Nonce allocation failed: {0}")]
    Internal(String),
}

impl NonceError {
    /// Whether the caller may retry the allocation later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NonceError::NodeUnreachable(_) | NonceError::LockContended(_)
        )
    }
}
