use crate::{CoreError, StepPayload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Value object: Workflow ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    /// Generate a fresh workflow id
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The externally triggered business process families the platform runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowKind {
    /// Stake value tokens on the origin chain and mint on the auxiliary chain
    StakeAndMint,
    /// Fund a token holder address with base currency on both chains
    GrantEthOst,
    /// Revoke all active sessions for a user
    LogoutSessions,
    /// Start device/wallet recovery
    InitiateRecovery,
}

impl WorkflowKind {
    /// All known workflow kinds
    pub const ALL: [WorkflowKind; 4] = [
        WorkflowKind::StakeAndMint,
        WorkflowKind::GrantEthOst,
        WorkflowKind::LogoutSessions,
        WorkflowKind::InitiateRecovery,
    ];

    /// Stable wire name, used in topics and persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::StakeAndMint => "stakeAndMint",
            WorkflowKind::GrantEthOst => "grantEthOst",
            WorkflowKind::LogoutSessions => "logoutSessions",
            WorkflowKind::InitiateRecovery => "initiateRecovery",
        }
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for WorkflowKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stakeAndMint" => Ok(WorkflowKind::StakeAndMint),
            "grantEthOst" => Ok(WorkflowKind::GrantEthOst),
            "logoutSessions" => Ok(WorkflowKind::LogoutSessions),
            "initiateRecovery" => Ok(WorkflowKind::InitiateRecovery),
            other => Err(CoreError::ValidationError(format!(
                "Unknown workflow kind: {}",
                other
            ))),
        }
    }
}

/// Workflow lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    /// The workflow is being driven through its steps
    InProgress,
    /// The terminal success step ran
    Completed,
    /// The terminal failure step ran
    Failed,
}

impl WorkflowStatus {
    /// Stable wire name, used in persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::InProgress => "inProgress",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        }
    }
}

/// Aggregate: one externally triggered, multi-step business process
///
/// Created by the triggering caller before the first step message is
/// published. `request_params` is immutable after creation; status is
/// mutated only by the engine's terminal steps. Workflows are never
/// deleted (audit trail).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier
    pub id: WorkflowId,

    /// The business process family this instance belongs to
    pub kind: WorkflowKind,

    /// Current status
    pub status: WorkflowStatus,

    /// Top-level request parameters, immutable after creation
    pub request_params: StepPayload,

    /// Chain the workflow primarily operates on
    pub chain_id: u64,

    /// Owning client, if any
    pub client_id: Option<String>,

    /// Token the workflow operates on, if any
    pub token_id: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Create a new in-progress workflow
    pub fn new(kind: WorkflowKind, chain_id: u64, request_params: StepPayload) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            kind,
            status: WorkflowStatus::InProgress,
            request_params,
            chain_id,
            client_id: None,
            token_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark the workflow completed; only valid from `InProgress`
    pub fn complete(&mut self) -> Result<(), CoreError> {
        if self.status != WorkflowStatus::InProgress {
            return Err(CoreError::InvalidTransition(format!(
                "Cannot complete workflow {} in status {:?}",
                self.id, self.status
            )));
        }
        self.status = WorkflowStatus::Completed;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the workflow failed; only valid from `InProgress`
    pub fn fail(&mut self) -> Result<(), CoreError> {
        if self.status != WorkflowStatus::InProgress {
            return Err(CoreError::InvalidTransition(format!(
                "Cannot fail workflow {} in status {:?}",
                self.id, self.status
            )));
        }
        self.status = WorkflowStatus::Failed;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Whether the workflow reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status != WorkflowStatus::InProgress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_workflow_is_in_progress() {
        let wf = Workflow::new(
            WorkflowKind::GrantEthOst,
            200,
            StepPayload::new(json!({"address": "0xabc"})),
        );
        assert_eq!(wf.status, WorkflowStatus::InProgress);
        assert!(!wf.is_terminal());
        assert_eq!(wf.chain_id, 200);
    }

    #[test]
    fn test_complete_then_fail_rejected() {
        let mut wf = Workflow::new(WorkflowKind::LogoutSessions, 200, StepPayload::empty());
        wf.complete().unwrap();
        assert_eq!(wf.status, WorkflowStatus::Completed);
        assert!(wf.is_terminal());

        let err = wf.fail().unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition(_)));
    }

    #[test]
    fn test_fail_transition() {
        let mut wf = Workflow::new(WorkflowKind::StakeAndMint, 1, StepPayload::empty());
        wf.fail().unwrap();
        assert_eq!(wf.status, WorkflowStatus::Failed);
        assert!(wf.complete().is_err());
    }

    #[test]
    fn test_workflow_kind_round_trip() {
        for kind in WorkflowKind::ALL {
            let parsed: WorkflowKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("unknownKind".parse::<WorkflowKind>().is_err());
    }
}
