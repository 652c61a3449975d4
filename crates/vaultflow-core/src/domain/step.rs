use crate::{CoreError, StepPayload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::workflow::WorkflowId;

/// Value object: Workflow step ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

impl StepId {
    /// Generate a fresh step id
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// All step kinds known to the platform, across every workflow family
///
/// Kinds are fixed at deploy time; they are never constructed dynamically
/// from user input. Every transaction-submitting kind has a paired
/// `Check…Status` kind that polls chain/protocol state for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    /// Root step of every workflow
    Init,

    // grantEthOst
    /// Fund the address with ETH on the origin chain
    GrantEth,
    /// Poll the grantEth transaction
    CheckGrantEthStatus,
    /// Fund the address with OST on the auxiliary chain
    GrantOst,
    /// Poll the grantOst transaction
    CheckGrantOstStatus,

    // stakeAndMint
    /// Approve the gateway composer for the stake amount
    ApproveGatewayComposer,
    /// Poll the approval transaction
    CheckApproveStatus,
    /// Request the stake on the origin chain gateway
    RequestStake,
    /// Poll the stake request transaction and bridge message
    CheckRequestStakeStatus,
    /// Accept the stake on behalf of the facilitator
    AcceptStake,
    /// Poll the acceptance transaction and bridge message
    CheckAcceptStakeStatus,
    /// Commit the origin state root on the auxiliary chain anchor
    CommitStateRoot,
    /// Poll the state root commit transaction
    CheckCommitStateRootStatus,
    /// Progress the stake on the origin gateway
    ProgressStake,
    /// Poll the progress-stake transaction and bridge message
    CheckProgressStakeStatus,
    /// Progress the mint on the auxiliary co-gateway
    ProgressMint,
    /// Poll the progress-mint transaction and bridge message
    CheckProgressMintStatus,

    // logoutSessions
    /// Submit the session logout transaction
    LogoutSessions,
    /// Poll the logout transaction
    CheckLogoutSessionsStatus,

    // initiateRecovery
    /// Submit the recovery initiation transaction
    InitiateRecovery,
    /// Poll the recovery initiation transaction
    CheckInitiateRecoveryStatus,

    /// Terminal step: mark the workflow completed
    MarkSuccess,
    /// Terminal step: run compensations and mark the workflow failed
    MarkFailure,
}

impl StepKind {
    /// Stable wire name, used in topics, messages, and persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Init => "init",
            StepKind::GrantEth => "grantEth",
            StepKind::CheckGrantEthStatus => "checkGrantEthStatus",
            StepKind::GrantOst => "grantOst",
            StepKind::CheckGrantOstStatus => "checkGrantOstStatus",
            StepKind::ApproveGatewayComposer => "approveGatewayComposer",
            StepKind::CheckApproveStatus => "checkApproveStatus",
            StepKind::RequestStake => "requestStake",
            StepKind::CheckRequestStakeStatus => "checkRequestStakeStatus",
            StepKind::AcceptStake => "acceptStake",
            StepKind::CheckAcceptStakeStatus => "checkAcceptStakeStatus",
            StepKind::CommitStateRoot => "commitStateRoot",
            StepKind::CheckCommitStateRootStatus => "checkCommitStateRootStatus",
            StepKind::ProgressStake => "progressStake",
            StepKind::CheckProgressStakeStatus => "checkProgressStakeStatus",
            StepKind::ProgressMint => "progressMint",
            StepKind::CheckProgressMintStatus => "checkProgressMintStatus",
            StepKind::LogoutSessions => "logoutSessions",
            StepKind::CheckLogoutSessionsStatus => "checkLogoutSessionsStatus",
            StepKind::InitiateRecovery => "initiateRecovery",
            StepKind::CheckInitiateRecoveryStatus => "checkInitiateRecoveryStatus",
            StepKind::MarkSuccess => "markSuccess",
            StepKind::MarkFailure => "markFailure",
        }
    }

    /// Whether this is one of the terminal bookkeeping kinds
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepKind::MarkSuccess | StepKind::MarkFailure)
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StepKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "init" => StepKind::Init,
            "grantEth" => StepKind::GrantEth,
            "checkGrantEthStatus" => StepKind::CheckGrantEthStatus,
            "grantOst" => StepKind::GrantOst,
            "checkGrantOstStatus" => StepKind::CheckGrantOstStatus,
            "approveGatewayComposer" => StepKind::ApproveGatewayComposer,
            "checkApproveStatus" => StepKind::CheckApproveStatus,
            "requestStake" => StepKind::RequestStake,
            "checkRequestStakeStatus" => StepKind::CheckRequestStakeStatus,
            "acceptStake" => StepKind::AcceptStake,
            "checkAcceptStakeStatus" => StepKind::CheckAcceptStakeStatus,
            "commitStateRoot" => StepKind::CommitStateRoot,
            "checkCommitStateRootStatus" => StepKind::CheckCommitStateRootStatus,
            "progressStake" => StepKind::ProgressStake,
            "checkProgressStakeStatus" => StepKind::CheckProgressStakeStatus,
            "progressMint" => StepKind::ProgressMint,
            "checkProgressMintStatus" => StepKind::CheckProgressMintStatus,
            "logoutSessions" => StepKind::LogoutSessions,
            "checkLogoutSessionsStatus" => StepKind::CheckLogoutSessionsStatus,
            "initiateRecovery" => StepKind::InitiateRecovery,
            "checkInitiateRecoveryStatus" => StepKind::CheckInitiateRecoveryStatus,
            "markSuccess" => StepKind::MarkSuccess,
            "markFailure" => StepKind::MarkFailure,
            other => return Err(CoreError::UnknownStepKind(other.to_string())),
        };
        Ok(kind)
    }
}

/// Workflow step lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    /// Inserted by the engine, not yet picked up
    Queued,
    /// Handler is running (or crashed mid-run; detected externally)
    InProgress,
    /// Unit of work completed
    TaskDone,
    /// Transaction submitted, awaiting confirmation
    TaskPending,
    /// Unit of work failed
    TaskFailed,
    /// Marked for another attempt
    Retrying,
}

impl StepStatus {
    /// Stable wire name, used in persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Queued => "queued",
            StepStatus::InProgress => "inProgress",
            StepStatus::TaskDone => "taskDone",
            StepStatus::TaskPending => "taskPending",
            StepStatus::TaskFailed => "taskFailed",
            StepStatus::Retrying => "retrying",
        }
    }
}

/// One step invocation within a workflow
///
/// The row is updated in place as the logical step transitions through
/// its statuses; a later poll of a pending step re-enters the same row,
/// it never creates a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique identifier
    pub id: StepId,

    /// Owning workflow
    pub workflow_id: WorkflowId,

    /// The step that scheduled this one; `None` only for the root step
    pub parent_id: Option<StepId>,

    /// Step kind, matching a registry key
    pub kind: StepKind,

    /// Current status
    pub status: StepStatus,

    /// Request params, inherited and merged from the parent
    pub request_params: StepPayload,

    /// The handler's task response data, if any
    pub response_data: Option<StepPayload>,

    /// Hash of the submitted transaction, if any
    pub transaction_hash: Option<String>,

    /// When the step becomes eligible for another poll
    pub unlocked_at: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl WorkflowStep {
    /// Create the root step of a workflow
    pub fn new_root(workflow_id: WorkflowId, kind: StepKind, request_params: StepPayload) -> Self {
        let now = Utc::now();
        Self {
            id: StepId::new(),
            workflow_id,
            parent_id: None,
            kind,
            status: StepStatus::Queued,
            request_params,
            response_data: None,
            transaction_hash: None,
            unlocked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a child step scheduled by `parent`
    pub fn new_child(parent: &WorkflowStep, kind: StepKind, request_params: StepPayload) -> Self {
        let now = Utc::now();
        Self {
            id: StepId::new(),
            workflow_id: parent.workflow_id.clone(),
            parent_id: Some(parent.id.clone()),
            kind,
            status: StepStatus::Queued,
            request_params,
            response_data: None,
            transaction_hash: None,
            unlocked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move the step into `InProgress`
    pub fn mark_in_progress(&mut self) {
        self.status = StepStatus::InProgress;
        self.updated_at = Utc::now();
    }

    /// Record completion with the handler's response data
    pub fn mark_done(&mut self, response_data: Option<StepPayload>) {
        self.status = StepStatus::TaskDone;
        if response_data.is_some() {
            self.response_data = response_data;
        }
        self.updated_at = Utc::now();
    }

    /// Record a submitted-but-unconfirmed transaction
    pub fn mark_pending(&mut self, transaction_hash: Option<String>) {
        self.status = StepStatus::TaskPending;
        if transaction_hash.is_some() {
            self.transaction_hash = transaction_hash;
        }
        self.updated_at = Utc::now();
    }

    /// Record failure
    pub fn mark_failed(&mut self) {
        self.status = StepStatus::TaskFailed;
        self.updated_at = Utc::now();
    }

    /// Whether re-delivery of this step's message may re-run the handler
    ///
    /// A `TaskDone` step is a no-op on redelivery (successors are simply
    /// re-published); a `TaskPending` step re-polls instead of
    /// re-submitting.
    pub fn is_done(&self) -> bool {
        self.status == StepStatus::TaskDone
    }
}
