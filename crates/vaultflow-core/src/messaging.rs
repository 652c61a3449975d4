//! Step-execution message envelope and publisher seam
//!
//! The engine schedules work by publishing one message per successor
//! step. Topic names encode the workflow family so a single worker
//! subscription (e.g. `auxWorkflow.#`) can serve many workflow kinds.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::step::{StepId, StepKind};
use crate::domain::workflow::{WorkflowId, WorkflowKind};
use crate::{CoreError, StepPayload};

/// Message published for one step execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepMessage {
    /// Owning workflow
    pub workflow_id: WorkflowId,

    /// Workflow family, used for router resolution
    pub workflow_kind: WorkflowKind,

    /// The step row this message drives; `None` for the initial message,
    /// which creates the root step
    pub current_step_id: Option<StepId>,

    /// The step that scheduled this one
    pub parent_step_id: Option<StepId>,

    /// The step kind to execute
    pub step_kind: StepKind,

    /// Request params for the step
    pub payload: StepPayload,
}

impl StepMessage {
    /// Build the initial message that kicks off a workflow
    pub fn initial(workflow_id: WorkflowId, workflow_kind: WorkflowKind, payload: StepPayload) -> Self {
        Self {
            workflow_id,
            workflow_kind,
            current_step_id: None,
            parent_step_id: None,
            step_kind: StepKind::Init,
            payload,
        }
    }

    /// Topic this message should be published on
    pub fn topic(&self) -> String {
        topic_for(self.workflow_kind)
    }
}

/// Topic name for a workflow kind, e.g. `auxWorkflow.grantEthOst`
///
/// Origin-chain families publish under `originWorkflow.*`, auxiliary-chain
/// families under `auxWorkflow.*`.
pub fn topic_for(kind: WorkflowKind) -> String {
    let family = match kind {
        WorkflowKind::StakeAndMint => "originWorkflow",
        WorkflowKind::GrantEthOst
        | WorkflowKind::LogoutSessions
        | WorkflowKind::InitiateRecovery => "auxWorkflow",
    };
    format!("{}.{}", family, kind.as_str())
}

/// Publisher seam used by the engine; the worker crate provides the
/// broker-backed implementation.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish a step message on the given topic
    async fn publish(&self, topic: &str, message: &StepMessage) -> Result<(), CoreError>;
}

/// A scheduled-but-possibly-unpublished successor message
///
/// Persisted in the same transaction as the step-status update so that a
/// crash between commit and publish cannot lose a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Unique identifier
    pub id: String,

    /// Owning workflow
    pub workflow_id: WorkflowId,

    /// Topic the message belongs on
    pub topic: String,

    /// The step message itself
    pub message: StepMessage,

    /// Whether the message has been handed to the broker
    pub sent: bool,
}

impl OutboxMessage {
    /// Wrap a step message for outbox persistence
    pub fn new(message: StepMessage) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_id: message.workflow_id.clone(),
            topic: message.topic(),
            message,
            sent: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_encodes_workflow_family() {
        assert_eq!(topic_for(WorkflowKind::GrantEthOst), "auxWorkflow.grantEthOst");
        assert_eq!(
            topic_for(WorkflowKind::StakeAndMint),
            "originWorkflow.stakeAndMint"
        );
        assert_eq!(
            topic_for(WorkflowKind::LogoutSessions),
            "auxWorkflow.logoutSessions"
        );
    }

    #[test]
    fn test_initial_message_targets_init() {
        let msg = StepMessage::initial(
            WorkflowId::new(),
            WorkflowKind::GrantEthOst,
            StepPayload::new(json!({"address": "0xabc"})),
        );
        assert_eq!(msg.step_kind, StepKind::Init);
        assert!(msg.current_step_id.is_none());
        assert_eq!(msg.topic(), "auxWorkflow.grantEthOst");
    }

    #[test]
    fn test_message_round_trip() {
        let msg = StepMessage::initial(
            WorkflowId::new(),
            WorkflowKind::StakeAndMint,
            StepPayload::new(json!({"amount": "1000"})),
        );
        let encoded = serde_json::to_string(&msg).unwrap();
        let decoded: StepMessage = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_outbox_message_starts_unsent() {
        let msg = StepMessage::initial(
            WorkflowId::new(),
            WorkflowKind::GrantEthOst,
            StepPayload::empty(),
        );
        let outbox = OutboxMessage::new(msg.clone());
        assert!(!outbox.sent);
        assert_eq!(outbox.topic, msg.topic());
        assert_eq!(outbox.workflow_id, msg.workflow_id);
    }
}
