//! Test data generators for VaultFlow entities

use serde_json::json;

use vaultflow_core::{StepMessage, StepPayload, Workflow, WorkflowKind};

/// An auxiliary chain id used across tests
pub const TEST_AUX_CHAIN_ID: u64 = 200;

/// Request params for a grantEthOst workflow
pub fn grant_params(address: &str) -> StepPayload {
    StepPayload::new(json!({
        "address": address,
        "clientId": "client-1",
    }))
}

/// Request params for a stakeAndMint workflow
pub fn stake_params(amount: &str, beneficiary: &str) -> StepPayload {
    StepPayload::new(json!({
        "amount": amount,
        "beneficiary": beneficiary,
        "gatewayAddress": "0xgateway",
    }))
}

/// A fresh in-progress workflow of the given kind
pub fn sample_workflow(kind: WorkflowKind) -> Workflow {
    let params = match kind {
        WorkflowKind::GrantEthOst => grant_params("0xholder"),
        WorkflowKind::StakeAndMint => stake_params("1000", "0xbeneficiary"),
        _ => StepPayload::empty(),
    };
    Workflow::new(kind, TEST_AUX_CHAIN_ID, params)
}

/// The initial step message kicking off `workflow`
pub fn initial_message(workflow: &Workflow) -> StepMessage {
    StepMessage::initial(
        workflow.id.clone(),
        workflow.kind,
        workflow.request_params.clone(),
    )
}
