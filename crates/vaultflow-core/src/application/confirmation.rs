//! Dual-check confirmation for submitted transactions
//!
//! A status-check step first looks at the transaction receipt. When the
//! receipt is absent or failed, it consults the protocol-level bridge
//! message status against a per-step-kind allow-list: if the protocol
//! state shows the effect already landed, the step is still treated as
//! succeeded. Transient RPC failures must not be conflated with genuine
//! transaction failure - this is the one place where "failure" is
//! deliberately downgraded to "success" based on independent evidence.

use std::sync::Arc;

use crate::chain::{ChainClient, MessageStatus, ReceiptStatus};
use crate::domain::step::StepKind;
use crate::CoreError;

/// Result of a confirmation poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The effect landed on chain
    Confirmed,
    /// Not yet decided; poll again later
    Pending,
    /// The transaction genuinely failed
    Failed,
}

/// Protocol message statuses that count as success for a check kind
///
/// These allow-lists are deliberately hard-coded per step kind; they
/// mirror the protocol's message lifecycle rather than being inferred.
pub fn allowed_message_statuses(kind: StepKind) -> &'static [MessageStatus] {
    match kind {
        StepKind::CheckRequestStakeStatus | StepKind::CheckAcceptStakeStatus => {
            &[MessageStatus::Declared, MessageStatus::Progressed]
        }
        StepKind::CheckProgressStakeStatus | StepKind::CheckProgressMintStatus => {
            &[MessageStatus::Progressed]
        }
        _ => &[],
    }
}

/// Polls chain receipt and protocol state for a status-check step
pub struct ConfirmationChecker {
    chain_client: Arc<dyn ChainClient>,
}

impl ConfirmationChecker {
    /// Create a checker over a chain client
    pub fn new(chain_client: Arc<dyn ChainClient>) -> Self {
        Self { chain_client }
    }

    /// Run the dual check for one submitted transaction
    ///
    /// `message_hash` is the bridge message hash when the step kind has a
    /// protocol-level fallback; `None` restricts the check to the receipt.
    pub async fn confirm(
        &self,
        chain_id: u64,
        check_kind: StepKind,
        transaction_hash: &str,
        message_hash: Option<&str>,
    ) -> Result<Confirmation, CoreError> {
        let receipt = match self
            .chain_client
            .transaction_receipt(chain_id, transaction_hash)
            .await
        {
            Ok(receipt) => receipt,
            Err(err) => {
                // A failed receipt lookup is not a failed transaction.
                tracing::warn!(
                    chain_id,
                    transaction_hash = %transaction_hash,
                    error = %err,
                    "Receipt lookup failed, falling back to protocol state"
                );
                return self
                    .protocol_fallback(chain_id, check_kind, message_hash, Confirmation::Pending)
                    .await;
            }
        };

        match receipt {
            Some(receipt) if receipt.status == ReceiptStatus::Succeeded => {
                tracing::debug!(
                    chain_id,
                    transaction_hash = %transaction_hash,
                    block_number = receipt.block_number,
                    "Transaction confirmed by receipt"
                );
                Ok(Confirmation::Confirmed)
            }
            Some(_) => {
                // Reverted on chain; protocol state may still show the
                // effect landed through another path.
                self.protocol_fallback(chain_id, check_kind, message_hash, Confirmation::Failed)
                    .await
            }
            None => {
                self.protocol_fallback(chain_id, check_kind, message_hash, Confirmation::Pending)
                    .await
            }
        }
    }

    async fn protocol_fallback(
        &self,
        chain_id: u64,
        check_kind: StepKind,
        message_hash: Option<&str>,
        default: Confirmation,
    ) -> Result<Confirmation, CoreError> {
        let allowed = allowed_message_statuses(check_kind);
        let Some(message_hash) = message_hash else {
            return Ok(default);
        };
        if allowed.is_empty() {
            return Ok(default);
        }

        let status = self
            .chain_client
            .message_status(chain_id, message_hash)
            .await?;

        if allowed.contains(&status) {
            tracing::info!(
                chain_id,
                message_hash = %message_hash,
                ?status,
                "Protocol state shows effect landed, overriding receipt"
            );
            Ok(Confirmation::Confirmed)
        } else if matches!(
            status,
            MessageStatus::RevocationDeclared | MessageStatus::Revoked
        ) {
            Ok(Confirmation::Failed)
        } else {
            Ok(default)
        }
    }
}
