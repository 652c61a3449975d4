use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transaction meta lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxMetaStatus {
    /// Created, nonce not yet allocated
    Queued,
    /// Nonce allocated and transaction handed to the node
    Submitted,
    /// The signer could not be resolved; the owning entity must be rolled back
    RollbackNeeded,
    /// The chain node was unreachable during nonce allocation
    GethDown,
}

impl TxMetaStatus {
    /// Stable wire name, used in persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            TxMetaStatus::Queued => "queued",
            TxMetaStatus::Submitted => "submitted",
            TxMetaStatus::RollbackNeeded => "rollbackNeeded",
            TxMetaStatus::GethDown => "gethDown",
        }
    }
}

/// One blockchain transaction pending submission
///
/// Owned by the sequential nonce manager. At most one process may hold a
/// non-null `lock_id` at a time; a row only leaves `Queued` through a
/// caller that first won the CAS lock. The lock is a one-shot gate, not a
/// re-entrant mutex: it is never cleared without a status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionMeta {
    /// Unique identifier
    pub id: String,

    /// Current status
    pub status: TxMetaStatus,

    /// CAS token held by the process that won the lock
    pub lock_id: Option<String>,

    /// Logical signer address reference (resolved via the key cache)
    pub address_ref: String,

    /// Chain the transaction targets
    pub chain_id: u64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl TransactionMeta {
    /// Create a new queued row for the given signer reference
    pub fn new_queued(address_ref: impl Into<String>, chain_id: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            status: TxMetaStatus::Queued,
            lock_id: None,
            address_ref: address_ref.into(),
            chain_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the row is still eligible for the CAS lock
    pub fn is_lockable(&self) -> bool {
        self.lock_id.is_none() && self.status == TxMetaStatus::Queued
    }
}

/// Generate a unique CAS lock token
pub fn new_lock_token() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_queued_is_lockable() {
        let meta = TransactionMeta::new_queued("tokenHolder:42", 200);
        assert_eq!(meta.status, TxMetaStatus::Queued);
        assert!(meta.is_lockable());
    }

    #[test]
    fn test_locked_row_is_not_lockable() {
        let mut meta = TransactionMeta::new_queued("tokenHolder:42", 200);
        meta.lock_id = Some(new_lock_token());
        assert!(!meta.is_lockable());
    }

    #[test]
    fn test_non_queued_row_is_not_lockable() {
        let mut meta = TransactionMeta::new_queued("tokenHolder:42", 200);
        meta.status = TxMetaStatus::GethDown;
        assert!(!meta.is_lockable());
    }
}
