//! Seams to the external chain collaborators
//!
//! The engine never talks JSON-RPC itself; it consumes these traits.
//! Production implementations wrap the node clients and the key cache,
//! test doubles live in `vaultflow-test-utils`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::CoreError;

/// Execution status recorded in a mined transaction receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    /// The transaction executed successfully
    Succeeded,
    /// The transaction reverted
    Failed,
}

/// A mined transaction receipt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionReceipt {
    /// Hash of the transaction
    pub transaction_hash: String,
    /// Execution outcome
    pub status: ReceiptStatus,
    /// Block the transaction was mined in
    pub block_number: u64,
}

/// Protocol-level status of a bridge message
///
/// Independent of any one transaction receipt: a message can have
/// progressed even when the receipt lookup for the submitting
/// transaction fails transiently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    /// Not yet declared on the gateway
    Undeclared,
    /// Declared, awaiting progress
    Declared,
    /// Progressed to the far side
    Progressed,
    /// Revocation has been declared
    RevocationDeclared,
    /// Revoked
    Revoked,
}

/// Read access to chain state
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Fetch the receipt for a transaction, `None` while unmined
    async fn transaction_receipt(
        &self,
        chain_id: u64,
        transaction_hash: &str,
    ) -> Result<Option<TransactionReceipt>, CoreError>;

    /// Fetch the protocol-level status of a bridge message
    async fn message_status(
        &self,
        chain_id: u64,
        message_hash: &str,
    ) -> Result<MessageStatus, CoreError>;
}

/// Source of the next account nonce for a signer address
#[async_trait]
pub trait NonceSource: Send + Sync {
    /// Ask the chain node for the next nonce of `address`
    async fn next_nonce(&self, chain_id: u64, address: &str) -> Result<u64, CoreError>;
}

/// Resolves a logical signer reference to a concrete address
///
/// Backed by the key/address cache in production.
#[async_trait]
pub trait SignerResolver: Send + Sync {
    /// Resolve `address_ref` (e.g. `tokenHolder:42`) to an address
    async fn resolve(&self, chain_id: u64, address_ref: &str) -> Result<String, CoreError>;
}

/// Per-chain endpoint configuration, provided by the config strategy
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChainEndpoints {
    /// RPC endpoint per chain id
    #[serde(default)]
    pub rpc_endpoints: HashMap<u64, String>,
}

impl ChainEndpoints {
    /// Look up the RPC endpoint for a chain
    pub fn rpc_for(&self, chain_id: u64) -> Result<&str, CoreError> {
        self.rpc_endpoints
            .get(&chain_id)
            .map(|s| s.as_str())
            .ok_or_else(|| {
                CoreError::ConfigurationError(format!("No RPC endpoint for chain {}", chain_id))
            })
    }
}

/// Generic object cache with TTL semantics, consumed as-is by step
/// handlers; the engine itself never caches
#[async_trait]
pub trait ObjectCache: Send + Sync {
    /// Fetch a cached value
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CoreError>;

    /// Store a value with a TTL in seconds
    async fn set(&self, key: &str, value: serde_json::Value, ttl_secs: u64)
        -> Result<(), CoreError>;

    /// Drop a cached value
    async fn del(&self, key: &str) -> Result<(), CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_endpoints_lookup() {
        let mut endpoints = ChainEndpoints::default();
        endpoints
            .rpc_endpoints
            .insert(200, "ws://aux-node:8546".to_string());

        assert_eq!(endpoints.rpc_for(200).unwrap(), "ws://aux-node:8546");
        assert!(matches!(
            endpoints.rpc_for(1).unwrap_err(),
            CoreError::ConfigurationError(_)
        ));
    }
}
