//! Programmable fake chain client and nonce source

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use vaultflow_core::chain::{
    ChainClient, MessageStatus, NonceSource, ObjectCache, ReceiptStatus, SignerResolver,
    TransactionReceipt,
};
use vaultflow_core::CoreError;

/// In-memory chain client with programmable receipts and message states
///
/// Unknown transaction hashes read as unmined; unknown message hashes
/// read as `Undeclared`, matching a gateway that has not seen the
/// message yet.
#[derive(Default)]
pub struct FakeChainClient {
    receipts: DashMap<String, TransactionReceipt>,
    message_statuses: DashMap<String, MessageStatus>,
}

impl FakeChainClient {
    /// Create a fake with no programmed state
    pub fn new() -> Self {
        Self::default()
    }

    /// Program a mined receipt for a transaction hash
    pub fn mine(&self, transaction_hash: &str, status: ReceiptStatus) {
        self.receipts.insert(
            transaction_hash.to_string(),
            TransactionReceipt {
                transaction_hash: transaction_hash.to_string(),
                status,
                block_number: 1 + self.receipts.len() as u64,
            },
        );
    }

    /// Program the protocol status of a bridge message
    pub fn set_message_status(&self, message_hash: &str, status: MessageStatus) {
        self.message_statuses
            .insert(message_hash.to_string(), status);
    }
}

#[async_trait]
impl ChainClient for FakeChainClient {
    async fn transaction_receipt(
        &self,
        _chain_id: u64,
        transaction_hash: &str,
    ) -> Result<Option<TransactionReceipt>, CoreError> {
        Ok(self.receipts.get(transaction_hash).map(|r| r.clone()))
    }

    async fn message_status(
        &self,
        _chain_id: u64,
        message_hash: &str,
    ) -> Result<MessageStatus, CoreError> {
        Ok(self
            .message_statuses
            .get(message_hash)
            .map(|s| *s)
            .unwrap_or(MessageStatus::Undeclared))
    }
}

/// Nonce source that hands out consecutive nonces from a fixed start
pub struct CountingNonceSource {
    next: AtomicU64,
}

impl CountingNonceSource {
    /// Start counting from the given nonce
    pub fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }
}

#[async_trait]
impl NonceSource for CountingNonceSource {
    async fn next_nonce(&self, _chain_id: u64, _address: &str) -> Result<u64, CoreError> {
        Ok(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

/// Resolver that maps every reference to a fixed-format address
pub struct StaticSignerResolver;

#[async_trait]
impl SignerResolver for StaticSignerResolver {
    async fn resolve(&self, chain_id: u64, address_ref: &str) -> Result<String, CoreError> {
        Ok(format!("0xsigner-{}-{}", chain_id, address_ref))
    }
}

/// In-memory object cache with real TTL expiry
#[derive(Default)]
pub struct MemoryObjectCache {
    entries: DashMap<String, (serde_json::Value, Instant)>,
}

impl MemoryObjectCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectCache for MemoryObjectCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CoreError> {
        let live = match self.entries.get(key) {
            Some(entry) if entry.1 > Instant::now() => Some(entry.0.clone()),
            Some(_) => None,
            None => return Ok(None),
        };
        if live.is_none() {
            self.entries.remove(key);
        }
        Ok(live)
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl_secs: u64,
    ) -> Result<(), CoreError> {
        let expires = Instant::now() + Duration::from_secs(ttl_secs);
        self.entries.insert(key.to_string(), (value, expires));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_object_cache_set_get_del() {
        let cache = MemoryObjectCache::new();
        cache.set("key", json!({"v": 1}), 60).await.unwrap();
        assert_eq!(cache.get("key").await.unwrap(), Some(json!({"v": 1})));

        cache.del("key").await.unwrap();
        assert!(cache.get("key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_object_cache_zero_ttl_expires_immediately() {
        let cache = MemoryObjectCache::new();
        cache.set("key", json!(true), 0).await.unwrap();
        assert!(cache.get("key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_hash_reads_unmined() {
        let chain = FakeChainClient::new();
        assert!(chain
            .transaction_receipt(200, "0xnope")
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            chain.message_status(200, "0xnope").await.unwrap(),
            MessageStatus::Undeclared
        );
    }

    #[tokio::test]
    async fn test_programmed_state_is_returned() {
        let chain = FakeChainClient::new();
        chain.mine("0xabc", ReceiptStatus::Succeeded);
        chain.set_message_status("0xmsg", MessageStatus::Progressed);

        let receipt = chain
            .transaction_receipt(200, "0xabc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Succeeded);
        assert_eq!(
            chain.message_status(200, "0xmsg").await.unwrap(),
            MessageStatus::Progressed
        );
    }

    #[tokio::test]
    async fn test_counting_nonce_source() {
        let source = CountingNonceSource::starting_at(7);
        assert_eq!(source.next_nonce(200, "0xa").await.unwrap(), 7);
        assert_eq!(source.next_nonce(200, "0xa").await.unwrap(), 8);
    }
}
