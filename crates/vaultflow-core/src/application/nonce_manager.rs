//! Sequential nonce allocation for concurrent transaction submission
//!
//! Two layers of serialization: an in-process FIFO queue per
//! (chain, signer) backed by a dedicated tokio task, and a cross-process
//! CAS lock on the signer's transaction meta row. The actor caches the
//! next nonce after the first chain fetch, so in-process allocations for
//! one signer form a contiguous, strictly increasing sequence. Different
//! signers never block each other.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::chain::{NonceSource, SignerResolver};
use crate::domain::repository::TransactionMetaRepository;
use crate::domain::transaction_meta::{new_lock_token, TransactionMeta, TxMetaStatus};
use crate::NonceError;

struct AllocationRequest {
    reply: oneshot::Sender<Result<u64, NonceError>>,
}

/// Per (chain, signer) serialized allocator of transaction nonces
pub struct NonceManager {
    inner: Arc<Inner>,
}

struct Inner {
    queues: DashMap<(u64, String), mpsc::UnboundedSender<AllocationRequest>>,
    tx_meta_repo: Arc<dyn TransactionMetaRepository>,
    signer_resolver: Arc<dyn SignerResolver>,
    nonce_source: Arc<dyn NonceSource>,
}

impl NonceManager {
    /// Create a new nonce manager over the given collaborators
    pub fn new(
        tx_meta_repo: Arc<dyn TransactionMetaRepository>,
        signer_resolver: Arc<dyn SignerResolver>,
        nonce_source: Arc<dyn NonceSource>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: DashMap::new(),
                tx_meta_repo,
                signer_resolver,
                nonce_source,
            }),
        }
    }

    /// Allocate the next nonce for a signer on a chain
    ///
    /// Callers enqueue and await; a single consumer per (chain, signer)
    /// drains the queue one entry at a time, so in-process calls never
    /// interleave. Errors resolve the entry and still advance the queue -
    /// one bad entry never stalls the signer's queue.
    pub async fn allocate(&self, chain_id: u64, address_ref: &str) -> Result<u64, NonceError> {
        let sender = self.queue_for(chain_id, address_ref);

        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(AllocationRequest { reply: reply_tx })
            .map_err(|_| NonceError::QueueClosed(address_ref.to_string()))?;

        reply_rx
            .await
            .map_err(|_| NonceError::QueueClosed(address_ref.to_string()))?
    }

    /// Get or lazily spawn the consumer task for a signer key
    fn queue_for(&self, chain_id: u64, address_ref: &str) -> mpsc::UnboundedSender<AllocationRequest> {
        let key = (chain_id, address_ref.to_string());

        if let Some(sender) = self.inner.queues.get(&key) {
            return sender.clone();
        }

        let entry = self.inner.queues.entry(key).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            let inner = Arc::clone(&self.inner);
            let address_ref = address_ref.to_string();
            tokio::spawn(async move {
                inner.run_queue(chain_id, address_ref, rx).await;
            });
            tx
        });

        entry.value().clone()
    }
}

impl Inner {
    /// Single consumer loop for one (chain, signer) key
    async fn run_queue(
        self: Arc<Self>,
        chain_id: u64,
        address_ref: String,
        mut rx: mpsc::UnboundedReceiver<AllocationRequest>,
    ) {
        let mut next_nonce: Option<u64> = None;

        while let Some(request) = rx.recv().await {
            let result = self
                .process_head(chain_id, &address_ref, &mut next_nonce)
                .await;

            if let Err(err) = &result {
                tracing::warn!(
                    chain_id,
                    address_ref = %address_ref,
                    error = %err,
                    "Nonce allocation rejected"
                );
            }

            // The caller may have gone away; the queue moves on either way.
            let _ = request.reply.send(result);
        }
    }

    async fn process_head(
        &self,
        chain_id: u64,
        address_ref: &str,
        next_nonce: &mut Option<u64>,
    ) -> Result<u64, NonceError> {
        self.lock_meta_row(chain_id, address_ref).await?;

        let address = match self.signer_resolver.resolve(chain_id, address_ref).await {
            Ok(address) => address,
            Err(err) => {
                self.mark_meta(chain_id, address_ref, TxMetaStatus::RollbackNeeded)
                    .await;
                return Err(NonceError::SignerUnresolvable(format!(
                    "{}: {}",
                    address_ref, err
                )));
            }
        };

        let nonce = match *next_nonce {
            Some(cached) => cached,
            None => match self.nonce_source.next_nonce(chain_id, &address).await {
                Ok(fetched) => fetched,
                Err(err) => {
                    self.mark_meta(chain_id, address_ref, TxMetaStatus::GethDown)
                        .await;
                    return Err(NonceError::NodeUnreachable(err.to_string()));
                }
            },
        };

        // Status change releases the one-shot lock.
        self.tx_meta_repo
            .mark_status(chain_id, address_ref, TxMetaStatus::Submitted)
            .await
            .map_err(|e| NonceError::Internal(e.to_string()))?;

        *next_nonce = Some(nonce + 1);
        tracing::debug!(chain_id, address_ref = %address_ref, nonce, "Nonce allocated");
        Ok(nonce)
    }

    /// Ensure a queued meta row exists and win the CAS lock on it
    ///
    /// A row a prior attempt left in any non-queued status (`Submitted`,
    /// `GethDown`, `RollbackNeeded`) is recycled into a fresh queued row
    /// first, so a transient rejection never wedges the signer; a row
    /// locked by another process is not stolen.
    async fn lock_meta_row(&self, chain_id: u64, address_ref: &str) -> Result<(), NonceError> {
        let existing = self
            .tx_meta_repo
            .find_by_address_ref(chain_id, address_ref)
            .await
            .map_err(|e| NonceError::Internal(e.to_string()))?;

        match existing {
            None => {
                let row = TransactionMeta::new_queued(address_ref, chain_id);
                self.tx_meta_repo
                    .save(&row)
                    .await
                    .map_err(|e| NonceError::Internal(e.to_string()))?;
            }
            Some(row) if row.lock_id.is_some() => {
                return Err(NonceError::LockContended(address_ref.to_string()));
            }
            Some(row) if row.status != TxMetaStatus::Queued => {
                let fresh = TransactionMeta::new_queued(address_ref, chain_id);
                self.tx_meta_repo
                    .save(&fresh)
                    .await
                    .map_err(|e| NonceError::Internal(e.to_string()))?;
            }
            Some(_) => {}
        }

        let token = new_lock_token();
        let won = self
            .tx_meta_repo
            .acquire_lock(chain_id, address_ref, &token)
            .await
            .map_err(|e| NonceError::Internal(e.to_string()))?;

        if !won {
            return Err(NonceError::LockContended(address_ref.to_string()));
        }

        Ok(())
    }

    async fn mark_meta(&self, chain_id: u64, address_ref: &str, status: TxMetaStatus) {
        if let Err(err) = self.tx_meta_repo.mark_status(chain_id, address_ref, status).await {
            tracing::error!(
                chain_id,
                address_ref = %address_ref,
                error = %err,
                "Failed to record transaction meta status"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::memory::MemoryTransactionMetaRepository;
    use crate::CoreError;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StaticResolver;

    #[async_trait]
    impl SignerResolver for StaticResolver {
        async fn resolve(&self, _chain_id: u64, address_ref: &str) -> Result<String, CoreError> {
            if address_ref.starts_with("missing") {
                return Err(CoreError::ValidationError(format!(
                    "No key for {}",
                    address_ref
                )));
            }
            Ok(format!("0x{}", address_ref))
        }
    }

    struct StaticNonceSource {
        start: u64,
        down: AtomicBool,
    }

    impl StaticNonceSource {
        fn up(start: u64) -> Self {
            Self {
                start,
                down: AtomicBool::new(false),
            }
        }

        fn down() -> Self {
            Self {
                start: 0,
                down: AtomicBool::new(true),
            }
        }

        fn recover(&self) {
            self.down.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl NonceSource for StaticNonceSource {
        async fn next_nonce(&self, _chain_id: u64, _address: &str) -> Result<u64, CoreError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(CoreError::ChainClientError("connection refused".into()));
            }
            Ok(self.start)
        }
    }

    fn manager_with(
        repo: Arc<MemoryTransactionMetaRepository>,
        source: StaticNonceSource,
    ) -> NonceManager {
        NonceManager::new(repo, Arc::new(StaticResolver), Arc::new(source))
    }

    #[tokio::test]
    async fn test_sequential_allocation_is_contiguous() {
        let repo = Arc::new(MemoryTransactionMetaRepository::new());
        let manager = manager_with(repo, StaticNonceSource::up(7));

        for expected in 7..12 {
            let nonce = manager.allocate(200, "tokenHolder:1").await.unwrap();
            assert_eq!(nonce, expected);
        }
    }

    #[tokio::test]
    async fn test_concurrent_allocation_no_collisions() {
        let repo = Arc::new(MemoryTransactionMetaRepository::new());
        let manager = Arc::new(manager_with(repo, StaticNonceSource::up(0)));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                manager.allocate(200, "tokenHolder:1").await.unwrap()
            }));
        }

        let mut nonces = HashSet::new();
        for handle in handles {
            nonces.insert(handle.await.unwrap());
        }

        // Contiguous, strictly increasing, collision-free.
        assert_eq!(nonces.len(), 16);
        assert_eq!(*nonces.iter().min().unwrap(), 0);
        assert_eq!(*nonces.iter().max().unwrap(), 15);
    }

    #[tokio::test]
    async fn test_different_signers_do_not_share_sequences() {
        let repo = Arc::new(MemoryTransactionMetaRepository::new());
        let manager = manager_with(repo, StaticNonceSource::up(3));

        let a = manager.allocate(200, "tokenHolder:a").await.unwrap();
        let b = manager.allocate(200, "tokenHolder:b").await.unwrap();

        // Each signer starts from the node-reported nonce.
        assert_eq!(a, 3);
        assert_eq!(b, 3);
    }

    #[tokio::test]
    async fn test_unresolvable_signer_marks_rollback_needed() {
        let repo = Arc::new(MemoryTransactionMetaRepository::new());
        let manager = manager_with(Arc::clone(&repo), StaticNonceSource::up(0));

        let err = manager.allocate(200, "missing:9").await.unwrap_err();
        assert!(matches!(err, NonceError::SignerUnresolvable(_)));

        let row = repo
            .find_by_address_ref(200, "missing:9")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, TxMetaStatus::RollbackNeeded);
        assert!(row.lock_id.is_none());
    }

    #[tokio::test]
    async fn test_node_down_marks_geth_down_and_is_retryable() {
        let repo = Arc::new(MemoryTransactionMetaRepository::new());
        let manager = manager_with(Arc::clone(&repo), StaticNonceSource::down());

        let err = manager.allocate(200, "tokenHolder:1").await.unwrap_err();
        assert!(matches!(err, NonceError::NodeUnreachable(_)));
        assert!(err.is_retryable());

        let row = repo
            .find_by_address_ref(200, "tokenHolder:1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, TxMetaStatus::GethDown);
    }

    #[tokio::test]
    async fn test_allocation_succeeds_after_node_recovers() {
        let repo = Arc::new(MemoryTransactionMetaRepository::new());
        let source = Arc::new(StaticNonceSource::down());
        let manager = NonceManager::new(
            Arc::clone(&repo) as Arc<dyn TransactionMetaRepository>,
            Arc::new(StaticResolver),
            Arc::clone(&source) as Arc<dyn NonceSource>,
        );

        let err = manager.allocate(200, "tokenHolder:1").await.unwrap_err();
        assert!(matches!(err, NonceError::NodeUnreachable(_)));
        assert!(err.is_retryable());

        // The outage left the row in gethDown. A retry after the node
        // comes back must recycle it instead of reporting contention.
        source.recover();
        let nonce = manager.allocate(200, "tokenHolder:1").await.unwrap();
        assert_eq!(nonce, 0);

        let row = repo
            .find_by_address_ref(200, "tokenHolder:1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, TxMetaStatus::Submitted);
    }

    #[tokio::test]
    async fn test_rollback_needed_row_is_recycled_on_retry() {
        let repo = Arc::new(MemoryTransactionMetaRepository::new());
        let manager = manager_with(Arc::clone(&repo), StaticNonceSource::up(5));

        let row = TransactionMeta::new_queued("tokenHolder:1", 200);
        repo.save(&row).await.unwrap();
        repo.mark_status(200, "tokenHolder:1", TxMetaStatus::RollbackNeeded)
            .await
            .unwrap();

        let nonce = manager.allocate(200, "tokenHolder:1").await.unwrap();
        assert_eq!(nonce, 5);
    }

    #[tokio::test]
    async fn test_foreign_lock_is_not_stolen() {
        let repo = Arc::new(MemoryTransactionMetaRepository::new());

        // Another process holds the lock on the row.
        let row = TransactionMeta::new_queued("tokenHolder:1", 200);
        repo.save(&row).await.unwrap();
        assert!(repo
            .acquire_lock(200, "tokenHolder:1", "foreign-lock")
            .await
            .unwrap());

        let manager = manager_with(Arc::clone(&repo), StaticNonceSource::up(0));
        let err = manager.allocate(200, "tokenHolder:1").await.unwrap_err();
        assert!(matches!(err, NonceError::LockContended(_)));

        let row = repo
            .find_by_address_ref(200, "tokenHolder:1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.lock_id.as_deref(), Some("foreign-lock"));
    }

    #[tokio::test]
    async fn test_bad_entry_does_not_stall_queue() {
        let repo = Arc::new(MemoryTransactionMetaRepository::new());

        // Pre-lock the row so the first allocation is rejected.
        let row = TransactionMeta::new_queued("tokenHolder:1", 200);
        repo.save(&row).await.unwrap();
        assert!(repo
            .acquire_lock(200, "tokenHolder:1", "foreign-lock")
            .await
            .unwrap());

        let manager = manager_with(Arc::clone(&repo), StaticNonceSource::up(5));
        assert!(manager.allocate(200, "tokenHolder:1").await.is_err());

        // Releasing the foreign lock lets the next entry proceed.
        repo.mark_status(200, "tokenHolder:1", TxMetaStatus::RollbackNeeded)
            .await
            .unwrap();
        let fresh = TransactionMeta::new_queued("tokenHolder:1", 200);
        repo.save(&fresh).await.unwrap();

        let nonce = manager.allocate(200, "tokenHolder:1").await.unwrap();
        assert_eq!(nonce, 5);
    }
}
