//! Repository traits for the VaultFlow engine
//!
//! The engine consumes these traits; the state crates implement them.
//! In-memory implementations for tests and local tooling live in the
//! [`memory`] module behind the `testing` feature.

use async_trait::async_trait;

use crate::messaging::OutboxMessage;
use crate::CoreError;

use super::step::{StepId, StepKind, WorkflowStep};
use super::transaction_meta::{TransactionMeta, TxMetaStatus};
use super::workflow::{Workflow, WorkflowId};

/// Repository for workflow records
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Find a workflow by ID
    async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<Workflow>, CoreError>;

    /// Save a workflow (insert or update)
    async fn save(&self, workflow: &Workflow) -> Result<(), CoreError>;
}

/// Repository for workflow step records
#[async_trait]
pub trait WorkflowStepRepository: Send + Sync {
    /// Find a step by ID
    async fn find_by_id(&self, id: &StepId) -> Result<Option<WorkflowStep>, CoreError>;

    /// Find the step of a given kind within a workflow
    ///
    /// Step rows are unique per (workflow, kind): a poll re-enters the
    /// existing row instead of creating a new one.
    async fn find_by_workflow_and_kind(
        &self,
        workflow_id: &WorkflowId,
        kind: StepKind,
    ) -> Result<Option<WorkflowStep>, CoreError>;

    /// All steps of a workflow
    async fn find_for_workflow(&self, workflow_id: &WorkflowId)
        -> Result<Vec<WorkflowStep>, CoreError>;

    /// Save a step (insert or update)
    async fn save(&self, step: &WorkflowStep) -> Result<(), CoreError>;

    /// Save a batch of steps and enqueue successor messages atomically
    ///
    /// Covers the current step's status update plus any freshly created
    /// successor rows. The outbox rows must commit with the step updates
    /// so a crash between commit and publish cannot lose a scheduled
    /// step.
    async fn save_with_outbox(
        &self,
        steps: &[WorkflowStep],
        outbox: &[OutboxMessage],
    ) -> Result<(), CoreError>;
}

/// Repository for the scheduling outbox
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Fetch up to `limit` unsent messages, oldest first
    async fn fetch_unsent(&self, limit: usize) -> Result<Vec<OutboxMessage>, CoreError>;

    /// Mark a message as handed to the broker
    async fn mark_sent(&self, id: &str) -> Result<(), CoreError>;
}

/// Repository for transaction meta rows, owned by the nonce manager
#[async_trait]
pub trait TransactionMetaRepository: Send + Sync {
    /// Find the row for a signer reference on a chain
    async fn find_by_address_ref(
        &self,
        chain_id: u64,
        address_ref: &str,
    ) -> Result<Option<TransactionMeta>, CoreError>;

    /// Save a row (insert or update)
    async fn save(&self, meta: &TransactionMeta) -> Result<(), CoreError>;

    /// Attempt the CAS lock: succeeds only when `lock_id IS NULL AND
    /// status = queued`, setting `lock_id` to the given token. Returns
    /// whether this caller won the lock.
    async fn acquire_lock(
        &self,
        chain_id: u64,
        address_ref: &str,
        lock_id: &str,
    ) -> Result<bool, CoreError>;

    /// Transition the row's status, clearing the lock
    ///
    /// The lock is a one-shot gate: it is only ever released together
    /// with a status change.
    async fn mark_status(
        &self,
        chain_id: u64,
        address_ref: &str,
        status: TxMetaStatus,
    ) -> Result<(), CoreError>;
}

/// Bookkeeping for long-running worker processes
///
/// Guarantees at most one active worker per (kind, id) pair. Double-running
/// risks duplicate on-chain submissions, so a second start is rejected
/// loudly instead of silently accepted.
#[async_trait]
pub trait ProcessRegistry: Send + Sync {
    /// Register a starting process; rejects if an active one exists
    async fn can_start(&self, process_id: &str, kind: &str) -> Result<(), CoreError>;

    /// Record liveness for a running process
    async fn heartbeat(&self, process_id: &str) -> Result<(), CoreError>;

    /// Mark a process as stopped
    async fn stop(&self, process_id: &str) -> Result<(), CoreError>;
}

/// Memory implementations for testing
#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use chrono::{DateTime, Utc};
    use dashmap::DashMap;
    use std::sync::RwLock;

    /// In-memory workflow repository
    pub struct MemoryWorkflowRepository {
        workflows: DashMap<String, Workflow>,
    }

    impl MemoryWorkflowRepository {
        /// Create a new memory workflow repository
        pub fn new() -> Self {
            Self {
                workflows: DashMap::new(),
            }
        }
    }

    impl Default for MemoryWorkflowRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl WorkflowRepository for MemoryWorkflowRepository {
        async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<Workflow>, CoreError> {
            Ok(self.workflows.get(&id.0).map(|w| w.clone()))
        }

        async fn save(&self, workflow: &Workflow) -> Result<(), CoreError> {
            self.workflows
                .insert(workflow.id.0.clone(), workflow.clone());
            Ok(())
        }
    }

    /// In-memory step repository, with the outbox held in the same store
    /// so `save_with_outbox` mirrors the transactional semantics of the
    /// Postgres implementation
    pub struct MemoryWorkflowStepRepository {
        steps: DashMap<String, WorkflowStep>,
        by_workflow: DashMap<String, Vec<String>>,
        outbox: RwLock<Vec<OutboxMessage>>,
    }

    impl MemoryWorkflowStepRepository {
        /// Create a new memory step repository
        pub fn new() -> Self {
            Self {
                steps: DashMap::new(),
                by_workflow: DashMap::new(),
                outbox: RwLock::new(Vec::new()),
            }
        }

        fn index(&self, step: &WorkflowStep) {
            let mut ids = self
                .by_workflow
                .entry(step.workflow_id.0.clone())
                .or_default();
            if !ids.contains(&step.id.0) {
                ids.push(step.id.0.clone());
            }
        }
    }

    impl Default for MemoryWorkflowStepRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl WorkflowStepRepository for MemoryWorkflowStepRepository {
        async fn find_by_id(&self, id: &StepId) -> Result<Option<WorkflowStep>, CoreError> {
            Ok(self.steps.get(&id.0).map(|s| s.clone()))
        }

        async fn find_by_workflow_and_kind(
            &self,
            workflow_id: &WorkflowId,
            kind: StepKind,
        ) -> Result<Option<WorkflowStep>, CoreError> {
            let Some(ids) = self.by_workflow.get(&workflow_id.0) else {
                return Ok(None);
            };

            for id in ids.iter() {
                if let Some(step) = self.steps.get(id) {
                    if step.kind == kind {
                        return Ok(Some(step.clone()));
                    }
                }
            }

            Ok(None)
        }

        async fn find_for_workflow(
            &self,
            workflow_id: &WorkflowId,
        ) -> Result<Vec<WorkflowStep>, CoreError> {
            let Some(ids) = self.by_workflow.get(&workflow_id.0) else {
                return Ok(Vec::new());
            };

            let mut result = Vec::new();
            for id in ids.iter() {
                if let Some(step) = self.steps.get(id) {
                    result.push(step.clone());
                }
            }

            Ok(result)
        }

        async fn save(&self, step: &WorkflowStep) -> Result<(), CoreError> {
            self.index(step);
            self.steps.insert(step.id.0.clone(), step.clone());
            Ok(())
        }

        async fn save_with_outbox(
            &self,
            steps: &[WorkflowStep],
            outbox: &[OutboxMessage],
        ) -> Result<(), CoreError> {
            let mut pending = self.outbox.write().map_err(|e| {
                CoreError::StateStoreError(format!("Failed to acquire write lock: {}", e))
            })?;

            for step in steps {
                self.index(step);
                self.steps.insert(step.id.0.clone(), step.clone());
            }
            pending.extend(outbox.iter().cloned());

            Ok(())
        }
    }

    #[async_trait]
    impl OutboxRepository for MemoryWorkflowStepRepository {
        async fn fetch_unsent(&self, limit: usize) -> Result<Vec<OutboxMessage>, CoreError> {
            let pending = self.outbox.read().map_err(|e| {
                CoreError::StateStoreError(format!("Failed to acquire read lock: {}", e))
            })?;

            Ok(pending
                .iter()
                .filter(|m| !m.sent)
                .take(limit)
                .cloned()
                .collect())
        }

        async fn mark_sent(&self, id: &str) -> Result<(), CoreError> {
            let mut pending = self.outbox.write().map_err(|e| {
                CoreError::StateStoreError(format!("Failed to acquire write lock: {}", e))
            })?;

            for message in pending.iter_mut() {
                if message.id == id {
                    message.sent = true;
                }
            }

            Ok(())
        }
    }

    /// In-memory transaction meta repository
    pub struct MemoryTransactionMetaRepository {
        rows: DashMap<(u64, String), TransactionMeta>,
    }

    impl MemoryTransactionMetaRepository {
        /// Create a new memory transaction meta repository
        pub fn new() -> Self {
            Self {
                rows: DashMap::new(),
            }
        }
    }

    impl Default for MemoryTransactionMetaRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl TransactionMetaRepository for MemoryTransactionMetaRepository {
        async fn find_by_address_ref(
            &self,
            chain_id: u64,
            address_ref: &str,
        ) -> Result<Option<TransactionMeta>, CoreError> {
            Ok(self
                .rows
                .get(&(chain_id, address_ref.to_string()))
                .map(|m| m.clone()))
        }

        async fn save(&self, meta: &TransactionMeta) -> Result<(), CoreError> {
            self.rows
                .insert((meta.chain_id, meta.address_ref.clone()), meta.clone());
            Ok(())
        }

        async fn acquire_lock(
            &self,
            chain_id: u64,
            address_ref: &str,
            lock_id: &str,
        ) -> Result<bool, CoreError> {
            // DashMap entry access serializes concurrent callers for the
            // same key, which is what makes this a CAS.
            let Some(mut row) = self.rows.get_mut(&(chain_id, address_ref.to_string())) else {
                return Ok(false);
            };

            if !row.is_lockable() {
                return Ok(false);
            }

            row.lock_id = Some(lock_id.to_string());
            row.updated_at = Utc::now();
            Ok(true)
        }

        async fn mark_status(
            &self,
            chain_id: u64,
            address_ref: &str,
            status: TxMetaStatus,
        ) -> Result<(), CoreError> {
            let Some(mut row) = self.rows.get_mut(&(chain_id, address_ref.to_string())) else {
                return Err(CoreError::StateStoreError(format!(
                    "No transaction meta for {} on chain {}",
                    address_ref, chain_id
                )));
            };

            row.status = status;
            row.lock_id = None;
            row.updated_at = Utc::now();
            Ok(())
        }
    }

    #[derive(Clone)]
    struct ProcessRecord {
        kind: String,
        running: bool,
        #[allow(dead_code)]
        heartbeat_at: DateTime<Utc>,
    }

    /// In-memory process registry
    pub struct MemoryProcessRegistry {
        processes: DashMap<String, ProcessRecord>,
    }

    impl MemoryProcessRegistry {
        /// Create a new memory process registry
        pub fn new() -> Self {
            Self {
                processes: DashMap::new(),
            }
        }
    }

    impl Default for MemoryProcessRegistry {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ProcessRegistry for MemoryProcessRegistry {
        async fn can_start(&self, process_id: &str, kind: &str) -> Result<(), CoreError> {
            use dashmap::mapref::entry::Entry;

            match self.processes.entry(process_id.to_string()) {
                Entry::Occupied(mut entry) => {
                    let record = entry.get();
                    if record.running && record.kind == kind {
                        tracing::error!(
                            process_id = %process_id,
                            kind = %kind,
                            "Refusing duplicate worker start"
                        );
                        return Err(CoreError::ProcessAlreadyRunning(format!(
                            "{} ({})",
                            process_id, kind
                        )));
                    }
                    entry.insert(ProcessRecord {
                        kind: kind.to_string(),
                        running: true,
                        heartbeat_at: Utc::now(),
                    });
                    Ok(())
                }
                Entry::Vacant(entry) => {
                    entry.insert(ProcessRecord {
                        kind: kind.to_string(),
                        running: true,
                        heartbeat_at: Utc::now(),
                    });
                    Ok(())
                }
            }
        }

        async fn heartbeat(&self, process_id: &str) -> Result<(), CoreError> {
            if let Some(mut record) = self.processes.get_mut(process_id) {
                record.heartbeat_at = Utc::now();
            }
            Ok(())
        }

        async fn stop(&self, process_id: &str) -> Result<(), CoreError> {
            if let Some(mut record) = self.processes.get_mut(process_id) {
                record.running = false;
            }
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::domain::step::StepKind;
        use crate::domain::workflow::WorkflowKind;
        use crate::messaging::StepMessage;
        use crate::StepPayload;

        #[tokio::test]
        async fn test_step_repo_unique_per_workflow_and_kind() {
            let repo = MemoryWorkflowStepRepository::new();
            let wf_id = WorkflowId::new();
            let root = WorkflowStep::new_root(wf_id.clone(), StepKind::Init, StepPayload::empty());
            repo.save(&root).await.unwrap();

            let found = repo
                .find_by_workflow_and_kind(&wf_id, StepKind::Init)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(found.id, root.id);

            assert!(repo
                .find_by_workflow_and_kind(&wf_id, StepKind::GrantEth)
                .await
                .unwrap()
                .is_none());
        }

        #[tokio::test]
        async fn test_save_with_outbox_then_drain() {
            let repo = MemoryWorkflowStepRepository::new();
            let wf_id = WorkflowId::new();
            let root = WorkflowStep::new_root(wf_id.clone(), StepKind::Init, StepPayload::empty());

            let msg = StepMessage::initial(wf_id, WorkflowKind::GrantEthOst, StepPayload::empty());
            let outbox = vec![OutboxMessage::new(msg)];
            repo.save_with_outbox(std::slice::from_ref(&root), &outbox)
                .await
                .unwrap();

            let unsent = repo.fetch_unsent(10).await.unwrap();
            assert_eq!(unsent.len(), 1);

            repo.mark_sent(&unsent[0].id).await.unwrap();
            assert!(repo.fetch_unsent(10).await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_tx_meta_cas_lock_single_winner() {
            let repo = MemoryTransactionMetaRepository::new();
            let meta = TransactionMeta::new_queued("tokenHolder:1", 200);
            repo.save(&meta).await.unwrap();

            assert!(repo.acquire_lock(200, "tokenHolder:1", "lockA").await.unwrap());
            // Second caller must lose, not double-lock.
            assert!(!repo.acquire_lock(200, "tokenHolder:1", "lockB").await.unwrap());

            // Status change releases the gate for a fresh queued row only.
            repo.mark_status(200, "tokenHolder:1", TxMetaStatus::Submitted)
                .await
                .unwrap();
            assert!(!repo.acquire_lock(200, "tokenHolder:1", "lockC").await.unwrap());
        }

        #[tokio::test]
        async fn test_process_registry_rejects_double_start() {
            let registry = MemoryProcessRegistry::new();
            registry.can_start("cron-7", "auxWorkflowWorker").await.unwrap();

            let err = registry
                .can_start("cron-7", "auxWorkflowWorker")
                .await
                .unwrap_err();
            assert!(matches!(err, CoreError::ProcessAlreadyRunning(_)));

            registry.stop("cron-7").await.unwrap();
            registry.can_start("cron-7", "auxWorkflowWorker").await.unwrap();
        }
    }
}
