//! PostgreSQL repository implementations
//!
//! Workflow and step rows carry the full record as JSONB alongside the
//! columns queried by index. Transaction-meta rows use plain columns
//! because the CAS lock is a conditional column update.

use async_trait::async_trait;
use sqlx::Row;
use tracing::{debug, warn};

use vaultflow_core::domain::repository::{
    OutboxRepository, ProcessRegistry, TransactionMetaRepository, WorkflowRepository,
    WorkflowStepRepository,
};
use vaultflow_core::{
    CoreError, OutboxMessage, StepId, StepKind, TransactionMeta, TxMetaStatus, Workflow,
    WorkflowId, WorkflowStep,
};

use crate::PostgresConnection;

/// A worker row older than this is presumed dead and may be replaced.
const STALE_HEARTBEAT_SECS: i64 = 120;

fn db_err(context: &str, e: sqlx::Error) -> CoreError {
    CoreError::StateStoreError(format!("{}: {}", context, e))
}

fn ser_err(context: &str, e: serde_json::Error) -> CoreError {
    CoreError::SerializationError(format!("{}: {}", context, e))
}

fn parse_tx_status(s: &str) -> Result<TxMetaStatus, CoreError> {
    match s {
        "queued" => Ok(TxMetaStatus::Queued),
        "submitted" => Ok(TxMetaStatus::Submitted),
        "rollbackNeeded" => Ok(TxMetaStatus::RollbackNeeded),
        "gethDown" => Ok(TxMetaStatus::GethDown),
        other => Err(CoreError::StateStoreError(format!(
            "Unknown transaction meta status in database: {}",
            other
        ))),
    }
}

/// Postgres implementation of the WorkflowRepository
#[derive(Clone)]
pub struct PostgresWorkflowRepository {
    conn: PostgresConnection,
}

impl PostgresWorkflowRepository {
    /// Create a new Postgres workflow repository
    pub fn new(conn: PostgresConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl WorkflowRepository for PostgresWorkflowRepository {
    async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<Workflow>, CoreError> {
        let row = sqlx::query("SELECT data FROM workflows WHERE id = $1")
            .bind(&id.0)
            .fetch_optional(self.conn.pool())
            .await
            .map_err(|e| db_err("Failed to load workflow", e))?;

        match row {
            Some(row) => {
                let data: serde_json::Value = row
                    .try_get("data")
                    .map_err(|e| db_err("Missing workflow data column", e))?;
                let workflow = serde_json::from_value(data)
                    .map_err(|e| ser_err("Error deserializing workflow", e))?;
                Ok(Some(workflow))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, workflow: &Workflow) -> Result<(), CoreError> {
        let data = serde_json::to_value(workflow)
            .map_err(|e| ser_err("Error serializing workflow", e))?;

        let query = "
            INSERT INTO workflows (id, kind, status, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                status = $3,
                data = $4,
                updated_at = $6
        ";

        sqlx::query(query)
            .bind(&workflow.id.0)
            .bind(workflow.kind.as_str())
            .bind(workflow.status.as_str())
            .bind(&data)
            .bind(workflow.created_at)
            .bind(workflow.updated_at)
            .execute(self.conn.pool())
            .await
            .map_err(|e| db_err("Failed to save workflow", e))?;
        Ok(())
    }
}

/// Postgres implementation of the WorkflowStepRepository
#[derive(Clone)]
pub struct PostgresWorkflowStepRepository {
    conn: PostgresConnection,
}

impl PostgresWorkflowStepRepository {
    /// Create a new Postgres step repository
    pub fn new(conn: PostgresConnection) -> Self {
        Self { conn }
    }

    fn step_from_row(row: &sqlx::postgres::PgRow) -> Result<WorkflowStep, CoreError> {
        let data: serde_json::Value = row
            .try_get("data")
            .map_err(|e| db_err("Missing step data column", e))?;
        serde_json::from_value(data).map_err(|e| ser_err("Error deserializing step", e))
    }
}

const UPSERT_STEP: &str = "
    INSERT INTO workflow_steps (id, workflow_id, kind, status, data, created_at, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT (workflow_id, kind) DO UPDATE SET
        status = $4,
        data = $5,
        updated_at = $7
";

const INSERT_OUTBOX: &str = "
    INSERT INTO outbox_messages (id, workflow_id, topic, message, sent)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (id) DO NOTHING
";

#[async_trait]
impl WorkflowStepRepository for PostgresWorkflowStepRepository {
    async fn find_by_id(&self, id: &StepId) -> Result<Option<WorkflowStep>, CoreError> {
        let row = sqlx::query("SELECT data FROM workflow_steps WHERE id = $1")
            .bind(&id.0)
            .fetch_optional(self.conn.pool())
            .await
            .map_err(|e| db_err("Failed to load step", e))?;

        row.as_ref().map(Self::step_from_row).transpose()
    }

    async fn find_by_workflow_and_kind(
        &self,
        workflow_id: &WorkflowId,
        kind: StepKind,
    ) -> Result<Option<WorkflowStep>, CoreError> {
        let row =
            sqlx::query("SELECT data FROM workflow_steps WHERE workflow_id = $1 AND kind = $2")
                .bind(&workflow_id.0)
                .bind(kind.as_str())
                .fetch_optional(self.conn.pool())
                .await
                .map_err(|e| db_err("Failed to load step by kind", e))?;

        row.as_ref().map(Self::step_from_row).transpose()
    }

    async fn find_for_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<WorkflowStep>, CoreError> {
        let rows = sqlx::query(
            "SELECT data FROM workflow_steps WHERE workflow_id = $1 ORDER BY created_at",
        )
        .bind(&workflow_id.0)
        .fetch_all(self.conn.pool())
        .await
        .map_err(|e| db_err("Failed to load workflow steps", e))?;

        rows.iter().map(Self::step_from_row).collect()
    }

    async fn save(&self, step: &WorkflowStep) -> Result<(), CoreError> {
        let data =
            serde_json::to_value(step).map_err(|e| ser_err("Error serializing step", e))?;

        sqlx::query(UPSERT_STEP)
            .bind(&step.id.0)
            .bind(&step.workflow_id.0)
            .bind(step.kind.as_str())
            .bind(step.status.as_str())
            .bind(&data)
            .bind(step.created_at)
            .bind(step.updated_at)
            .execute(self.conn.pool())
            .await
            .map_err(|e| db_err("Failed to save step", e))?;
        Ok(())
    }

    async fn save_with_outbox(
        &self,
        steps: &[WorkflowStep],
        outbox: &[OutboxMessage],
    ) -> Result<(), CoreError> {
        let mut tx = self
            .conn
            .pool()
            .begin()
            .await
            .map_err(|e| db_err("Failed to begin transaction", e))?;

        for step in steps {
            let data =
                serde_json::to_value(step).map_err(|e| ser_err("Error serializing step", e))?;
            sqlx::query(UPSERT_STEP)
                .bind(&step.id.0)
                .bind(&step.workflow_id.0)
                .bind(step.kind.as_str())
                .bind(step.status.as_str())
                .bind(&data)
                .bind(step.created_at)
                .bind(step.updated_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_err("Failed to save step in batch", e))?;
        }

        for entry in outbox {
            let message = serde_json::to_value(&entry.message)
                .map_err(|e| ser_err("Error serializing outbox message", e))?;
            sqlx::query(INSERT_OUTBOX)
                .bind(&entry.id)
                .bind(&entry.workflow_id.0)
                .bind(&entry.topic)
                .bind(&message)
                .bind(entry.sent)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_err("Failed to enqueue outbox message", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| db_err("Failed to commit step batch", e))?;

        debug!(
            steps = steps.len(),
            outbox = outbox.len(),
            "Committed step batch with outbox"
        );
        Ok(())
    }
}

/// Postgres implementation of the OutboxRepository
#[derive(Clone)]
pub struct PostgresOutboxRepository {
    conn: PostgresConnection,
}

impl PostgresOutboxRepository {
    /// Create a new Postgres outbox repository
    pub fn new(conn: PostgresConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl OutboxRepository for PostgresOutboxRepository {
    async fn fetch_unsent(&self, limit: usize) -> Result<Vec<OutboxMessage>, CoreError> {
        let rows = sqlx::query(
            "SELECT id, workflow_id, topic, message, sent FROM outbox_messages
             WHERE NOT sent ORDER BY created_at LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(self.conn.pool())
        .await
        .map_err(|e| db_err("Failed to fetch unsent outbox messages", e))?;

        rows.into_iter()
            .map(|row| {
                let message: serde_json::Value = row
                    .try_get("message")
                    .map_err(|e| db_err("Missing outbox message column", e))?;
                Ok(OutboxMessage {
                    id: row
                        .try_get("id")
                        .map_err(|e| db_err("Missing outbox id column", e))?,
                    workflow_id: WorkflowId(
                        row.try_get("workflow_id")
                            .map_err(|e| db_err("Missing outbox workflow column", e))?,
                    ),
                    topic: row
                        .try_get("topic")
                        .map_err(|e| db_err("Missing outbox topic column", e))?,
                    message: serde_json::from_value(message)
                        .map_err(|e| ser_err("Error deserializing outbox message", e))?,
                    sent: row
                        .try_get("sent")
                        .map_err(|e| db_err("Missing outbox sent column", e))?,
                })
            })
            .collect()
    }

    async fn mark_sent(&self, id: &str) -> Result<(), CoreError> {
        sqlx::query("UPDATE outbox_messages SET sent = TRUE WHERE id = $1")
            .bind(id)
            .execute(self.conn.pool())
            .await
            .map_err(|e| db_err("Failed to mark outbox message sent", e))?;
        Ok(())
    }
}

/// Postgres implementation of the TransactionMetaRepository
#[derive(Clone)]
pub struct PostgresTransactionMetaRepository {
    conn: PostgresConnection,
}

impl PostgresTransactionMetaRepository {
    /// Create a new Postgres transaction-meta repository
    pub fn new(conn: PostgresConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl TransactionMetaRepository for PostgresTransactionMetaRepository {
    async fn find_by_address_ref(
        &self,
        chain_id: u64,
        address_ref: &str,
    ) -> Result<Option<TransactionMeta>, CoreError> {
        let row = sqlx::query(
            "SELECT id, chain_id, address_ref, status, lock_id, created_at, updated_at
             FROM transaction_meta WHERE chain_id = $1 AND address_ref = $2",
        )
        .bind(chain_id as i64)
        .bind(address_ref)
        .fetch_optional(self.conn.pool())
        .await
        .map_err(|e| db_err("Failed to load transaction meta", e))?;

        match row {
            Some(row) => {
                let status: String = row
                    .try_get("status")
                    .map_err(|e| db_err("Missing meta status column", e))?;
                let chain: i64 = row
                    .try_get("chain_id")
                    .map_err(|e| db_err("Missing meta chain column", e))?;
                Ok(Some(TransactionMeta {
                    id: row
                        .try_get("id")
                        .map_err(|e| db_err("Missing meta id column", e))?,
                    status: parse_tx_status(&status)?,
                    lock_id: row
                        .try_get("lock_id")
                        .map_err(|e| db_err("Missing meta lock column", e))?,
                    address_ref: row
                        .try_get("address_ref")
                        .map_err(|e| db_err("Missing meta address column", e))?,
                    chain_id: chain as u64,
                    created_at: row
                        .try_get("created_at")
                        .map_err(|e| db_err("Missing meta created_at column", e))?,
                    updated_at: row
                        .try_get("updated_at")
                        .map_err(|e| db_err("Missing meta updated_at column", e))?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, meta: &TransactionMeta) -> Result<(), CoreError> {
        let query = "
            INSERT INTO transaction_meta (id, chain_id, address_ref, status, lock_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (chain_id, address_ref) DO UPDATE SET
                id = $1,
                status = $4,
                lock_id = $5,
                updated_at = $7
        ";

        sqlx::query(query)
            .bind(&meta.id)
            .bind(meta.chain_id as i64)
            .bind(&meta.address_ref)
            .bind(meta.status.as_str())
            .bind(&meta.lock_id)
            .bind(meta.created_at)
            .bind(meta.updated_at)
            .execute(self.conn.pool())
            .await
            .map_err(|e| db_err("Failed to save transaction meta", e))?;
        Ok(())
    }

    async fn acquire_lock(
        &self,
        chain_id: u64,
        address_ref: &str,
        lock_id: &str,
    ) -> Result<bool, CoreError> {
        // The CAS: only an unlocked queued row can be taken.
        let result = sqlx::query(
            "UPDATE transaction_meta SET lock_id = $3, updated_at = NOW()
             WHERE chain_id = $1 AND address_ref = $2
               AND lock_id IS NULL AND status = 'queued'",
        )
        .bind(chain_id as i64)
        .bind(address_ref)
        .bind(lock_id)
        .execute(self.conn.pool())
        .await
        .map_err(|e| db_err("Failed to acquire meta lock", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_status(
        &self,
        chain_id: u64,
        address_ref: &str,
        status: TxMetaStatus,
    ) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE transaction_meta SET status = $3, lock_id = NULL, updated_at = NOW()
             WHERE chain_id = $1 AND address_ref = $2",
        )
        .bind(chain_id as i64)
        .bind(address_ref)
        .bind(status.as_str())
        .execute(self.conn.pool())
        .await
        .map_err(|e| db_err("Failed to update transaction meta status", e))?;
        Ok(())
    }
}

/// Postgres implementation of the ProcessRegistry
#[derive(Clone)]
pub struct PostgresProcessRegistry {
    conn: PostgresConnection,
}

impl PostgresProcessRegistry {
    /// Create a new Postgres process registry
    pub fn new(conn: PostgresConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ProcessRegistry for PostgresProcessRegistry {
    async fn can_start(&self, process_id: &str, kind: &str) -> Result<(), CoreError> {
        let inserted = sqlx::query(
            "INSERT INTO workflow_processes (process_id, kind, started_at, heartbeat_at)
             VALUES ($1, $2, NOW(), NOW())
             ON CONFLICT (process_id) DO NOTHING",
        )
        .bind(process_id)
        .bind(kind)
        .execute(self.conn.pool())
        .await
        .map_err(|e| db_err("Failed to register process", e))?;

        if inserted.rows_affected() == 1 {
            return Ok(());
        }

        // An existing row may belong to a dead worker. Take it over only
        // when the heartbeat is stale.
        let taken_over = sqlx::query(
            "UPDATE workflow_processes
             SET kind = $2, started_at = NOW(), heartbeat_at = NOW()
             WHERE process_id = $1
               AND heartbeat_at < NOW() - make_interval(secs => $3)",
        )
        .bind(process_id)
        .bind(kind)
        .bind(STALE_HEARTBEAT_SECS as f64)
        .execute(self.conn.pool())
        .await
        .map_err(|e| db_err("Failed to check process takeover", e))?;

        if taken_over.rows_affected() == 1 {
            warn!(process_id, kind, "Replaced stale worker registration");
            return Ok(());
        }

        Err(CoreError::ProcessAlreadyRunning(format!(
            "A worker for {} {} is already active",
            kind, process_id
        )))
    }

    async fn heartbeat(&self, process_id: &str) -> Result<(), CoreError> {
        sqlx::query("UPDATE workflow_processes SET heartbeat_at = NOW() WHERE process_id = $1")
            .bind(process_id)
            .execute(self.conn.pool())
            .await
            .map_err(|e| db_err("Failed to record heartbeat", e))?;
        Ok(())
    }

    async fn stop(&self, process_id: &str) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM workflow_processes WHERE process_id = $1")
            .bind(process_id)
            .execute(self.conn.pool())
            .await
            .map_err(|e| db_err("Failed to deregister process", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tx_status_round_trip() {
        for status in [
            TxMetaStatus::Queued,
            TxMetaStatus::Submitted,
            TxMetaStatus::RollbackNeeded,
            TxMetaStatus::GethDown,
        ] {
            assert_eq!(parse_tx_status(status.as_str()).unwrap(), status);
        }
        assert!(parse_tx_status("bogus").is_err());
    }
}
