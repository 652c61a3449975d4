/// SQL migrations for the VaultFlow PostgreSQL state store
///
/// These migrations create the tables and indexes for workflows, steps,
/// the transactional outbox, transaction-meta nonce rows, and the worker
/// process registry.
pub fn generate_migrations() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "20250701000000_initial_schema",
            r#"
            -- Workflows: one row per externally triggered business process
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_workflows_kind_status ON workflows(kind, status);

            -- Workflow steps: one row per logical step, updated in place.
            -- A workflow never runs the same step kind twice, so the pair
            -- is unique and redelivered schedules upsert into one row.
            CREATE TABLE IF NOT EXISTS workflow_steps (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                CONSTRAINT uq_workflow_steps_workflow_kind UNIQUE (workflow_id, kind),
                CONSTRAINT fk_step_workflow_id FOREIGN KEY (workflow_id) REFERENCES workflows(id)
            );

            CREATE INDEX IF NOT EXISTS idx_workflow_steps_workflow_id ON workflow_steps(workflow_id);
            CREATE INDEX IF NOT EXISTS idx_workflow_steps_status ON workflow_steps(status);

            -- Transactional outbox: successor messages committed with the
            -- step-status update, published after.
            CREATE TABLE IF NOT EXISTS outbox_messages (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                topic TEXT NOT NULL,
                message JSONB NOT NULL,
                sent BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE INDEX IF NOT EXISTS idx_outbox_messages_unsent ON outbox_messages(created_at) WHERE NOT sent;

            -- Transaction meta: nonce allocation rows, one per
            -- (chain, signer reference). lock_id implements the CAS lock.
            CREATE TABLE IF NOT EXISTS transaction_meta (
                id TEXT NOT NULL,
                chain_id BIGINT NOT NULL,
                address_ref TEXT NOT NULL,
                status TEXT NOT NULL,
                lock_id TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (chain_id, address_ref)
            );

            CREATE INDEX IF NOT EXISTS idx_transaction_meta_status ON transaction_meta(status);

            -- Worker process registry: at most one active worker per
            -- (kind, process id).
            CREATE TABLE IF NOT EXISTS workflow_processes (
                process_id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                heartbeat_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
        ),
        (
            "20250702000000_additional_indexes",
            r#"
            -- Efficient cleanup and monitoring scans
            CREATE INDEX IF NOT EXISTS idx_workflows_updated_at ON workflows(updated_at);
            CREATE INDEX IF NOT EXISTS idx_workflow_steps_updated_at ON workflow_steps(updated_at);
            "#,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_ordered_and_named() {
        let migrations = generate_migrations();
        assert!(!migrations.is_empty());

        let names: Vec<_> = migrations.iter().map(|(name, _)| *name).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted, "migrations must apply in name order");
    }

    #[test]
    fn test_schema_covers_all_stores() {
        let all_sql: String = generate_migrations()
            .iter()
            .map(|(_, sql)| *sql)
            .collect();
        for table in [
            "workflows",
            "workflow_steps",
            "outbox_messages",
            "transaction_meta",
            "workflow_processes",
        ] {
            assert!(
                all_sql.contains(table),
                "missing table definition: {}",
                table
            );
        }
    }
}
