//! The dispatch loop: one worker process consuming step topics
//!
//! On startup the worker registers itself in the process registry,
//! drains any unsent outbox messages, then consumes deliveries until
//! its configured lifetime elapses and exits cleanly. Transiently
//! failed deliveries are re-published for another attempt; fatal ones
//! are logged and dropped so a poison message cannot wedge the queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, sleep_until, Instant};
use tracing::{debug, error, info, warn};

use vaultflow_core::domain::repository::ProcessRegistry;
use vaultflow_core::{CoreError, WorkflowKind, WorkflowRouter};

use crate::broker::{Delivery, MessageBroker};
use crate::{WorkerConfig, WorkerError, WorkerResult};

/// A workflow worker process
pub struct DispatchWorker {
    config: WorkerConfig,
    routers: HashMap<WorkflowKind, Arc<WorkflowRouter>>,
    broker: Arc<dyn MessageBroker>,
    process_registry: Arc<dyn ProcessRegistry>,
}

impl DispatchWorker {
    /// Create a worker with no registered routers
    pub fn new(
        config: WorkerConfig,
        broker: Arc<dyn MessageBroker>,
        process_registry: Arc<dyn ProcessRegistry>,
    ) -> Self {
        Self {
            config,
            routers: HashMap::new(),
            broker,
            process_registry,
        }
    }

    /// Register the router serving a workflow kind
    pub fn register_router(mut self, kind: WorkflowKind, router: Arc<WorkflowRouter>) -> Self {
        self.routers.insert(kind, router);
        self
    }

    /// Run the worker until its lifetime elapses
    pub async fn run(&self) -> WorkerResult<()> {
        self.process_registry
            .can_start(&self.config.process_id, &self.config.worker_kind)
            .await
            .map_err(|e| match e {
                CoreError::ProcessAlreadyRunning(msg) => WorkerError::AlreadyRunning(msg),
                other => WorkerError::CoreError(other),
            })?;

        info!(
            process_id = %self.config.process_id,
            pattern = %self.config.topic_pattern,
            "Worker starting"
        );

        // Recover messages committed but never published before a crash.
        for (kind, router) in &self.routers {
            match router.drain_outbox(self.config.outbox_drain_limit).await {
                Ok(0) => {}
                Ok(count) => info!(workflow_kind = %kind, count, "Recovered outbox messages"),
                Err(e) => warn!(workflow_kind = %kind, error = %e, "Outbox drain failed"),
            }
        }

        let mut deliveries = self.broker.subscribe(&self.config.topic_pattern).await?;

        let deadline = Instant::now() + Duration::from_secs(self.config.max_lifetime_secs);
        let mut heartbeat = interval(Duration::from_secs(self.config.heartbeat_interval_secs));
        heartbeat.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                _ = sleep_until(deadline) => {
                    info!(
                        process_id = %self.config.process_id,
                        "Max lifetime reached, shutting down"
                    );
                    break;
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = self.process_registry.heartbeat(&self.config.process_id).await {
                        warn!(error = %e, "Heartbeat failed");
                    }
                }
                delivery = deliveries.recv() => {
                    match delivery {
                        Some(delivery) => self.handle(delivery).await,
                        None => {
                            warn!("Broker subscription closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        self.process_registry
            .stop(&self.config.process_id)
            .await?;
        info!(process_id = %self.config.process_id, "Worker stopped");
        Ok(())
    }

    async fn handle(&self, delivery: Delivery) {
        let message = &delivery.message;
        let Some(router) = self.routers.get(&message.workflow_kind) else {
            error!(
                workflow_kind = %message.workflow_kind.as_str(),
                topic = %delivery.topic,
                "No router registered for workflow kind"
            );
            return;
        };

        match router.perform(message).await {
            Ok(()) => {
                debug!(
                    workflow_id = %message.workflow_id,
                    step_kind = %message.step_kind,
                    "Delivery handled"
                );
            }
            Err(e) if e.is_transient() => {
                warn!(
                    workflow_id = %message.workflow_id,
                    step_kind = %message.step_kind,
                    error = %e,
                    "Transient failure, requeueing delivery"
                );
                if let Err(requeue_err) = self.broker.requeue(&delivery).await {
                    error!(
                        workflow_id = %message.workflow_id,
                        error = %requeue_err,
                        "Requeue failed, message lost until outbox drain"
                    );
                }
            }
            Err(e) => {
                // Poison message: dropping it beats wedging the queue.
                error!(
                    workflow_id = %message.workflow_id,
                    step_kind = %message.step_kind,
                    error = %e,
                    "Fatal failure handling delivery, dropping message"
                );
            }
        }
    }
}
