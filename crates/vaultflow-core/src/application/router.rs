//! The workflow router - orchestrates one step per message
//!
//! Each invocation loads state, resolves the transition rule, executes
//! the bound step handler, persists the outcome together with the
//! successor messages (outbox), and finally publishes those messages.
//! Re-delivery of any step message is safe: an already-done step only
//! re-publishes its successors, and a pending step re-polls instead of
//! re-submitting.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::domain::repository::{OutboxRepository, WorkflowRepository, WorkflowStepRepository};
use crate::domain::step::{StepKind, StepStatus, WorkflowStep};
use crate::domain::step_registry::{StepRegistry, TransitionRule};
use crate::domain::workflow::Workflow;
use crate::messaging::{MessagePublisher, OutboxMessage, StepMessage};
use crate::{CoreError, HandlerFactory, StepOutcome, StepPayload, TaskStatus};

/// Drives the step-transition graph for one workflow kind
pub struct WorkflowRouter {
    registry: Arc<StepRegistry>,
    workflow_repo: Arc<dyn WorkflowRepository>,
    step_repo: Arc<dyn WorkflowStepRepository>,
    outbox_repo: Arc<dyn OutboxRepository>,
    handler_factory: HandlerFactory,
    publisher: Arc<dyn MessagePublisher>,
}

impl WorkflowRouter {
    /// Create a router over a registry and its collaborators
    pub fn new(
        registry: StepRegistry,
        workflow_repo: Arc<dyn WorkflowRepository>,
        step_repo: Arc<dyn WorkflowStepRepository>,
        outbox_repo: Arc<dyn OutboxRepository>,
        handler_factory: HandlerFactory,
        publisher: Arc<dyn MessagePublisher>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            workflow_repo,
            step_repo,
            outbox_repo,
            handler_factory,
            publisher,
        }
    }

    /// The registry this router dispatches against
    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Execute one step message
    pub async fn perform(&self, msg: &StepMessage) -> Result<(), CoreError> {
        let workflow = self
            .workflow_repo
            .find_by_id(&msg.workflow_id)
            .await?
            .ok_or_else(|| CoreError::WorkflowNotFound(msg.workflow_id.0.clone()))?;

        let mut step = self.load_or_create_step(&workflow, msg).await?;

        if step.kind != msg.step_kind {
            return Err(CoreError::ValidationError(format!(
                "Message kind {} does not match step row kind {}",
                msg.step_kind, step.kind
            )));
        }

        debug!(
            workflow_id = %workflow.id,
            step_id = %step.id,
            step_kind = %step.kind,
            status = ?step.status,
            "Routing step"
        );

        let rule = self.registry.next(step.kind)?;

        // Re-delivery of a finished step: re-publish successors, nothing else.
        if step.is_done() {
            let (rows, outbox) = self
                .successor_batch(&step, &rule.on_success, &step.request_params)
                .await?;
            self.commit_and_publish(&step, rows, outbox).await?;
            return Ok(());
        }
        if step.status == StepStatus::TaskFailed {
            let (rows, outbox) = self.failure_batch(&step, rule).await?;
            self.commit_and_publish(&step, rows, outbox).await?;
            return Ok(());
        }
        // Redelivery of a submit step that already holds a transaction
        // hash re-publishes its status check; re-running the handler
        // would submit a second transaction. Check kinds themselves
        // (pending_check = None) fall through and re-poll.
        if step.status == StepStatus::TaskPending {
            if let Some(check_kind) = rule.pending_check {
                let mut check_params = step.request_params.merged_with(&msg.payload);
                if let Some(hash) = &step.transaction_hash {
                    check_params.set("transactionHash", json!(hash));
                }
                if let Some(data) = &step.response_data {
                    check_params.merge(data);
                }
                let (rows, outbox) = self
                    .successor_batch(&step, &[check_kind], &check_params)
                    .await?;
                self.commit_and_publish(&step, rows, outbox).await?;
                return Ok(());
            }
        }

        let params = self.merged_params(&workflow, &step, msg).await?;

        step.mark_in_progress();
        self.step_repo.save(&step).await?;

        let handler = (self.handler_factory)(step.kind)?;
        let outcome = match handler.perform(&params).await {
            Ok(outcome) => outcome,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                // Unexpected handler error becomes a generic failed step.
                warn!(
                    workflow_id = %workflow.id,
                    step_kind = %step.kind,
                    error = %err,
                    "Handler raised unexpectedly, treating step as failed"
                );
                StepOutcome::failed()
            }
        };

        self.apply_outcome(workflow, step, rule, params, outcome)
            .await
    }

    /// Re-publish every unsent outbox message
    ///
    /// Run at worker startup to recover messages committed but not
    /// published before a crash.
    pub async fn drain_outbox(&self, limit: usize) -> Result<usize, CoreError> {
        let unsent = self.outbox_repo.fetch_unsent(limit).await?;
        let count = unsent.len();

        for entry in unsent {
            self.publisher.publish(&entry.topic, &entry.message).await?;
            self.outbox_repo.mark_sent(&entry.id).await?;
        }

        if count > 0 {
            info!(count, "Drained unsent outbox messages");
        }
        Ok(count)
    }

    /// Load the step row the message drives, creating the root step for
    /// an initial message
    async fn load_or_create_step(
        &self,
        workflow: &Workflow,
        msg: &StepMessage,
    ) -> Result<WorkflowStep, CoreError> {
        if let Some(step_id) = &msg.current_step_id {
            return self
                .step_repo
                .find_by_id(step_id)
                .await?
                .ok_or_else(|| CoreError::StepNotFound(step_id.0.clone()));
        }

        if msg.step_kind != self.registry.init_kind() {
            return Err(CoreError::ValidationError(format!(
                "Message for {} carries no step id and is not the init kind",
                msg.step_kind
            )));
        }

        // Initial message: reuse the root row if redelivered.
        if let Some(existing) = self
            .step_repo
            .find_by_workflow_and_kind(&workflow.id, msg.step_kind)
            .await?
        {
            return Ok(existing);
        }

        let params = workflow.request_params.merged_with(&msg.payload);
        let root = WorkflowStep::new_root(workflow.id.clone(), msg.step_kind, params);
        self.step_repo.save(&root).await?;
        Ok(root)
    }

    /// Merge request params with the response data of every declared
    /// `read_data_from` ancestor
    ///
    /// A declared dependency that is missing, not yet done, or not an
    /// ancestor of the current step is a misconfigured graph - a fatal
    /// internal error, never a retryable failure.
    async fn merged_params(
        &self,
        workflow: &Workflow,
        step: &WorkflowStep,
        msg: &StepMessage,
    ) -> Result<StepPayload, CoreError> {
        let mut params = step.request_params.merged_with(&msg.payload);

        let rule = self.registry.next(step.kind)?;
        if rule.read_data_from.is_empty() {
            return Ok(params);
        }

        let ancestors = self.ancestor_ids(step).await?;

        for dep_kind in &rule.read_data_from {
            let dep = self
                .step_repo
                .find_by_workflow_and_kind(&workflow.id, *dep_kind)
                .await?
                .ok_or_else(|| {
                    CoreError::MissingStepData(format!(
                        "{} declares data from {} which has no row",
                        step.kind, dep_kind
                    ))
                })?;

            if dep.status != StepStatus::TaskDone {
                return Err(CoreError::MissingStepData(format!(
                    "{} declares data from {} which is {:?}, not done",
                    step.kind, dep_kind, dep.status
                )));
            }

            if !ancestors.contains(&dep.id.0) {
                return Err(CoreError::MissingStepData(format!(
                    "{} declares data from {} which is not an ancestor",
                    step.kind, dep_kind
                )));
            }

            if let Some(data) = &dep.response_data {
                params.merge(data);
            }
        }

        Ok(params)
    }

    /// Ids of every ancestor of `step`, walking the parent chain
    async fn ancestor_ids(&self, step: &WorkflowStep) -> Result<HashSet<String>, CoreError> {
        let mut ancestors = HashSet::new();
        let mut cursor = step.parent_id.clone();

        while let Some(parent_id) = cursor {
            let parent = self
                .step_repo
                .find_by_id(&parent_id)
                .await?
                .ok_or_else(|| CoreError::StepNotFound(parent_id.0.clone()))?;

            if parent.workflow_id != step.workflow_id {
                // Parent linkage must stay inside one workflow.
                return Err(CoreError::MissingStepData(format!(
                    "Step {} has a parent in another workflow",
                    step.id
                )));
            }

            ancestors.insert(parent.id.0.clone());
            cursor = parent.parent_id;
        }

        Ok(ancestors)
    }

    async fn apply_outcome(
        &self,
        mut workflow: Workflow,
        mut step: WorkflowStep,
        rule: &TransitionRule,
        params: StepPayload,
        outcome: StepOutcome,
    ) -> Result<(), CoreError> {
        match outcome.task_status {
            TaskStatus::TaskDone => {
                step.mark_done(outcome.task_response_data);
                info!(
                    workflow_id = %workflow.id,
                    step_kind = %step.kind,
                    "Step done"
                );

                self.settle_pending_parent(&step).await?;

                match step.kind {
                    StepKind::MarkSuccess => {
                        workflow.complete()?;
                        self.workflow_repo.save(&workflow).await?;
                    }
                    StepKind::MarkFailure => {
                        workflow.fail()?;
                        self.workflow_repo.save(&workflow).await?;
                    }
                    _ => {}
                }

                let (rows, outbox) = self
                    .successor_batch(&step, &rule.on_success, &params)
                    .await?;
                self.commit_and_publish(&step, rows, outbox).await
            }
            TaskStatus::TaskPending => {
                step.mark_pending(outcome.transaction_hash.clone());
                if let Some(data) = outcome.task_response_data {
                    let merged = match &step.response_data {
                        Some(existing) => existing.merged_with(&data),
                        None => data,
                    };
                    step.response_data = Some(merged);
                }

                let (rows, outbox) = match rule.pending_check {
                    Some(check_kind) => {
                        let mut check_params = params.clone();
                        if let Some(hash) = &step.transaction_hash {
                            check_params.set("transactionHash", json!(hash));
                        }
                        if let Some(data) = &step.response_data {
                            check_params.merge(data);
                        }
                        self.successor_batch(&step, &[check_kind], &check_params)
                            .await?
                    }
                    None => {
                        // A check kind with no paired check re-polls itself.
                        let msg = self.message_for(&step, &params);
                        (Vec::new(), vec![OutboxMessage::new(msg)])
                    }
                };
                self.commit_and_publish(&step, rows, outbox).await
            }
            TaskStatus::TaskFailed => {
                step.mark_failed();
                warn!(
                    workflow_id = %workflow.id,
                    step_kind = %step.kind,
                    "Step failed, routing to failure path"
                );

                let (rows, outbox) = self.failure_batch(&step, rule).await?;
                self.commit_and_publish(&step, rows, outbox).await
            }
            TaskStatus::TaskReadyToStart => {
                // Not started yet: leave the row queued and try again on
                // the next delivery.
                step.status = StepStatus::Queued;
                let msg = self.message_for(&step, &params);
                self.commit_and_publish(&step, Vec::new(), vec![OutboxMessage::new(msg)])
                    .await
            }
        }
    }

    /// When a status-check step confirms, the submit step it polls is
    /// still `TaskPending`; fold the confirmation into that row so
    /// `read_data_from` descendants can see it as done.
    async fn settle_pending_parent(&self, step: &WorkflowStep) -> Result<(), CoreError> {
        let Some(parent_id) = &step.parent_id else {
            return Ok(());
        };
        let Some(mut parent) = self.step_repo.find_by_id(parent_id).await? else {
            return Ok(());
        };

        let parent_rule = self.registry.next(parent.kind)?;
        if parent_rule.pending_check != Some(step.kind) {
            return Ok(());
        }
        if parent.status != StepStatus::TaskPending {
            return Ok(());
        }

        parent.mark_done(step.response_data.clone());
        self.step_repo.save(&parent).await?;
        debug!(
            step_id = %parent.id,
            step_kind = %parent.kind,
            "Pending step settled by its status check"
        );
        Ok(())
    }

    /// Build successor rows (skipping kinds that already have one) and
    /// their outbox messages
    async fn successor_batch(
        &self,
        from: &WorkflowStep,
        kinds: &[StepKind],
        params: &StepPayload,
    ) -> Result<(Vec<WorkflowStep>, Vec<OutboxMessage>), CoreError> {
        let mut rows = Vec::new();
        let mut outbox = Vec::new();

        for kind in kinds {
            let step = match self
                .step_repo
                .find_by_workflow_and_kind(&from.workflow_id, *kind)
                .await?
            {
                Some(existing) => existing,
                None => {
                    let child = WorkflowStep::new_child(from, *kind, params.clone());
                    rows.push(child.clone());
                    child
                }
            };

            outbox.push(OutboxMessage::new(self.message_for(&step, params)));
        }

        Ok((rows, outbox))
    }

    async fn failure_batch(
        &self,
        step: &WorkflowStep,
        rule: &TransitionRule,
    ) -> Result<(Vec<WorkflowStep>, Vec<OutboxMessage>), CoreError> {
        match rule.on_failure {
            Some(failure_kind) => {
                self.successor_batch(step, &[failure_kind], &step.request_params)
                    .await
            }
            None => Ok((Vec::new(), Vec::new())),
        }
    }

    fn message_for(&self, step: &WorkflowStep, params: &StepPayload) -> StepMessage {
        StepMessage {
            workflow_id: step.workflow_id.clone(),
            workflow_kind: self.registry.workflow_kind(),
            current_step_id: Some(step.id.clone()),
            parent_step_id: step.parent_id.clone(),
            step_kind: step.kind,
            payload: params.clone(),
        }
    }

    /// Persist the current step and successor rows with the outbox, then
    /// publish and mark sent
    ///
    /// Publish failures are logged and left unsent; `drain_outbox`
    /// recovers them.
    async fn commit_and_publish(
        &self,
        step: &WorkflowStep,
        mut rows: Vec<WorkflowStep>,
        outbox: Vec<OutboxMessage>,
    ) -> Result<(), CoreError> {
        rows.insert(0, step.clone());
        self.step_repo.save_with_outbox(&rows, &outbox).await?;

        for entry in &outbox {
            match self.publisher.publish(&entry.topic, &entry.message).await {
                Ok(()) => {
                    self.outbox_repo.mark_sent(&entry.id).await?;
                }
                Err(err) => {
                    warn!(
                        topic = %entry.topic,
                        error = %err,
                        "Publish failed, leaving message in outbox"
                    );
                }
            }
        }

        Ok(())
    }
}
