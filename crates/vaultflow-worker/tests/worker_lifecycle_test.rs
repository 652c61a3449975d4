use std::sync::Arc;
use std::time::Duration;

use vaultflow_core::domain::repository::memory::{
    MemoryProcessRegistry, MemoryWorkflowRepository, MemoryWorkflowStepRepository,
};
use vaultflow_core::domain::repository::ProcessRegistry;
use vaultflow_core::{
    StepRegistry, Workflow, WorkflowKind, WorkflowRepository, WorkflowRouter, WorkflowStatus,
};
use vaultflow_test_utils::data_generators::{initial_message, sample_workflow};
use vaultflow_test_utils::implementations::always_done_factory;
use vaultflow_worker::{
    BrokerPublisher, DispatchWorker, MemoryBroker, MessageBroker, WorkerConfig, WorkerError,
};

struct TestRig {
    worker: Arc<DispatchWorker>,
    broker: Arc<MemoryBroker>,
    workflow_repo: Arc<MemoryWorkflowRepository>,
    registry: Arc<MemoryProcessRegistry>,
    config: WorkerConfig,
}

fn build_rig(max_lifetime_secs: u64) -> TestRig {
    let workflow_repo = Arc::new(MemoryWorkflowRepository::new());
    let step_repo = Arc::new(MemoryWorkflowStepRepository::new());
    let broker = Arc::new(MemoryBroker::new());
    let registry = Arc::new(MemoryProcessRegistry::new());

    let publisher = Arc::new(BrokerPublisher::new(broker.clone()));
    let router = Arc::new(WorkflowRouter::new(
        StepRegistry::for_kind(WorkflowKind::GrantEthOst),
        workflow_repo.clone(),
        step_repo.clone(),
        step_repo.clone(),
        always_done_factory(),
        publisher,
    ));

    let config = WorkerConfig {
        topic_pattern: "auxWorkflow.#".to_string(),
        max_lifetime_secs,
        heartbeat_interval_secs: 1,
        ..Default::default()
    };

    let worker = Arc::new(
        DispatchWorker::new(config.clone(), broker.clone(), registry.clone())
            .register_router(WorkflowKind::GrantEthOst, router),
    );

    TestRig {
        worker,
        broker,
        workflow_repo,
        registry,
        config,
    }
}

async fn await_status(
    repo: &MemoryWorkflowRepository,
    workflow: &Workflow,
    wanted: WorkflowStatus,
) {
    for _ in 0..200 {
        let current = repo
            .find_by_id(&workflow.id)
            .await
            .unwrap()
            .unwrap()
            .status;
        if current == wanted {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("workflow never reached {:?}", wanted);
}

#[tokio::test]
async fn test_worker_drives_workflow_to_completion() {
    let rig = build_rig(5);
    let worker = rig.worker.clone();
    let handle = tokio::spawn(async move { worker.run().await });

    // Let the worker register and subscribe before publishing.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let workflow = sample_workflow(WorkflowKind::GrantEthOst);
    rig.workflow_repo.save(&workflow).await.unwrap();
    let initial = initial_message(&workflow);
    rig.broker
        .publish(&initial.topic(), &initial)
        .await
        .unwrap();

    await_status(&rig.workflow_repo, &workflow, WorkflowStatus::Completed).await;
    handle.abort();
}

#[tokio::test]
async fn test_second_worker_with_same_identity_is_rejected() {
    let rig = build_rig(5);
    let worker = rig.worker.clone();
    let handle = tokio::spawn(async move { worker.run().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let twin = DispatchWorker::new(rig.config.clone(), rig.broker.clone(), rig.registry.clone());
    let err = twin.run().await.unwrap_err();
    assert!(matches!(err, WorkerError::AlreadyRunning(_)));
    handle.abort();
}

#[tokio::test]
async fn test_worker_exits_after_max_lifetime() {
    let rig = build_rig(1);
    let worker = rig.worker.clone();
    let handle = tokio::spawn(async move { worker.run().await });

    let result = tokio::time::timeout(Duration::from_secs(3), handle)
        .await
        .expect("worker did not exit at max lifetime")
        .unwrap();
    assert!(result.is_ok());

    // The registry slot is free again, so a replacement may start.
    rig.registry
        .can_start(&rig.config.process_id, &rig.config.worker_kind)
        .await
        .expect("slot should be free after clean shutdown");
}
