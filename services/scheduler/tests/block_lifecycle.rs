//! Broker block state machine tests.

use std::sync::Arc;

use ksched_id::TaskId;
use ksched_scheduler::{
    config::{ServiceConfig, TargetConfig},
    model::{StatusReason, TaskState, TaskStatus},
    offer::{OfferRequirementProvider, PersistentRequirementProvider},
    operator::OperatorRequests,
    plan::{BlockStatus, BrokerBlock},
    store::{MemoryTaskStore, TaskStore},
};
use rstest::rstest;

struct Harness {
    store: Arc<MemoryTaskStore>,
    provider: Arc<PersistentRequirementProvider>,
    requests: OperatorRequests,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryTaskStore::new()),
            provider: Arc::new(PersistentRequirementProvider::new(
                ServiceConfig::default(),
                TargetConfig::new(Default::default(), Default::default()),
            )),
            requests: OperatorRequests::new(),
        }
    }

    fn block(&self, index: u32) -> BrokerBlock {
        BrokerBlock::new(
            index,
            self.provider.target_name().clone(),
            self.store.clone(),
            self.provider.clone(),
            self.requests.clone(),
        )
    }

    /// Starts the block and pretends every launch it asked for was sent.
    fn launch(&self, block: &mut BrokerBlock) -> TaskId {
        let requirement = block.start().expect("block should request a launch");
        let task = requirement.task_requirements[0].task.clone();
        let operations = vec![ksched_scheduler::model::Operation::Launch {
            tasks: vec![task.clone()],
        }];
        block.update_offer_status(Some(&operations));
        task.task_id
    }
}

#[rstest]
#[case(1)]
#[case(3)]
#[case(5)]
fn test_new_blocks_start_pending(#[case] count: u32) {
    let h = Harness::new();
    let blocks: Vec<_> = (0..count).map(|i| h.block(i)).collect();
    assert!(blocks.iter().all(|b| b.status() == BlockStatus::Pending));
    assert_eq!(blocks.last().unwrap().name(), format!("broker-{}", count - 1));
}

#[test]
fn test_start_without_record_requests_one_task_and_executor() {
    let h = Harness::new();
    let mut block = h.block(0);

    let requirement = block.start().unwrap();
    assert_eq!(requirement.task_requirements.len(), 1);
    assert!(requirement.executor_requirement.is_some());
    assert_eq!(requirement.task_requirements[0].task.name, "broker-0");
}

#[test]
fn test_unrelated_status_is_ignored() {
    let h = Harness::new();
    let mut block = h.block(0);
    h.launch(&mut block);
    assert_eq!(block.status(), BlockStatus::InProgress);

    block.update(&TaskStatus::new(TaskId::generate("broker-0"), TaskState::Running));
    assert_eq!(block.status(), BlockStatus::InProgress);
}

#[rstest]
#[case(TaskState::Running, BlockStatus::Complete)]
#[case(TaskState::Failed, BlockStatus::Pending)]
#[case(TaskState::Lost, BlockStatus::Pending)]
#[case(TaskState::Staging, BlockStatus::InProgress)]
fn test_status_moves_block(#[case] state: TaskState, #[case] expected: BlockStatus) {
    let h = Harness::new();
    let mut block = h.block(0);
    let task_id = h.launch(&mut block);

    block.update(&TaskStatus::new(task_id, state));
    assert_eq!(block.status(), expected);
}

#[test]
fn test_reconciliation_answer_does_not_complete_block() {
    let h = Harness::new();
    let mut block = h.block(0);
    let task_id = h.launch(&mut block);

    block.update(
        &TaskStatus::new(task_id, TaskState::Running).with_reason(StatusReason::Reconciliation),
    );
    assert_eq!(block.status(), BlockStatus::InProgress);
}

#[rstest]
#[case(None)]
#[case(Some(vec![]))]
fn test_no_operations_returns_block_to_pending(
    #[case] operations: Option<Vec<ksched_scheduler::model::Operation>>,
) {
    let h = Harness::new();
    let mut block = h.block(0);
    assert!(block.start().is_some());

    block.update_offer_status(operations.as_deref());
    assert_eq!(block.status(), BlockStatus::Pending);
    assert!(block.pending_tasks().is_empty());
}

#[test]
fn test_running_task_at_target_completes_block_on_creation() {
    let h = Harness::new();
    let target = h.provider.target_name().clone();
    let task = h.provider.new_requirement(&target, 0).unwrap().task_requirements[0]
        .task
        .clone();
    h.store.store_tasks(&[task.clone()]).unwrap();
    h.store
        .store_status(&TaskStatus::new(task.task_id, TaskState::Running))
        .unwrap();

    let mut block = h.block(0);
    assert_eq!(block.status(), BlockStatus::Complete);
    assert!(block.start().is_none());
}

#[test]
fn test_failed_task_gets_update_requirement() {
    let h = Harness::new();
    let target = h.provider.target_name().clone();
    let task = h.provider.new_requirement(&target, 1).unwrap().task_requirements[0]
        .task
        .clone();
    h.store.store_tasks(&[task.clone()]).unwrap();
    h.store
        .store_status(&TaskStatus::new(task.task_id.clone(), TaskState::Failed))
        .unwrap();

    let mut block = h.block(1);
    let requirement = block.start().unwrap();
    let relaunched = &requirement.task_requirements[0].task;
    assert_ne!(relaunched.task_id, task.task_id);
    assert_eq!(relaunched.resources, task.resources);
}

#[test]
fn test_restart_forgets_outstanding_launch() {
    let h = Harness::new();
    let mut block = h.block(0);
    h.launch(&mut block);

    block.restart();
    assert_eq!(block.status(), BlockStatus::Pending);
    assert!(block.pending_tasks().is_empty());
}
