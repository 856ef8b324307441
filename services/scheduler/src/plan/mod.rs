//! Deployment plan.
//!
//! A [`Plan`] is an ordered list of [`Phase`]s, each an ordered list of
//! [`Block`]s. The first incomplete block in that order is the current
//! block and the only one offers are matched against. The default plan has
//! a reconciliation phase followed by one deployment phase with a
//! [`BrokerBlock`] per broker.

mod block;
mod reconciliation;
mod scheduler;

pub use block::{BlockStatus, BrokerBlock};
pub use reconciliation::ReconciliationBlock;
pub use scheduler::PlanScheduler;

use std::sync::Arc;

use ksched_id::{BlockId, PhaseId, PlanId, TaskId};
use ksched_reconcile::SpecHash;
use serde::Serialize;

use crate::model::{Operation, TaskStatus};
use crate::offer::{OfferRequirement, OfferRequirementProvider};
use crate::operator::OperatorRequests;
use crate::reconciler::Reconciler;
use crate::store::TaskStore;

/// A unit of work in a phase.
pub enum Block {
    Reconciliation(ReconciliationBlock),
    Broker(BrokerBlock),
}

impl Block {
    pub fn id(&self) -> BlockId {
        match self {
            Self::Reconciliation(b) => b.id(),
            Self::Broker(b) => b.id(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Reconciliation(_) => ReconciliationBlock::NAME,
            Self::Broker(b) => b.name(),
        }
    }

    pub fn status(&self) -> BlockStatus {
        match self {
            Self::Reconciliation(b) => b.status(),
            Self::Broker(b) => b.status(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status() == BlockStatus::Complete
    }

    /// Broker index targeted by this block, if any.
    pub fn broker_index(&self) -> Option<u32> {
        match self {
            Self::Reconciliation(_) => None,
            Self::Broker(b) => Some(b.broker_index()),
        }
    }

    pub fn start(&mut self) -> Option<OfferRequirement> {
        match self {
            Self::Reconciliation(_) => None,
            Self::Broker(b) => b.start(),
        }
    }

    pub fn update_offer_status(&mut self, operations: Option<&[Operation]>) {
        if let Self::Broker(b) = self {
            b.update_offer_status(operations);
        }
    }

    pub fn update(&mut self, status: &TaskStatus) {
        match self {
            Self::Reconciliation(b) => b.update(status),
            Self::Broker(b) => b.update(status),
        }
    }

    pub fn restart(&mut self) {
        match self {
            Self::Reconciliation(b) => b.restart(),
            Self::Broker(b) => b.restart(),
        }
    }

    fn pending_tasks(&self) -> &[TaskId] {
        match self {
            Self::Reconciliation(_) => &[],
            Self::Broker(b) => b.pending_tasks(),
        }
    }
}

/// Named, ordered group of blocks.
pub struct Phase {
    id: PhaseId,
    name: String,
    blocks: Vec<Block>,
}

impl Phase {
    pub fn new(name: impl Into<String>, blocks: Vec<Block>) -> Self {
        Self {
            id: PhaseId::new(),
            name: name.into(),
            blocks,
        }
    }

    pub fn id(&self) -> PhaseId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id() == id)
    }

    pub fn is_complete(&self) -> bool {
        self.blocks.iter().all(Block::is_complete)
    }
}

/// Ordered phases plus the validation errors found when it was built.
pub struct Plan {
    id: PlanId,
    phases: Vec<Phase>,
    errors: Vec<String>,
}

impl Plan {
    pub fn new(phases: Vec<Phase>, errors: Vec<String>) -> Self {
        Self {
            id: PlanId::new(),
            phases,
            errors,
        }
    }

    /// Reconciliation followed by one block per broker.
    pub fn deployment(
        reconciler: Reconciler,
        target: &SpecHash,
        broker_count: u32,
        store: Arc<dyn TaskStore>,
        provider: Arc<dyn OfferRequirementProvider>,
        requests: OperatorRequests,
        errors: Vec<String>,
    ) -> Self {
        let reconciliation = Phase::new(
            "Reconciliation",
            vec![Block::Reconciliation(ReconciliationBlock::new(reconciler))],
        );

        let brokers = (0..broker_count)
            .map(|index| {
                Block::Broker(BrokerBlock::new(
                    index,
                    target.clone(),
                    store.clone(),
                    provider.clone(),
                    requests.clone(),
                ))
            })
            .collect();
        let update = Phase::new(format!("Update to: {target}"), brokers);

        Self::new(vec![reconciliation, update], errors)
    }

    pub fn id(&self) -> PlanId {
        self.id
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn is_complete(&self) -> bool {
        self.phases.iter().all(Phase::is_complete)
    }

    /// First incomplete block.
    pub fn current_block(&self) -> Option<&Block> {
        self.blocks().find(|b| !b.is_complete())
    }

    pub fn current_block_mut(&mut self) -> Option<&mut Block> {
        self.phases
            .iter_mut()
            .flat_map(|p| p.blocks.iter_mut())
            .find(|b| !b.is_complete())
    }

    pub fn reconciliation(&self) -> Option<&ReconciliationBlock> {
        self.blocks().find_map(|b| match b {
            Block::Reconciliation(r) => Some(r),
            Block::Broker(_) => None,
        })
    }

    pub fn reconciliation_mut(&mut self) -> Option<&mut ReconciliationBlock> {
        self.phases
            .iter_mut()
            .flat_map(|p| p.blocks.iter_mut())
            .find_map(|b| match b {
                Block::Reconciliation(r) => Some(r),
                Block::Broker(_) => None,
            })
    }

    /// Deliver a status update to every block; each ignores what is not its own.
    pub fn update(&mut self, status: &TaskStatus) {
        for block in self.phases.iter_mut().flat_map(|p| p.blocks.iter_mut()) {
            block.update(status);
        }
    }

    pub fn status(&self) -> PlanStatus {
        PlanStatus {
            plan_id: self.id,
            complete: self.is_complete(),
            current_block: self.current_block().map(|b| b.name().to_string()),
            errors: self.errors.clone(),
            phases: self
                .phases
                .iter()
                .map(|phase| PhaseStatus {
                    id: phase.id,
                    name: phase.name.clone(),
                    complete: phase.is_complete(),
                    blocks: phase
                        .blocks
                        .iter()
                        .map(|block| BlockSummary {
                            id: block.id(),
                            name: block.name().to_string(),
                            status: block.status(),
                            pending_tasks: block.pending_tasks().to_vec(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.phases.iter().flat_map(|p| p.blocks.iter())
    }
}

/// Snapshot of plan progress, published for readers outside the control loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanStatus {
    pub plan_id: PlanId,
    pub complete: bool,
    pub current_block: Option<String>,
    pub errors: Vec<String>,
    pub phases: Vec<PhaseStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseStatus {
    pub id: PhaseId,
    pub name: String,
    pub complete: bool,
    pub blocks: Vec<BlockSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockSummary {
    pub id: BlockId,
    pub name: String,
    pub status: BlockStatus,
    pub pending_tasks: Vec<TaskId>,
}
