//! Top-level control loop.
//!
//! [`BrokerScheduler`] handles every cluster manager callback. Callbacks run
//! serially to completion (see [`worker`]); nothing here blocks or awaits.
//!
//! ## Offer batch
//!
//! 1. Advance reconciliation
//! 2. Act on queued operator restart/replace requests
//! 3. If reconciled: current plan block, then recovery, then cleanup
//! 4. Decline every offer nobody used
//! 5. Suppress offers if there is no work left
//!
//! ## Status update
//!
//! The status is stored, then delivered to the plan and to recovery. A
//! status the store rejects (unknown or superseded task) is not delivered.
//! Either way, offers are revived if there is work to do.

pub mod worker;

use std::sync::Arc;

use ksched_id::{AgentId, ExecutorId, FrameworkId, OfferId};
use ksched_reconcile::{FailureMonitor, TimedLaunchConstrainer};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::driver::SchedulerDriver;
use crate::error::{SchedulerError, SchedulerResult};
use crate::model::{Offer, TaskStatus};
use crate::offer::{
    BrokerHosts, OfferAccepter, OfferEvaluator, PersistentOperationRecorder,
    PersistentRequirementProvider, ResourceCleaner,
};
use crate::operator::OperatorRequests;
use crate::plan::{Plan, PlanScheduler, PlanStatus};
use crate::reconciler::Reconciler;
use crate::recovery::{RecoveryScheduler, RecoveryStatus, TaskFailureListener};
use crate::store::TaskStore;

/// Whether the cluster manager is currently sending offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferMode {
    /// Not known since (re)registration.
    Unknown,
    Revived,
    Suppressed,
}

pub struct BrokerScheduler {
    store: Arc<dyn TaskStore>,
    role: String,
    requests: OperatorRequests,
    plan: Plan,
    plan_scheduler: PlanScheduler,
    recovery: RecoveryScheduler,
    accepter: OfferAccepter,
    failure_listener: TaskFailureListener,
    offer_mode: OfferMode,
    plan_tx: watch::Sender<Arc<PlanStatus>>,
}

impl BrokerScheduler {
    pub fn new(config: &Config, store: Arc<dyn TaskStore>) -> Self {
        let target = config.target();
        let target_name = target.name.clone();
        let provider = Arc::new(PersistentRequirementProvider::new(
            config.service.clone(),
            target,
        ));
        let requests = OperatorRequests::new();
        let evaluator = OfferEvaluator::new(&config.service.role);

        let reconciler = Reconciler::new(store.clone(), config.reconcile.clone());
        let plan = Plan::deployment(
            reconciler,
            &target_name,
            config.service.broker_count,
            store.clone(),
            provider.clone(),
            requests.clone(),
            config.validate(),
        );
        for error in plan.errors() {
            warn!(error = %error, "Configuration validation error");
        }

        let recovery = RecoveryScheduler::new(
            store.clone(),
            provider,
            target_name,
            evaluator.clone(),
            Box::new(TimedLaunchConstrainer::new(config.recovery.repair_delay)),
            FailureMonitor::new(config.recovery.max_failures, config.recovery.grace_period),
        );

        let (plan_tx, _) = watch::channel(Arc::new(plan.status()));

        Self {
            accepter: OfferAccepter::new(vec![Box::new(PersistentOperationRecorder::new(
                store.clone(),
            ))]),
            failure_listener: TaskFailureListener::new(store.clone()),
            store,
            role: config.service.role.clone(),
            requests,
            plan,
            plan_scheduler: PlanScheduler::new(evaluator),
            recovery,
            offer_mode: OfferMode::Unknown,
            plan_tx,
        }
    }

    /// Handle for queueing operator requests.
    pub fn requests(&self) -> OperatorRequests {
        self.requests.clone()
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn offer_mode(&self) -> OfferMode {
        self.offer_mode
    }

    pub fn subscribe_plan(&self) -> watch::Receiver<Arc<PlanStatus>> {
        self.plan_tx.subscribe()
    }

    pub fn subscribe_recovery(&self) -> watch::Receiver<Arc<RecoveryStatus>> {
        self.recovery.subscribe()
    }

    /// Whether any deployment or recovery work remains.
    pub fn has_operations(&self) -> bool {
        !self.plan.is_complete() || self.recovery.has_operations()
    }

    pub fn registered(
        &mut self,
        _driver: &mut dyn SchedulerDriver,
        framework_id: &FrameworkId,
    ) -> SchedulerResult<()> {
        info!(framework_id = %framework_id, "Registered framework");
        self.store.set_framework_id(framework_id).map_err(|e| {
            SchedulerError::Fatal(format!("failed to persist framework id: {e}"))
        })?;
        // A fresh registration receives offers until told otherwise.
        self.offer_mode = OfferMode::Revived;
        Ok(())
    }

    pub fn reregistered(&mut self, _driver: &mut dyn SchedulerDriver) {
        info!("Re-registered framework");
        if let Some(reconciliation) = self.plan.reconciliation_mut() {
            reconciliation.restart();
        }
        self.offer_mode = OfferMode::Unknown;
        self.publish_plan();
    }

    pub fn disconnected(&mut self) {
        warn!("Disconnected from cluster manager");
    }

    pub fn offer_rescinded(&mut self, offer_id: &OfferId) {
        info!(offer_id = %offer_id, "Offer rescinded");
    }

    pub fn agent_lost(&mut self, agent_id: &AgentId) {
        info!(agent_id = %agent_id, "Agent lost");
    }

    pub fn executor_lost(&mut self, executor_id: &ExecutorId, agent_id: &AgentId, status: i32) {
        info!(
            executor_id = %executor_id,
            agent_id = %agent_id,
            status,
            "Executor lost"
        );
    }

    /// The driver has aborted; nothing more will be delivered.
    pub fn error(&mut self, message: &str) -> SchedulerResult<()> {
        error!(message = %message, "Scheduler driver error");
        Err(SchedulerError::Fatal(format!("driver error: {message}")))
    }

    pub fn status_update(&mut self, driver: &mut dyn SchedulerDriver, status: &TaskStatus) {
        info!(
            task_id = %status.task_id,
            state = ?status.state,
            reason = ?status.reason,
            message = status.message.as_deref().unwrap_or(""),
            "Received status update"
        );

        match self.store.store_status(status) {
            Ok(()) => {
                self.plan.update(status);
                self.recovery.update(status);
                self.publish_plan();
            }
            Err(e) => warn!(
                task_id = %status.task_id,
                error = %e,
                "Failed to store status update, ignoring it"
            ),
        }

        if self.has_operations() {
            self.revive(driver);
        }
    }

    pub fn resource_offers(&mut self, driver: &mut dyn SchedulerDriver, offers: Vec<Offer>) {
        for offer in &offers {
            info!(
                offer_id = %offer.id,
                agent_id = %offer.agent_id,
                hostname = %offer.hostname,
                resources = offer.resources.len(),
                "Received offer"
            );
        }

        let reconciled = match self.plan.reconciliation_mut() {
            Some(reconciliation) => {
                reconciliation.reconcile(driver);
                reconciliation.is_reconciled()
            }
            None => true,
        };

        self.process_operator_requests(driver);

        let mut accepted = Vec::new();
        if reconciled {
            accepted = self.schedule(driver, &offers);
        } else {
            info!("Accepting no offers: reconciliation in progress");
        }

        info!(accepted = accepted.len(), "Offers accepted");
        for offer in offers.iter().filter(|o| !accepted.contains(&o.id)) {
            info!(offer_id = %offer.id, "Declining offer");
            driver.decline_offer(&offer.id);
        }

        self.publish_plan();

        if !self.has_operations() {
            self.suppress(driver);
        }
    }

    /// Deployment, then recovery, then cleanup, each on what is left.
    fn schedule(&mut self, driver: &mut dyn SchedulerDriver, offers: &[Offer]) -> Vec<OfferId> {
        let hosts = match self.store.fetch_tasks() {
            Ok(tasks) => BrokerHosts::from_tasks(&tasks),
            Err(e) => {
                warn!(error = %e, "Failed to read tasks, skipping offer matching");
                return Vec::new();
            }
        };

        let mut accepted = Vec::new();

        let current_block = self.plan.current_block().and_then(|b| b.broker_index());
        if let Some(block) = self.plan.current_block_mut() {
            accepted.extend(self.plan_scheduler.resource_offers(
                driver,
                &self.accepter,
                offers,
                block,
                &hosts,
            ));
        }

        let unused = unused_offers(offers, &accepted);
        accepted.extend(self.recovery.resource_offers(
            driver,
            &self.accepter,
            &unused,
            current_block,
            &hosts,
        ));

        let unused = unused_offers(offers, &accepted);
        match ResourceCleaner::new(self.store.as_ref(), &self.role) {
            Ok(cleaner) => {
                accepted.extend(self.accepter.accept(driver, cleaner.evaluate(&unused)));
            }
            Err(e) => warn!(error = %e, "Failed to read tasks, skipping resource cleanup"),
        }

        accepted
    }

    fn process_operator_requests(&mut self, driver: &mut dyn SchedulerDriver) {
        for task in self.requests.drain_restarts() {
            info!(task_id = %task.task_id, "Restarting task");
            driver.kill_task(&task.task_id);
        }

        for task in self.requests.drain_replacements() {
            info!(task_id = %task.task_id, "Replacing task");
            self.failure_listener.task_failed(&task.task_id);
            driver.kill_task(&task.task_id);
        }
    }

    fn revive(&mut self, driver: &mut dyn SchedulerDriver) {
        if self.offer_mode == OfferMode::Revived {
            return;
        }
        info!("Reviving offers");
        driver.revive_offers();
        self.offer_mode = OfferMode::Revived;
        if let Err(e) = self.store.set_suppressed(false) {
            warn!(error = %e, "Failed to persist offer mode");
        }
    }

    fn suppress(&mut self, driver: &mut dyn SchedulerDriver) {
        if self.offer_mode == OfferMode::Suppressed {
            return;
        }
        info!("Suppressing offers");
        driver.suppress_offers();
        self.offer_mode = OfferMode::Suppressed;
        if let Err(e) = self.store.set_suppressed(true) {
            warn!(error = %e, "Failed to persist offer mode");
        }
    }

    fn publish_plan(&self) {
        self.plan_tx.send_replace(Arc::new(self.plan.status()));
    }
}

fn unused_offers(offers: &[Offer], accepted: &[OfferId]) -> Vec<Offer> {
    offers
        .iter()
        .filter(|o| !accepted.contains(&o.id))
        .cloned()
        .collect()
}
