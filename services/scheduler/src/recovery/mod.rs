//! Recovery of failed brokers.
//!
//! Every offer batch the recovery scheduler looks for brokers whose current
//! task has terminated, outside the broker the deployment plan is working
//! on. Each is classified by the [`FailureMonitor`]:
//!
//! - **Transient**: relaunched in place on its existing reservations.
//! - **Permanent**: relaunched on fresh resources wherever they are offered.
//!   Operator replacement requests land here directly.
//!
//! Relaunches of one broker are spaced by the [`LaunchConstrainer`].

mod listener;

pub use listener::TaskFailureListener;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use ksched_id::{OfferId, TaskId};
use ksched_reconcile::{FailureClass, FailureMonitor, LaunchConstrainer, SpecHash};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::driver::SchedulerDriver;
use crate::model::{Offer, TaskState, TaskStatus};
use crate::offer::{BrokerHosts, OfferAccepter, OfferEvaluator, OfferRequirementProvider};
use crate::store::{TaskRecord, TaskStore};

/// Brokers being recovered, published after every recovery pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryStatus {
    /// Transiently failed or mid-relaunch.
    pub recovering: Vec<String>,

    /// Permanently failed, awaiting replacement.
    pub failed: Vec<String>,

    pub updated_at: DateTime<Utc>,
}

impl RecoveryStatus {
    pub fn empty() -> Self {
        Self {
            recovering: Vec::new(),
            failed: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

pub struct RecoveryScheduler {
    store: Arc<dyn TaskStore>,
    provider: Arc<dyn OfferRequirementProvider>,
    target: SpecHash,
    evaluator: OfferEvaluator,
    constrainer: Box<dyn LaunchConstrainer>,
    monitor: FailureMonitor,

    /// Relaunched tasks not yet reported running, by task name.
    in_flight: BTreeMap<String, TaskId>,

    status_tx: watch::Sender<Arc<RecoveryStatus>>,
}

impl RecoveryScheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        provider: Arc<dyn OfferRequirementProvider>,
        target: SpecHash,
        evaluator: OfferEvaluator,
        constrainer: Box<dyn LaunchConstrainer>,
        monitor: FailureMonitor,
    ) -> Self {
        let (status_tx, _) = watch::channel(Arc::new(RecoveryStatus::empty()));
        Self {
            store,
            provider,
            target,
            evaluator,
            constrainer,
            monitor,
            in_flight: BTreeMap::new(),
            status_tx,
        }
    }

    /// Subscribe to published recovery status.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RecoveryStatus>> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> Arc<RecoveryStatus> {
        self.status_tx.borrow().clone()
    }

    /// Relaunch failed brokers on the given offers.
    ///
    /// `current_block` is the broker index the deployment plan currently
    /// owns; it is never recovered here. Returns the accepted offer IDs.
    pub fn resource_offers(
        &mut self,
        driver: &mut dyn SchedulerDriver,
        accepter: &OfferAccepter,
        offers: &[Offer],
        current_block: Option<u32>,
        hosts: &BrokerHosts,
    ) -> Vec<OfferId> {
        self.resource_offers_at(driver, accepter, offers, current_block, hosts, Instant::now())
    }

    pub(crate) fn resource_offers_at(
        &mut self,
        driver: &mut dyn SchedulerDriver,
        accepter: &OfferAccepter,
        offers: &[Offer],
        current_block: Option<u32>,
        hosts: &BrokerHosts,
        now: Instant,
    ) -> Vec<OfferId> {
        let records = match self.store.fetch_records() {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Failed to read task records for recovery");
                return Vec::new();
            }
        };

        let candidates = self.classify(&records, current_block, now);

        let mut remaining = offers.to_vec();
        let mut accepted = Vec::new();

        for (record, class) in candidates {
            if remaining.is_empty() {
                break;
            }

            let name = record.info.name.as_str();
            if !self.constrainer.can_launch(name, now) {
                debug!(task = %name, "Relaunch delayed by launch constrainer");
                continue;
            }

            let requirement = match class {
                FailureClass::Transient => {
                    self.provider.update_requirement(&self.target, &record.info)
                }
                FailureClass::Permanent => self.provider.replacement_requirement(&record.info),
            };
            let requirement = match requirement {
                Ok(requirement) => requirement,
                Err(e) => {
                    warn!(task = %name, error = %e, "Failed to build recovery requirement");
                    continue;
                }
            };

            let Some(recommendation) = self.evaluator.evaluate(&requirement, &remaining, hosts)
            else {
                debug!(task = %name, "No offer satisfies recovery requirement");
                continue;
            };

            let ids = accepter.accept(driver, vec![recommendation]);
            if ids.is_empty() {
                continue;
            }

            info!(
                task = %name,
                failed_task_id = %record.info.task_id,
                class = ?class,
                "Relaunched failed broker"
            );
            remaining.retain(|offer| !ids.contains(&offer.id));
            self.constrainer.launch_happened(name, now);
            if let Some(task_id) = requirement.task_ids().into_iter().next() {
                self.in_flight.insert(name.to_string(), task_id);
            }
            if class == FailureClass::Permanent {
                self.monitor.clear(name);
            }
            accepted.extend(ids);
        }

        accepted
    }

    /// Whether any broker is failed or mid-relaunch.
    pub fn has_operations(&self) -> bool {
        if !self.in_flight.is_empty() {
            return true;
        }
        match self.store.fetch_records() {
            Ok(records) => records.iter().any(TaskRecord::is_terminated),
            Err(e) => {
                warn!(error = %e, "Failed to read task records, assuming recovery work");
                true
            }
        }
    }

    /// Track the outcome of relaunches.
    pub fn update(&mut self, status: &TaskStatus) {
        let Ok(name) = status.task_id.task_name() else {
            return;
        };

        let relaunched = self.in_flight.get(name) == Some(&status.task_id);
        if status.state == TaskState::Running {
            if relaunched {
                info!(task = %name, task_id = %status.task_id, "Recovered broker is running");
                self.in_flight.remove(name);
            }
            self.monitor.clear(name);
        } else if relaunched && status.state.is_terminal() {
            self.in_flight.remove(name);
        }
    }

    /// Classify failed brokers and publish the result.
    fn classify<'a>(
        &mut self,
        records: &'a [TaskRecord],
        current_block: Option<u32>,
        now: Instant,
    ) -> Vec<(&'a TaskRecord, FailureClass)> {
        // Relaunches superseded by another launch no longer need tracking.
        self.in_flight.retain(|name, task_id| {
            records
                .iter()
                .any(|r| r.info.name == *name && r.info.task_id == *task_id && !r.is_terminated())
        });

        let mut candidates = Vec::new();
        for record in records.iter().filter(|r| r.is_terminated()) {
            if record.info.broker_index().ok() == current_block {
                continue;
            }
            let name = record.info.name.as_str();
            self.monitor
                .record_failure(name, record.info.task_id.as_str(), now);

            let class = if record.info.is_permanently_failed() {
                FailureClass::Permanent
            } else {
                self.monitor.classify(name, now)
            };
            candidates.push((record, class));
        }

        let failed: Vec<&str> = records
            .iter()
            .filter(|r| r.is_terminated())
            .map(|r| r.info.name.as_str())
            .collect();
        let in_flight = &self.in_flight;
        self.monitor
            .retain(|unit| failed.contains(&unit) || in_flight.contains_key(unit));

        let mut recovering: Vec<String> = self.in_flight.keys().cloned().collect();
        let mut permanent = Vec::new();
        for (record, class) in &candidates {
            match class {
                FailureClass::Transient => recovering.push(record.info.name.clone()),
                FailureClass::Permanent => permanent.push(record.info.name.clone()),
            }
        }
        recovering.sort();
        recovering.dedup();

        self.status_tx.send_replace(Arc::new(RecoveryStatus {
            recovering,
            failed: permanent,
            updated_at: Utc::now(),
        }));

        candidates
    }
}
