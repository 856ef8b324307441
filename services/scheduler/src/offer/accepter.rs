//! Offer acceptance with write-before-acknowledge recording.

use std::sync::Arc;

use ksched_id::OfferId;
use tracing::{info, warn};

use crate::driver::SchedulerDriver;
use crate::model::Operation;
use crate::offer::evaluator::OfferRecommendation;
use crate::store::{StoreResult, TaskStore};

/// Persists the effect of an operation before it is sent.
pub trait OperationRecorder: Send + Sync {
    fn record(&self, operation: &Operation, offer_id: &OfferId) -> StoreResult<()>;
}

/// Stores launched task descriptors so the task is known before it exists.
pub struct PersistentOperationRecorder {
    store: Arc<dyn TaskStore>,
}

impl PersistentOperationRecorder {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }
}

impl OperationRecorder for PersistentOperationRecorder {
    fn record(&self, operation: &Operation, _offer_id: &OfferId) -> StoreResult<()> {
        if let Operation::Launch { tasks } = operation {
            self.store.store_tasks(tasks)?;
        }
        Ok(())
    }
}

/// Records and sends accepted operations.
pub struct OfferAccepter {
    recorders: Vec<Box<dyn OperationRecorder>>,
}

impl OfferAccepter {
    pub fn new(recorders: Vec<Box<dyn OperationRecorder>>) -> Self {
        Self { recorders }
    }

    /// Accept each recommended offer. An offer whose operations cannot be
    /// recorded is not accepted.
    ///
    /// Returns the IDs of the accepted offers.
    pub fn accept(
        &self,
        driver: &mut dyn SchedulerDriver,
        recommendations: Vec<OfferRecommendation>,
    ) -> Vec<OfferId> {
        let mut accepted = Vec::new();

        for rec in recommendations {
            if let Err(e) = self.record(&rec) {
                warn!(
                    offer_id = %rec.offer_id,
                    error = %e,
                    "Failed to record operations, not accepting offer"
                );
                continue;
            }

            let kinds: Vec<&str> = rec.operations.iter().map(Operation::kind).collect();
            info!(
                offer_id = %rec.offer_id,
                agent_id = %rec.agent_id,
                operations = ?kinds,
                "Accepting offer"
            );
            driver.accept_offers(std::slice::from_ref(&rec.offer_id), &rec.operations);
            accepted.push(rec.offer_id);
        }

        accepted
    }

    fn record(&self, rec: &OfferRecommendation) -> StoreResult<()> {
        for operation in &rec.operations {
            for recorder in &self.recorders {
                recorder.record(operation, &rec.offer_id)?;
            }
        }
        Ok(())
    }
}
