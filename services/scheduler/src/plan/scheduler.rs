//! Matches offers against the current block.

use ksched_id::OfferId;
use tracing::{debug, info};

use crate::driver::SchedulerDriver;
use crate::model::Offer;
use crate::offer::{BrokerHosts, OfferAccepter, OfferEvaluator};
use crate::plan::Block;

pub struct PlanScheduler {
    evaluator: OfferEvaluator,
}

impl PlanScheduler {
    pub fn new(evaluator: OfferEvaluator) -> Self {
        Self { evaluator }
    }

    /// Offer the batch to `block`. Returns the accepted offer IDs.
    pub fn resource_offers(
        &self,
        driver: &mut dyn SchedulerDriver,
        accepter: &OfferAccepter,
        offers: &[Offer],
        block: &mut Block,
        hosts: &BrokerHosts,
    ) -> Vec<OfferId> {
        let Some(requirement) = block.start() else {
            debug!(block = %block.name(), status = ?block.status(), "No requirement for block");
            return Vec::new();
        };

        let Some(recommendation) = self.evaluator.evaluate(&requirement, offers, hosts) else {
            info!(
                block = %block.name(),
                offers = offers.len(),
                "No offer satisfies the block's requirement"
            );
            block.update_offer_status(None);
            return Vec::new();
        };

        let operations = recommendation.operations.clone();
        let accepted = accepter.accept(driver, vec![recommendation]);
        if accepted.is_empty() {
            block.update_offer_status(None);
        } else {
            block.update_offer_status(Some(&operations));
        }
        accepted
    }
}
