//! Releases reservations nothing refers to any more.
//!
//! A reservation or volume carrying this framework's role whose resource ID
//! is not referenced by any stored task is left over from a replaced or
//! abandoned launch. Volumes are destroyed first, then the reservations
//! (including the disk behind each destroyed volume) are released.

use std::collections::HashSet;

use crate::model::{Offer, Operation, Resource};
use crate::offer::evaluator::OfferRecommendation;
use crate::store::{StoreResult, TaskStore};

pub struct ResourceCleaner {
    role: String,
    expected_resource_ids: HashSet<String>,
    expected_persistence_ids: HashSet<String>,
}

impl ResourceCleaner {
    /// Snapshot the resources referenced by stored tasks.
    pub fn new(store: &dyn TaskStore, role: impl Into<String>) -> StoreResult<Self> {
        let tasks = store.fetch_tasks()?;
        let resources: Vec<&Resource> = tasks.iter().flat_map(|t| t.all_resources()).collect();

        Ok(Self {
            role: role.into(),
            expected_resource_ids: resources
                .iter()
                .filter_map(|r| r.resource_id())
                .map(str::to_string)
                .collect(),
            expected_persistence_ids: resources
                .iter()
                .filter_map(|r| r.persistence_id())
                .map(str::to_string)
                .collect(),
        })
    }

    /// Cleanup operations for the given offers, one recommendation per
    /// offer that has anything to release.
    pub fn evaluate(&self, offers: &[Offer]) -> Vec<OfferRecommendation> {
        offers
            .iter()
            .filter_map(|offer| {
                let operations = self.operations(offer);
                (!operations.is_empty()).then(|| OfferRecommendation {
                    offer_id: offer.id.clone(),
                    agent_id: offer.agent_id.clone(),
                    operations,
                })
            })
            .collect()
    }

    fn operations(&self, offer: &Offer) -> Vec<Operation> {
        let ours = offer
            .resources
            .iter()
            .filter(|r| r.role == self.role && r.is_reserved());

        let mut volumes = Vec::new();
        let mut reservations = Vec::new();
        for resource in ours {
            if let Some(persistence_id) = resource.persistence_id() {
                if !self.expected_persistence_ids.contains(persistence_id) {
                    volumes.push(resource.clone());
                }
            }
            let orphaned = resource
                .resource_id()
                .is_some_and(|id| !self.expected_resource_ids.contains(id));
            if orphaned {
                reservations.push(Resource {
                    volume: None,
                    ..resource.clone()
                });
            }
        }

        let mut operations = Vec::new();
        if !volumes.is_empty() {
            operations.push(Operation::Destroy { volumes });
        }
        if !reservations.is_empty() {
            operations.push(Operation::Unreserve {
                resources: reservations,
            });
        }
        operations
    }
}
