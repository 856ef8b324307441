//! Matches requirements against offers.

use std::collections::BTreeMap;

use ksched_id::{AgentId, OfferId};
use tracing::debug;

use crate::model::{Offer, Operation, Resource, TaskInfo};
use crate::offer::placement::BrokerHosts;
use crate::offer::requirement::{OfferRequirement, RequirementKind};

/// Operations to perform against one offer.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferRecommendation {
    pub offer_id: OfferId,
    pub agent_id: AgentId,
    pub operations: Vec<Operation>,
}

impl OfferRecommendation {
    /// Tasks launched by this recommendation.
    pub fn launched_tasks(&self) -> impl Iterator<Item = &TaskInfo> {
        self.operations.iter().flat_map(Operation::launched_tasks)
    }
}

/// Finds the first offer that satisfies a requirement.
#[derive(Debug, Clone)]
pub struct OfferEvaluator {
    role: String,
}

impl OfferEvaluator {
    pub fn new(role: impl Into<String>) -> Self {
        Self { role: role.into() }
    }

    /// Match `requirement` against `offers` in order.
    ///
    /// The first offer that passes placement and carries enough resources
    /// wins; the rest are left untouched.
    pub fn evaluate(
        &self,
        requirement: &OfferRequirement,
        offers: &[Offer],
        hosts: &BrokerHosts,
    ) -> Option<OfferRecommendation> {
        offers.iter().find_map(|offer| {
            if !requirement
                .placement
                .is_acceptable(offer, requirement.broker_index, hosts)
            {
                debug!(
                    offer_id = %offer.id,
                    hostname = %offer.hostname,
                    broker_index = requirement.broker_index,
                    "Offer rejected by placement strategy"
                );
                return None;
            }

            let satisfied = match requirement.kind {
                RequirementKind::New => self.has_unreserved(requirement, offer),
                RequirementKind::Update => has_reserved(requirement, offer),
            };
            if !satisfied {
                debug!(
                    offer_id = %offer.id,
                    broker_index = requirement.broker_index,
                    "Offer does not satisfy requirement"
                );
                return None;
            }

            Some(OfferRecommendation {
                offer_id: offer.id.clone(),
                agent_id: offer.agent_id.clone(),
                operations: operations(requirement, offer),
            })
        })
    }

    fn has_unreserved(&self, requirement: &OfferRequirement, offer: &Offer) -> bool {
        let mut needed: BTreeMap<&str, f64> = BTreeMap::new();
        for resource in requirement.resources() {
            *needed.entry(resource.name.as_str()).or_default() += resource.value;
        }
        needed
            .into_iter()
            .all(|(name, amount)| offer.unreserved(name, &self.role) >= amount)
    }
}

fn has_reserved(requirement: &OfferRequirement, offer: &Offer) -> bool {
    requirement.resources().all(|wanted| {
        let Some(id) = wanted.resource_id() else {
            return false;
        };
        offer.reserved(id).is_some_and(|found| {
            found.value >= wanted.value && found.persistence_id() == wanted.persistence_id()
        })
    })
}

fn operations(requirement: &OfferRequirement, offer: &Offer) -> Vec<Operation> {
    let mut operations = Vec::new();

    if requirement.kind == RequirementKind::New {
        let reservations: Vec<Resource> = requirement
            .resources()
            .map(|r| Resource {
                volume: None,
                ..r.clone()
            })
            .collect();
        let volumes: Vec<Resource> = requirement
            .resources()
            .filter(|r| r.volume.is_some())
            .cloned()
            .collect();

        operations.push(Operation::Reserve {
            resources: reservations,
        });
        if !volumes.is_empty() {
            operations.push(Operation::Create { volumes });
        }
    }

    let executor = requirement
        .executor_requirement
        .as_ref()
        .map(|e| e.executor.clone());
    let tasks = requirement
        .task_requirements
        .iter()
        .map(|r| TaskInfo {
            agent_id: Some(offer.agent_id.clone()),
            hostname: Some(offer.hostname.clone()),
            executor: executor.clone(),
            ..r.task.clone()
        })
        .collect();
    operations.push(Operation::Launch { tasks });

    operations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RESOURCE_CPUS, RESOURCE_DISK, RESOURCE_MEM};
    use crate::offer::requirement::tests::provider;
    use crate::offer::requirement::OfferRequirementProvider;
    use crate::offer::PlacementStrategy;

    fn offer(id: &str, host: &str, cpus: f64, mem: f64, disk: f64) -> Offer {
        Offer {
            id: OfferId::new(id),
            agent_id: AgentId::new(format!("agent-{host}")),
            hostname: host.to_string(),
            resources: vec![
                Resource::scalar(RESOURCE_CPUS, cpus),
                Resource::scalar(RESOURCE_MEM, mem),
                Resource::scalar(RESOURCE_DISK, disk),
            ],
        }
    }

    fn new_requirement(placement: PlacementStrategy, index: u32) -> OfferRequirement {
        let provider = provider(placement);
        let name = provider.target_name().clone();
        provider.new_requirement(&name, index).unwrap()
    }

    #[test]
    fn test_new_requirement_reserves_creates_and_launches() {
        let req = new_requirement(PlacementStrategy::Any, 0);
        let evaluator = OfferEvaluator::new("kafka-role");
        let offers = vec![
            offer("small", "host-a", 0.5, 512.0, 100.0),
            offer("big", "host-b", 8.0, 16384.0, 100000.0),
        ];

        let rec = evaluator
            .evaluate(&req, &offers, &BrokerHosts::default())
            .unwrap();
        assert_eq!(rec.offer_id, OfferId::new("big"));

        let kinds: Vec<_> = rec.operations.iter().map(Operation::kind).collect();
        assert_eq!(kinds, vec!["RESERVE", "CREATE", "LAUNCH"]);

        let launched: Vec<_> = rec.launched_tasks().collect();
        assert_eq!(launched.len(), 1);
        assert_eq!(launched[0].hostname.as_deref(), Some("host-b"));
        assert!(launched[0].executor.is_some());
        assert_eq!(launched[0].task_id, req.task_ids()[0]);
    }

    #[test]
    fn test_node_placement_skips_other_hosts() {
        let req = new_requirement(PlacementStrategy::Node, 1);
        let evaluator = OfferEvaluator::new("kafka-role");
        let offers = vec![
            offer("o1", "host-a", 8.0, 16384.0, 100000.0),
            offer("o2", "host-b", 8.0, 16384.0, 100000.0),
        ];
        let mut hosts = BrokerHosts::default();
        hosts.insert(1, "host-b");

        let rec = evaluator.evaluate(&req, &offers, &hosts).unwrap();
        assert_eq!(rec.offer_id, OfferId::new("o2"));
    }

    #[test]
    fn test_update_requires_matching_reservations() {
        let provider = provider(PlacementStrategy::Any);
        let name = provider.target_name().clone();
        let task = new_requirement(PlacementStrategy::Any, 0).task_requirements[0]
            .task
            .clone();
        let req = provider.update_requirement(&name, &task).unwrap();
        let evaluator = OfferEvaluator::new("kafka-role");

        let unreserved = offer("plain", "host-a", 8.0, 16384.0, 100000.0);
        let reserved = Offer {
            id: OfferId::new("reserved"),
            agent_id: AgentId::new("agent-a"),
            hostname: "host-a".to_string(),
            resources: task.resources.clone(),
        };

        let rec = evaluator
            .evaluate(&req, &[unreserved, reserved], &BrokerHosts::default())
            .unwrap();
        assert_eq!(rec.offer_id, OfferId::new("reserved"));
        let kinds: Vec<_> = rec.operations.iter().map(Operation::kind).collect();
        assert_eq!(kinds, vec!["LAUNCH"]);
    }

    #[test]
    fn test_no_match() {
        let req = new_requirement(PlacementStrategy::Any, 0);
        let evaluator = OfferEvaluator::new("kafka-role");
        let offers = vec![offer("tiny", "host-a", 0.1, 64.0, 10.0)];
        assert!(evaluator
            .evaluate(&req, &offers, &BrokerHosts::default())
            .is_none());
    }
}
