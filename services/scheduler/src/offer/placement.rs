//! Broker placement strategies.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::{Offer, TaskInfo};

/// Decides whether an offer's host may run a given broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlacementStrategy {
    /// Any host will do.
    #[default]
    Any,

    /// A broker stays on the host it was first placed on.
    Node,
}

impl PlacementStrategy {
    /// Whether `offer` may host broker `broker_index`.
    pub fn is_acceptable(&self, offer: &Offer, broker_index: u32, hosts: &BrokerHosts) -> bool {
        match self {
            Self::Any => true,
            Self::Node => hosts
                .host(broker_index)
                .map_or(true, |host| host == offer.hostname),
        }
    }
}

impl fmt::Display for PlacementStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("ANY"),
            Self::Node => f.write_str("NODE"),
        }
    }
}

/// Error parsing a placement strategy name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown placement strategy: {0} (expected ANY or NODE)")]
pub struct UnknownPlacementStrategy(pub String);

impl FromStr for PlacementStrategy {
    type Err = UnknownPlacementStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ANY" => Ok(Self::Any),
            "NODE" => Ok(Self::Node),
            _ => Err(UnknownPlacementStrategy(s.to_string())),
        }
    }
}

/// Last known host of each broker index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerHosts(BTreeMap<u32, String>);

impl BrokerHosts {
    /// Collects hosts from stored tasks. Tasks without a broker index or
    /// a host are skipped.
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a TaskInfo>) -> Self {
        Self(
            tasks
                .into_iter()
                .filter_map(|t| Some((t.broker_index().ok()?, t.hostname.clone()?)))
                .collect(),
        )
    }

    pub fn host(&self, broker_index: u32) -> Option<&str> {
        self.0.get(&broker_index).map(String::as_str)
    }

    pub fn insert(&mut self, broker_index: u32, host: impl Into<String>) {
        self.0.insert(broker_index, host.into());
    }
}
