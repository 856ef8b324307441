//! Typed ID definitions.

use crate::{define_id, define_opaque_id, IdError};

// =============================================================================
// Deployment Plan
// =============================================================================

define_id!(PlanId, "plan");
define_id!(PhaseId, "phase");
define_id!(BlockId, "blk");

// =============================================================================
// Cluster Manager
// =============================================================================

define_opaque_id!(FrameworkId);
define_opaque_id!(OfferId);
define_opaque_id!(AgentId);
define_opaque_id!(ExecutorId);
define_opaque_id!(TaskId);

// =============================================================================
// Broker Tasks
// =============================================================================

/// Prefix shared by every broker task name.
pub const BROKER_TASK_PREFIX: &str = "broker-";

/// Separator between the task name and the unique suffix in a task ID.
pub const TASK_ID_SEPARATOR: &str = "__";

/// Returns the logical task name for a broker index (`broker-3`).
#[must_use]
pub fn broker_task_name(index: u32) -> String {
    format!("{BROKER_TASK_PREFIX}{index}")
}

/// Returns the executor name for a broker index (`broker-3-executor`).
#[must_use]
pub fn broker_executor_name(index: u32) -> String {
    format!("{BROKER_TASK_PREFIX}{index}-executor")
}

/// Parses the broker index out of a task name.
pub fn broker_index(task_name: &str) -> Result<u32, IdError> {
    task_name
        .strip_prefix(BROKER_TASK_PREFIX)
        .and_then(|rest| rest.parse().ok())
        .ok_or_else(|| IdError::InvalidTaskName(task_name.to_string()))
}

impl TaskId {
    /// Generates a fresh task ID for a logical task name.
    #[must_use]
    pub fn generate(task_name: &str) -> Self {
        Self::new(format!(
            "{task_name}{TASK_ID_SEPARATOR}{}",
            uuid::Uuid::new_v4()
        ))
    }

    /// Returns the logical task name this ID was generated for.
    pub fn task_name(&self) -> Result<&str, IdError> {
        self.as_str()
            .split_once(TASK_ID_SEPARATOR)
            .map(|(name, _)| name)
            .filter(|name| !name.is_empty())
            .ok_or(IdError::MissingSeparator(TASK_ID_SEPARATOR))
    }
}

impl ExecutorId {
    /// Generates a fresh executor ID for an executor name.
    #[must_use]
    pub fn generate(executor_name: &str) -> Self {
        Self::new(format!(
            "{executor_name}{TASK_ID_SEPARATOR}{}",
            uuid::Uuid::new_v4()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plan_id_roundtrip() {
        let id = PlanId::new();
        let s = id.to_string();
        assert!(s.starts_with("plan_"));
        let parsed: PlanId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_block_id_wrong_prefix() {
        let phase = PhaseId::new().to_string();
        let result = BlockId::parse(&phase);
        assert!(result.unwrap_err().is_prefix_error());
    }

    #[test]
    fn test_block_id_invalid_ulid() {
        let result: Result<BlockId, _> = "blk_invalid".parse();
        assert!(matches!(result.unwrap_err(), IdError::InvalidUlid(_)));
    }

    #[test]
    fn test_block_id_json_roundtrip() {
        let id = BlockId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: BlockId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_opaque_id_rejects_empty() {
        assert!(OfferId::parse("").unwrap_err().is_empty());
        assert_eq!(OfferId::parse("offer-1").unwrap().as_str(), "offer-1");
    }

    #[test]
    fn test_opaque_id_json_is_plain_string() {
        let id = AgentId::new("agent-7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"agent-7\"");
    }

    #[test]
    fn test_generated_task_id_maps_back_to_name() {
        let id = TaskId::generate("broker-2");
        assert!(id.as_str().starts_with("broker-2__"));
        assert_eq!(id.task_name().unwrap(), "broker-2");
        assert_ne!(id, TaskId::generate("broker-2"));
    }

    #[test]
    fn test_foreign_task_id_has_no_name() {
        let id = TaskId::new("bad-task-id");
        assert_eq!(
            id.task_name().unwrap_err(),
            IdError::MissingSeparator(TASK_ID_SEPARATOR)
        );
    }

    #[test]
    fn test_broker_index_rejects_other_names() {
        assert_eq!(broker_index("broker-12").unwrap(), 12);
        assert!(broker_index("zookeeper-1").is_err());
        assert!(broker_index("broker-").is_err());
    }

    #[test]
    fn test_all_id_prefixes_unique() {
        let prefixes = [PlanId::PREFIX, PhaseId::PREFIX, BlockId::PREFIX];
        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len(), "Duplicate ID prefixes found!");
    }

    proptest! {
        #[test]
        fn prop_broker_name_roundtrip(index in 0u32..10_000) {
            let name = broker_task_name(index);
            prop_assert_eq!(broker_index(&name).unwrap(), index);
            let id = TaskId::generate(&name);
            prop_assert_eq!(id.task_name().unwrap(), name.as_str());
        }
    }
}
