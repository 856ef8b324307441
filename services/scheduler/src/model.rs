//! Cluster manager value types.
//!
//! These mirror the subset of the resource-offer protocol the scheduler
//! reasons about. They are immutable values: the scheduler never mutates an
//! offer it received, it proposes [`Operation`]s against it.

use std::collections::BTreeMap;

use ksched_id::{broker_index, AgentId, ExecutorId, IdError, OfferId, TaskId};
use serde::{Deserialize, Serialize};

/// Resource names understood by the scheduler.
pub const RESOURCE_CPUS: &str = "cpus";
pub const RESOURCE_MEM: &str = "mem";
pub const RESOURCE_DISK: &str = "disk";

/// Role of resources that are not reserved for any framework.
pub const UNRESERVED_ROLE: &str = "*";

/// Task label holding the name of the configuration the task was launched with.
pub const CONFIG_TARGET_LABEL: &str = "config_target";

/// Task label set when an operator asked for the task to be replaced.
pub const PERMANENTLY_FAILED_LABEL: &str = "permanently_failed";

// =============================================================================
// Resources
// =============================================================================

/// Dynamic reservation metadata on a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub principal: String,
    /// Scheduler-assigned ID, used to find the reservation again in later offers.
    pub resource_id: String,
}

/// Persistent volume metadata on a disk resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub persistence_id: String,
    pub container_path: String,
}

/// A scalar resource, optionally reserved and optionally carrying a volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub value: f64,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation: Option<Reservation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<Volume>,
}

impl Resource {
    /// An unreserved scalar resource.
    pub fn scalar(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            role: UNRESERVED_ROLE.to_string(),
            reservation: None,
            volume: None,
        }
    }

    /// A scalar resource dynamically reserved for `role`.
    pub fn reserved(
        name: impl Into<String>,
        value: f64,
        role: impl Into<String>,
        principal: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value,
            role: role.into(),
            reservation: Some(Reservation {
                principal: principal.into(),
                resource_id: resource_id.into(),
            }),
            volume: None,
        }
    }

    #[must_use]
    pub fn with_volume(mut self, volume: Volume) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.reservation.as_ref().map(|r| r.resource_id.as_str())
    }

    pub fn persistence_id(&self) -> Option<&str> {
        self.volume.as_ref().map(|v| v.persistence_id.as_str())
    }

    pub fn is_reserved(&self) -> bool {
        self.reservation.is_some()
    }
}

// =============================================================================
// Offers
// =============================================================================

/// Resources available on one agent, offered to this framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub agent_id: AgentId,
    pub hostname: String,
    pub resources: Vec<Resource>,
}

impl Offer {
    /// Total unreserved amount of a named resource usable by `role`.
    ///
    /// Statically assigned role resources count as well as `*` resources,
    /// as long as they carry no dynamic reservation.
    pub fn unreserved(&self, name: &str, role: &str) -> f64 {
        self.resources
            .iter()
            .filter(|r| r.name == name && !r.is_reserved())
            .filter(|r| r.role == UNRESERVED_ROLE || r.role == role)
            .map(|r| r.value)
            .sum()
    }

    /// Finds a reserved resource by its resource ID.
    pub fn reserved(&self, resource_id: &str) -> Option<&Resource> {
        self.resources
            .iter()
            .find(|r| r.resource_id() == Some(resource_id))
    }
}

// =============================================================================
// Tasks
// =============================================================================

/// Command run by an executor or task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub value: String,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub uris: Vec<String>,
}

/// Custom executor hosting a broker task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub executor_id: ExecutorId,
    pub name: String,
    pub command: CommandInfo,
    pub resources: Vec<Resource>,
}

/// Descriptor of a launched (or to be launched) task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Logical task name (`broker-<n>`), stable across relaunches.
    pub name: String,
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub resources: Vec<Resource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<ExecutorInfo>,
    pub command: CommandInfo,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl TaskInfo {
    pub fn broker_index(&self) -> Result<u32, IdError> {
        broker_index(&self.name)
    }

    /// Name of the configuration this task was launched with.
    pub fn config_target(&self) -> Option<&str> {
        self.labels.get(CONFIG_TARGET_LABEL).map(String::as_str)
    }

    pub fn is_permanently_failed(&self) -> bool {
        self.labels
            .get(PERMANENTLY_FAILED_LABEL)
            .is_some_and(|v| v == "true")
    }

    /// Task and executor resources together.
    pub fn all_resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources
            .iter()
            .chain(self.executor.iter().flat_map(|e| e.resources.iter()))
    }
}

/// Task state as reported by the cluster manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Staging,
    Starting,
    Running,
    Killing,
    Finished,
    Failed,
    Killed,
    Error,
    Lost,
}

impl TaskState {
    /// Whether the task will never run again under this task ID.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished | Self::Failed | Self::Killed | Self::Error | Self::Lost
        )
    }
}

/// Why a status update was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusReason {
    /// Answer to a reconciliation request, not a state change.
    Reconciliation,
    AgentRemoved,
    AgentDisconnected,
    ExecutorTerminated,
    TaskKilled,
    CommandExecutorFailed,
}

/// A status update for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<StatusReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
}

impl TaskStatus {
    pub fn new(task_id: TaskId, state: TaskState) -> Self {
        Self {
            task_id,
            state,
            reason: None,
            message: None,
            agent_id: None,
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: StatusReason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn is_reconciliation(&self) -> bool {
        self.reason == Some(StatusReason::Reconciliation)
    }
}

// =============================================================================
// Operations
// =============================================================================

/// An action proposed against an offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Reserve { resources: Vec<Resource> },
    Unreserve { resources: Vec<Resource> },
    Create { volumes: Vec<Resource> },
    Destroy { volumes: Vec<Resource> },
    Launch { tasks: Vec<TaskInfo> },
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Reserve { .. } => "RESERVE",
            Self::Unreserve { .. } => "UNRESERVE",
            Self::Create { .. } => "CREATE",
            Self::Destroy { .. } => "DESTROY",
            Self::Launch { .. } => "LAUNCH",
        }
    }

    /// Tasks launched by this operation (empty unless `Launch`).
    pub fn launched_tasks(&self) -> &[TaskInfo] {
        match self {
            Self::Launch { tasks } => tasks,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(resources: Vec<Resource>) -> Offer {
        Offer {
            id: OfferId::new("offer-1"),
            agent_id: AgentId::new("agent-1"),
            hostname: "host-1".to_string(),
            resources,
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Lost.is_terminal());
        assert!(TaskState::Finished.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(!TaskState::Staging.is_terminal());
        assert!(!TaskState::Killing.is_terminal());
    }

    #[test]
    fn test_unreserved_ignores_reservations_and_foreign_roles() {
        let offer = offer(vec![
            Resource::scalar(RESOURCE_CPUS, 2.0),
            Resource::reserved(RESOURCE_CPUS, 4.0, "kafka-role", "kafka", "res-1"),
            Resource {
                role: "kafka-role".to_string(),
                ..Resource::scalar(RESOURCE_CPUS, 1.0)
            },
            Resource {
                role: "other-role".to_string(),
                ..Resource::scalar(RESOURCE_CPUS, 8.0)
            },
        ]);

        assert_eq!(offer.unreserved(RESOURCE_CPUS, "kafka-role"), 3.0);
        assert_eq!(offer.unreserved(RESOURCE_MEM, "kafka-role"), 0.0);
        assert_eq!(offer.reserved("res-1").map(|r| r.value), Some(4.0));
        assert!(offer.reserved("res-2").is_none());
    }

    #[test]
    fn test_operation_wire_shape() {
        let op = Operation::Reserve {
            resources: vec![Resource::scalar(RESOURCE_MEM, 512.0)],
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["type"], "RESERVE");
        assert_eq!(op.kind(), "RESERVE");
        assert!(op.launched_tasks().is_empty());
    }

    #[test]
    fn test_reconciliation_reason() {
        let status = TaskStatus::new(TaskId::new("broker-0__a"), TaskState::Running);
        assert!(!status.is_reconciliation());
        assert!(status
            .with_reason(StatusReason::Reconciliation)
            .is_reconciliation());
    }
}
