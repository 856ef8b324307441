//! Offer requirements.
//!
//! A requirement describes what one broker needs from an offer: the task to
//! launch, the executor hosting it, and the resources both consume. New
//! requirements ask for fresh resources which get reserved and given a
//! persistent volume. Update requirements reuse the reservations of the
//! broker's previous task so the broker keeps its data.

use ksched_id::{broker_executor_name, broker_task_name, ExecutorId, TaskId};
use ksched_reconcile::SpecHash;
use thiserror::Error;

use crate::config::{ServiceConfig, TargetConfig};
use crate::model::{
    CommandInfo, ExecutorInfo, Resource, TaskInfo, Volume, CONFIG_TARGET_LABEL,
    PERMANENTLY_FAILED_LABEL, RESOURCE_CPUS, RESOURCE_DISK, RESOURCE_MEM,
};
use crate::offer::PlacementStrategy;
use crate::store::StoreError;

/// Path of the broker's persistent volume inside the sandbox.
pub const VOLUME_CONTAINER_PATH: &str = "kafka-volume";

/// Errors building a requirement.
#[derive(Debug, Error)]
pub enum RequirementError {
    #[error("invalid requirement: {0}")]
    InvalidRequirement(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type RequirementResult<T> = Result<T, RequirementError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequirementKind {
    /// Fresh resources, reserved on acceptance.
    New,

    /// Resources already reserved by a previous task of the same broker.
    Update,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskRequirement {
    /// Task template. Agent and host are filled in when an offer matches.
    pub task: TaskInfo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorRequirement {
    pub executor: ExecutorInfo,
}

/// Everything one broker needs from a single offer.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferRequirement {
    pub kind: RequirementKind,
    pub broker_index: u32,
    pub placement: PlacementStrategy,
    pub task_requirements: Vec<TaskRequirement>,
    pub executor_requirement: Option<ExecutorRequirement>,
}

impl OfferRequirement {
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.task_requirements
            .iter()
            .map(|r| r.task.task_id.clone())
            .collect()
    }

    /// Task and executor resources together.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.task_requirements
            .iter()
            .flat_map(|r| r.task.resources.iter())
            .chain(
                self.executor_requirement
                    .iter()
                    .flat_map(|e| e.executor.resources.iter()),
            )
    }
}

/// Builds requirements for broker launches.
pub trait OfferRequirementProvider: Send + Sync {
    /// Requirement for a broker that has never been launched.
    fn new_requirement(
        &self,
        config_name: &SpecHash,
        broker_index: u32,
    ) -> RequirementResult<OfferRequirement>;

    /// Requirement relaunching `task` in place with configuration `config_name`.
    fn update_requirement(
        &self,
        config_name: &SpecHash,
        task: &TaskInfo,
    ) -> RequirementResult<OfferRequirement>;

    /// Requirement relaunching the broker of `task` on fresh resources,
    /// wherever they are offered.
    fn replacement_requirement(&self, task: &TaskInfo) -> RequirementResult<OfferRequirement>;
}

/// Requirement provider that reserves resources and a persistent volume for
/// every broker.
#[derive(Debug, Clone)]
pub struct PersistentRequirementProvider {
    service: ServiceConfig,
    target: TargetConfig,
}

impl PersistentRequirementProvider {
    pub fn new(service: ServiceConfig, target: TargetConfig) -> Self {
        Self { service, target }
    }

    pub fn target_name(&self) -> &SpecHash {
        &self.target.name
    }

    fn check_target(&self, config_name: &SpecHash) -> RequirementResult<()> {
        if *config_name != self.target.name {
            return Err(RequirementError::InvalidRequirement(format!(
                "unknown configuration {config_name}"
            )));
        }
        let errors = self.target.validate();
        if !errors.is_empty() {
            return Err(RequirementError::InvalidRequirement(errors.join("; ")));
        }
        Ok(())
    }

    fn reserved(&self, name: &str, value: f64) -> Resource {
        Resource::reserved(
            name,
            value,
            &self.service.role,
            &self.service.principal,
            uuid::Uuid::new_v4().to_string(),
        )
    }

    fn fresh(&self, broker_index: u32, placement: PlacementStrategy) -> OfferRequirement {
        let broker = &self.target.broker;
        let name = broker_task_name(broker_index);

        let volume = self.reserved(RESOURCE_DISK, broker.disk).with_volume(Volume {
            persistence_id: uuid::Uuid::new_v4().to_string(),
            container_path: VOLUME_CONTAINER_PATH.to_string(),
        });

        let task = TaskInfo {
            task_id: TaskId::generate(&name),
            name,
            agent_id: None,
            hostname: None,
            resources: vec![
                self.reserved(RESOURCE_CPUS, broker.cpus),
                self.reserved(RESOURCE_MEM, broker.mem),
                volume,
            ],
            executor: None,
            command: self.broker_command(broker_index),
            labels: [(CONFIG_TARGET_LABEL.to_string(), self.target.name.to_string())]
                .into_iter()
                .collect(),
        };

        let executor_name = broker_executor_name(broker_index);
        let executor = ExecutorInfo {
            executor_id: ExecutorId::generate(&executor_name),
            name: executor_name,
            command: self.executor_command(),
            resources: vec![
                self.reserved(RESOURCE_CPUS, self.target.executor.cpus),
                self.reserved(RESOURCE_MEM, self.target.executor.mem),
            ],
        };

        OfferRequirement {
            kind: RequirementKind::New,
            broker_index,
            placement,
            task_requirements: vec![TaskRequirement { task }],
            executor_requirement: Some(ExecutorRequirement { executor }),
        }
    }

    fn broker_command(&self, broker_index: u32) -> CommandInfo {
        let broker = &self.target.broker;
        let environment = [
            ("BROKER_ID", broker_index.to_string()),
            ("FRAMEWORK_NAME", self.service.name.clone()),
            (
                "KAFKA_HEAP_OPTS",
                format!("-Xms{0}M -Xmx{0}M", broker.heap_mb),
            ),
            ("LOG_DIRS", VOLUME_CONTAINER_PATH.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        CommandInfo {
            value: "$MESOS_SANDBOX/kafka/bin/kafka-server-start.sh $MESOS_SANDBOX/kafka/config/server.properties"
                .to_string(),
            environment,
            uris: Vec::new(),
        }
    }

    fn executor_command(&self) -> CommandInfo {
        let broker = &self.target.broker;
        CommandInfo {
            value: "./executor/bin/kafka-executor".to_string(),
            environment: Default::default(),
            uris: [&broker.executor_uri, &broker.kafka_uri]
                .into_iter()
                .filter(|uri| !uri.is_empty())
                .cloned()
                .collect(),
        }
    }
}

impl OfferRequirementProvider for PersistentRequirementProvider {
    fn new_requirement(
        &self,
        config_name: &SpecHash,
        broker_index: u32,
    ) -> RequirementResult<OfferRequirement> {
        self.check_target(config_name)?;
        Ok(self.fresh(broker_index, self.service.placement))
    }

    fn update_requirement(
        &self,
        config_name: &SpecHash,
        task: &TaskInfo,
    ) -> RequirementResult<OfferRequirement> {
        self.check_target(config_name)?;
        let broker_index = task
            .broker_index()
            .map_err(|e| RequirementError::InvalidRequirement(e.to_string()))?;

        if task.resources.is_empty() || task.all_resources().any(|r| !r.is_reserved()) {
            return Err(RequirementError::InvalidRequirement(format!(
                "task {} has unreserved resources",
                task.name
            )));
        }

        let mut labels = task.labels.clone();
        labels.remove(PERMANENTLY_FAILED_LABEL);
        labels.insert(CONFIG_TARGET_LABEL.to_string(), self.target.name.to_string());

        let updated = TaskInfo {
            name: task.name.clone(),
            task_id: TaskId::generate(&task.name),
            agent_id: None,
            hostname: None,
            resources: task.resources.clone(),
            executor: None,
            command: self.broker_command(broker_index),
            labels,
        };

        let executor_requirement = task.executor.as_ref().map(|existing| {
            let mut executor = existing.clone();
            executor.executor_id = ExecutorId::generate(&existing.name);
            executor.command = self.executor_command();
            ExecutorRequirement { executor }
        });

        Ok(OfferRequirement {
            kind: RequirementKind::Update,
            broker_index,
            placement: self.service.placement,
            task_requirements: vec![TaskRequirement { task: updated }],
            executor_requirement,
        })
    }

    fn replacement_requirement(&self, task: &TaskInfo) -> RequirementResult<OfferRequirement> {
        self.check_target(&self.target.name)?;
        let broker_index = task
            .broker_index()
            .map_err(|e| RequirementError::InvalidRequirement(e.to_string()))?;

        // The previous host may be gone, so a replacement goes anywhere.
        Ok(self.fresh(broker_index, PlacementStrategy::Any))
    }
}
