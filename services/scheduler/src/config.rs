use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ksched_reconcile::{SpecHash, DEFAULT_GRACE_PERIOD, DEFAULT_MAX_FAILURES, DEFAULT_REPAIR_DELAY};
use serde::Serialize;
use thiserror::Error;

use crate::offer::PlacementStrategy;
use crate::reconciler::ReconcilerConfig;

/// Configuration that cannot be loaded at all.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub data_dir: PathBuf,
    pub service: ServiceConfig,
    pub broker: BrokerConfig,
    pub executor: ExecutorConfig,
    pub recovery: RecoveryConfig,
    pub reconcile: ReconcilerConfig,
}

/// Framework identity and deployment shape.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub name: String,
    pub role: String,
    pub principal: String,
    pub broker_count: u32,
    pub placement: PlacementStrategy,
}

/// Per-broker resources and artifacts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrokerConfig {
    pub cpus: f64,
    pub mem: f64,
    pub disk: f64,
    pub heap_mb: u32,
    pub kafka_uri: String,
    pub executor_uri: String,
}

/// Resources of the executor hosting each broker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutorConfig {
    pub cpus: f64,
    pub mem: f64,
}

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// A unit failing for longer than this is permanently failed.
    pub grace_period: Duration,

    /// Minimum delay between two relaunches of one unit.
    pub repair_delay: Duration,

    pub max_failures: u32,
}

/// A named broker configuration that brokers converge to.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetConfig {
    pub name: SpecHash,
    pub broker: BrokerConfig,
    pub executor: ExecutorConfig,
}

impl TargetConfig {
    pub fn new(broker: BrokerConfig, executor: ExecutorConfig) -> Self {
        // Broker count is left out so scaling out does not roll existing brokers.
        let name = SpecHash::from_json(&serde_json::json!({
            "broker": broker,
            "executor": executor,
        }));
        Self {
            name,
            broker,
            executor,
        }
    }

    /// Structural problems that make requirements for this target invalid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let positive = |v: f64| v.is_finite() && v > 0.0;

        if !positive(self.broker.cpus) {
            errors.push(format!("broker cpus must be positive, got {}", self.broker.cpus));
        }
        if !positive(self.broker.mem) {
            errors.push(format!("broker mem must be positive, got {}", self.broker.mem));
        }
        if !positive(self.broker.disk) {
            errors.push(format!("broker disk must be positive, got {}", self.broker.disk));
        }
        if f64::from(self.broker.heap_mb) > self.broker.mem {
            errors.push(format!(
                "broker heap ({} MB) exceeds broker mem ({} MB)",
                self.broker.heap_mb, self.broker.mem
            ));
        }
        if !positive(self.executor.cpus) || !positive(self.executor.mem) {
            errors.push("executor cpus and mem must be positive".to_string());
        }
        errors
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            cpus: 1.0,
            mem: 2048.0,
            disk: 5000.0,
            heap_mb: 1024,
            kafka_uri: String::new(),
            executor_uri: String::new(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            cpus: 0.5,
            mem: 256.0,
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            repair_delay: DEFAULT_REPAIR_DELAY,
            max_failures: DEFAULT_MAX_FAILURES,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "kafka".to_string(),
            role: "kafka-role".to_string(),
            principal: "kafka-principal".to_string(),
            broker_count: 3,
            placement: PlacementStrategy::Any,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr = parse_var(
            &lookup,
            "KSCHED_LISTEN_ADDR",
            SocketAddr::from(([127, 0, 0, 1], 8080)),
        )?;

        let log_level = lookup("KSCHED_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let dev_mode = lookup("KSCHED_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let data_dir = lookup("KSCHED_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/var/lib/kafka-scheduler"));

        let defaults = ServiceConfig::default();
        let service = ServiceConfig {
            name: lookup("KSCHED_FRAMEWORK_NAME").unwrap_or(defaults.name),
            role: lookup("KSCHED_ROLE").unwrap_or(defaults.role),
            principal: lookup("KSCHED_PRINCIPAL").unwrap_or(defaults.principal),
            broker_count: parse_var(&lookup, "KSCHED_BROKER_COUNT", defaults.broker_count)?,
            placement: parse_var(&lookup, "KSCHED_PLACEMENT_STRATEGY", defaults.placement)?,
        };

        let defaults = BrokerConfig::default();
        let broker = BrokerConfig {
            cpus: parse_var(&lookup, "KSCHED_BROKER_CPUS", defaults.cpus)?,
            mem: parse_var(&lookup, "KSCHED_BROKER_MEM", defaults.mem)?,
            disk: parse_var(&lookup, "KSCHED_BROKER_DISK", defaults.disk)?,
            heap_mb: parse_var(&lookup, "KSCHED_BROKER_HEAP_MB", defaults.heap_mb)?,
            kafka_uri: lookup("KSCHED_KAFKA_URI").unwrap_or(defaults.kafka_uri),
            executor_uri: lookup("KSCHED_EXECUTOR_URI").unwrap_or(defaults.executor_uri),
        };

        let defaults = RecoveryConfig::default();
        let recovery = RecoveryConfig {
            grace_period: parse_secs(
                &lookup,
                "KSCHED_RECOVERY_GRACE_PERIOD_SECS",
                defaults.grace_period,
            )?,
            repair_delay: parse_secs(
                &lookup,
                "KSCHED_RECOVERY_REPAIR_DELAY_SECS",
                defaults.repair_delay,
            )?,
            max_failures: parse_var(&lookup, "KSCHED_RECOVERY_MAX_FAILURES", defaults.max_failures)?,
        };

        let defaults = ReconcilerConfig::default();
        let reconcile = ReconcilerConfig {
            timeout: parse_secs(&lookup, "KSCHED_RECONCILE_TIMEOUT_SECS", defaults.timeout)?,
            ..defaults
        };

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            data_dir,
            service,
            broker,
            executor: ExecutorConfig::default(),
            recovery,
            reconcile,
        })
    }

    /// The configuration brokers are deployed with.
    pub fn target(&self) -> TargetConfig {
        TargetConfig::new(self.broker.clone(), self.executor.clone())
    }

    /// Semantic validation errors. These are reported on the plan rather
    /// than aborting startup.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.service.broker_count == 0 {
            errors.push("broker count must be at least 1".to_string());
        }
        if self.recovery.max_failures == 0 {
            errors.push("recovery max failures must be at least 1".to_string());
        }
        errors.extend(self.target().validate());
        errors
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(default);
    };
    let parsed = raw.trim().parse::<T>();
    parsed.map_err(|e| ConfigError::Invalid {
        var,
        value: raw,
        reason: e.to_string(),
    })
}

fn parse_secs<F>(lookup: &F, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_var(lookup, var, default.as_secs()).map(Duration::from_secs)
}
