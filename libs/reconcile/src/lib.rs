//! Convergence and repair primitives.
//!
//! This library holds the scheduler-independent pieces of the control loop:
//!
//! - **Configuration identity**: a [`SpecHash`] over canonical JSON names a
//!   target configuration, so a task launched against one configuration can
//!   be told apart from one launched against another.
//! - **Launch constraint**: a [`LaunchConstrainer`] rate-limits how often a
//!   single unit may be relaunched.
//! - **Failure classification**: a [`FailureMonitor`] decides whether a unit
//!   that keeps failing is still transiently recoverable or has failed
//!   permanently.
//!
//! # Invariants
//!
//! - All decisions are deterministic given the same inputs and `now`
//! - Nothing here performs I/O; callers own persistence and side effects

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

/// A spec hash for deterministic comparison.
///
/// Used as the name of a target configuration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecHash(String);

impl SpecHash {
    /// Compute a spec hash from canonical JSON.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let canonical = canonical_json(json);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let result = hasher.finalize();
        Self(format!("sha256:{}", hex::encode(&result[..16]))) // First 16 bytes (128 bits)
    }

    /// Wrap an already-computed hash string (e.g. read back from a task label).
    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the hash string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SpecHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Produce canonical JSON (sorted keys, no extra whitespace).
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let inner: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("\"{}\":{}", escape_json_string(k), canonical_json(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(arr) => {
            let inner: Vec<String> = arr.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        serde_json::Value::String(s) => format!("\"{}\"", escape_json_string(s)),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "null".to_string(),
    }
}

fn escape_json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

// =============================================================================
// Launch Constraint
// =============================================================================

/// Rate limiter on relaunches of a single unit.
pub trait LaunchConstrainer: Send {
    /// Record that a unit was (re)launched at `now`.
    fn launch_happened(&mut self, unit: &str, now: Instant);

    /// Whether the unit may be relaunched at `now`.
    fn can_launch(&self, unit: &str, now: Instant) -> bool;
}

/// Enforces a minimum delay between two relaunches of the same unit.
#[derive(Debug, Clone)]
pub struct TimedLaunchConstrainer {
    min_delay: Duration,
    last_launch: HashMap<String, Instant>,
}

impl TimedLaunchConstrainer {
    /// Create a constrainer with the given minimum inter-launch delay.
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_launch: HashMap::new(),
        }
    }

    /// Time remaining until the unit may be relaunched.
    pub fn remaining(&self, unit: &str, now: Instant) -> Duration {
        self.last_launch
            .get(unit)
            .map(|last| self.min_delay.saturating_sub(now.saturating_duration_since(*last)))
            .unwrap_or(Duration::ZERO)
    }
}

impl LaunchConstrainer for TimedLaunchConstrainer {
    fn launch_happened(&mut self, unit: &str, now: Instant) {
        self.last_launch.insert(unit.to_string(), now);
    }

    fn can_launch(&self, unit: &str, now: Instant) -> bool {
        self.remaining(unit, now).is_zero()
    }
}

/// Never constrains a launch.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconstrainedLauncher;

impl LaunchConstrainer for UnconstrainedLauncher {
    fn launch_happened(&mut self, _unit: &str, _now: Instant) {}

    fn can_launch(&self, _unit: &str, _now: Instant) -> bool {
        true
    }
}

// =============================================================================
// Failure Classification
// =============================================================================

/// Classification of a failed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth relaunching in place.
    Transient,

    /// Exceeded the failure threshold or stayed down past the grace period.
    Permanent,
}

#[derive(Debug, Clone)]
struct FailureRecord {
    count: u32,
    first_failure: Instant,
    last_failure_key: String,
}

/// Tracks consecutive failures per unit.
///
/// A failure is identified by a key (typically the failed task ID), so the
/// same failure observed on several passes is only counted once. A unit is
/// classified as permanently failed once it has failed `max_failures` times
/// in a row, or once it has been failing for longer than `grace_period`.
/// [`FailureMonitor::clear`] ends the streak.
#[derive(Debug, Clone)]
pub struct FailureMonitor {
    max_failures: u32,
    grace_period: Duration,
    failures: BTreeMap<String, FailureRecord>,
}

impl FailureMonitor {
    /// Create a new failure monitor.
    pub fn new(max_failures: u32, grace_period: Duration) -> Self {
        Self {
            max_failures,
            grace_period,
            failures: BTreeMap::new(),
        }
    }

    /// Record a failure for a unit.
    ///
    /// Returns true if this failure had not been observed before.
    pub fn record_failure(&mut self, unit: &str, failure_key: &str, now: Instant) -> bool {
        match self.failures.get_mut(unit) {
            Some(record) if record.last_failure_key == failure_key => false,
            Some(record) => {
                record.count += 1;
                record.last_failure_key = failure_key.to_string();
                true
            }
            None => {
                self.failures.insert(
                    unit.to_string(),
                    FailureRecord {
                        count: 1,
                        first_failure: now,
                        last_failure_key: failure_key.to_string(),
                    },
                );
                true
            }
        }
    }

    /// Classify a unit that is currently failed.
    pub fn classify(&self, unit: &str, now: Instant) -> FailureClass {
        let Some(record) = self.failures.get(unit) else {
            return FailureClass::Transient;
        };

        let exhausted = record.count >= self.max_failures;
        let stale = now.saturating_duration_since(record.first_failure) >= self.grace_period;
        if exhausted || stale {
            FailureClass::Permanent
        } else {
            FailureClass::Transient
        }
    }

    /// Number of consecutive failures recorded for a unit.
    pub fn failure_count(&self, unit: &str) -> u32 {
        self.failures.get(unit).map(|r| r.count).unwrap_or(0)
    }

    /// Clear failure tracking for a unit (on success).
    pub fn clear(&mut self, unit: &str) {
        self.failures.remove(unit);
    }

    /// Drop tracking for units that are no longer failed.
    pub fn retain<F>(&mut self, mut still_failed: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.failures.retain(|unit, _| still_failed(unit));
    }
}

/// Default minimum delay between relaunches of one unit.
pub const DEFAULT_REPAIR_DELAY: Duration = Duration::from_secs(10 * 60); // 10 minutes

/// Default time a unit may stay failed before it is considered permanent.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(20 * 60); // 20 minutes

/// Default consecutive failures before a unit is considered permanent.
pub const DEFAULT_MAX_FAILURES: u32 = 5;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_spec_hash_deterministic() {
        let json1 = serde_json::json!({"b": 2, "a": 1});
        let json2 = serde_json::json!({"a": 1, "b": 2});

        let hash1 = SpecHash::from_json(&json1);
        let hash2 = SpecHash::from_json(&json2);

        assert_eq!(hash1, hash2);
        assert!(hash1.as_str().starts_with("sha256:"));
    }

    #[test]
    fn test_spec_hash_changes_with_content() {
        let a = SpecHash::from_json(&serde_json::json!({"count": 3}));
        let b = SpecHash::from_json(&serde_json::json!({"count": 4}));
        assert_ne!(a, b);
        assert_eq!(SpecHash::from_string(a.as_str()), a);
    }

    #[test]
    fn test_timed_constrainer_per_unit() {
        let start = Instant::now();
        let mut constrainer = TimedLaunchConstrainer::new(Duration::from_secs(60));

        assert!(constrainer.can_launch("broker-0", start));
        constrainer.launch_happened("broker-0", start);

        assert!(!constrainer.can_launch("broker-0", start + Duration::from_secs(30)));
        assert!(constrainer.can_launch("broker-1", start + Duration::from_secs(30)));
        assert!(constrainer.can_launch("broker-0", start + Duration::from_secs(60)));
        assert_eq!(
            constrainer.remaining("broker-0", start + Duration::from_secs(45)),
            Duration::from_secs(15)
        );
    }

    #[test]
    fn test_unconstrained_launcher() {
        let now = Instant::now();
        let mut launcher = UnconstrainedLauncher;
        launcher.launch_happened("broker-0", now);
        assert!(launcher.can_launch("broker-0", now));
    }

    #[test]
    fn test_failure_monitor_counts_distinct_failures() {
        let now = Instant::now();
        let mut monitor = FailureMonitor::new(3, Duration::from_secs(600));

        assert!(monitor.record_failure("broker-0", "task-a", now));
        assert!(!monitor.record_failure("broker-0", "task-a", now)); // same failure seen again
        assert!(monitor.record_failure("broker-0", "task-b", now));
        assert_eq!(monitor.failure_count("broker-0"), 2);
        assert_eq!(monitor.classify("broker-0", now), FailureClass::Transient);

        assert!(monitor.record_failure("broker-0", "task-c", now));
        assert_eq!(monitor.classify("broker-0", now), FailureClass::Permanent);

        monitor.clear("broker-0");
        assert_eq!(monitor.failure_count("broker-0"), 0);
        assert_eq!(monitor.classify("broker-0", now), FailureClass::Transient);
    }

    #[rstest]
    #[case(Duration::from_secs(0), FailureClass::Transient)]
    #[case(Duration::from_secs(599), FailureClass::Transient)]
    #[case(Duration::from_secs(600), FailureClass::Permanent)]
    #[case(Duration::from_secs(3600), FailureClass::Permanent)]
    fn test_failure_monitor_grace_period(#[case] elapsed: Duration, #[case] expected: FailureClass) {
        let start = Instant::now();
        let mut monitor = FailureMonitor::new(10, Duration::from_secs(600));
        monitor.record_failure("broker-1", "task-a", start);
        assert_eq!(monitor.classify("broker-1", start + elapsed), expected);
    }

    #[test]
    fn test_failure_monitor_retain() {
        let now = Instant::now();
        let mut monitor = FailureMonitor::new(3, Duration::from_secs(600));
        monitor.record_failure("broker-0", "a", now);
        monitor.record_failure("broker-1", "b", now);

        monitor.retain(|unit| unit == "broker-1");
        assert_eq!(monitor.failure_count("broker-0"), 0);
        assert_eq!(monitor.failure_count("broker-1"), 1);
    }
}
