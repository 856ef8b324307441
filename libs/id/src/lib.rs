//! # ksched-id
//!
//! Identifier types for the kafka scheduler.
//!
//! Two families of IDs live here:
//!
//! - **Scheduler IDs** are generated by the scheduler itself (plans, phases,
//!   blocks). They use a prefixed ULID format: `{prefix}_{ulid}`, e.g.
//!   `blk_01HV4Z2WQXKJNM8GPQY6VBKC3D`.
//! - **Cluster manager IDs** (offers, agents, tasks, executors, the framework)
//!   are opaque strings handed to us by the cluster manager. They are wrapped
//!   in newtypes so they cannot be mixed up, but never validated beyond being
//!   non-empty.
//!
//! Broker tasks are named `broker-{index}` and their task IDs are
//! `broker-{index}__{uuid}`, so a task ID can always be mapped back to the
//! logical task name it was launched for.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
