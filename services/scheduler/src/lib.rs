//! Kafka broker scheduler library.
//!
//! This crate primarily ships a `kafka-scheduler` binary, but exposes its
//! control loop and building blocks for integration testing and reuse.

pub mod api;
pub mod config;
pub mod driver;
pub mod error;
pub mod model;
pub mod offer;
pub mod operator;
pub mod plan;
pub mod reconciler;
pub mod recovery;
pub mod scheduler;
pub mod state;
pub mod store;

pub use scheduler::{
    worker::{SchedulerEvent, SchedulerWorker},
    BrokerScheduler, OfferMode,
};
