//! Scheduler background worker.
//!
//! Receives cluster manager callbacks as [`SchedulerEvent`]s and hands them
//! to the [`BrokerScheduler`] one at a time. A callback that panics or
//! returns a fatal error terminates the process with [`FATAL_EXIT_CODE`].

use std::panic::{catch_unwind, AssertUnwindSafe};

use ksched_id::{AgentId, ExecutorId, FrameworkId, OfferId};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, instrument, warn};

use super::BrokerScheduler;
use crate::driver::SchedulerDriver;
use crate::error::{SchedulerError, FATAL_EXIT_CODE};
use crate::model::{Offer, TaskStatus};

/// A callback from the cluster manager.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    Registered { framework_id: FrameworkId },
    Reregistered,
    Disconnected,
    ResourceOffers(Vec<Offer>),
    OfferRescinded(OfferId),
    StatusUpdate(TaskStatus),
    AgentLost(AgentId),
    ExecutorLost {
        executor_id: ExecutorId,
        agent_id: AgentId,
        status: i32,
    },
    Error(String),
}

impl SchedulerEvent {
    fn kind(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "registered",
            Self::Reregistered => "reregistered",
            Self::Disconnected => "disconnected",
            Self::ResourceOffers(_) => "resource_offers",
            Self::OfferRescinded(_) => "offer_rescinded",
            Self::StatusUpdate(_) => "status_update",
            Self::AgentLost(_) => "agent_lost",
            Self::ExecutorLost { .. } => "executor_lost",
            Self::Error(_) => "error",
        }
    }
}

/// Why the worker must stop the process.
#[derive(Debug)]
pub struct FatalError {
    pub event: &'static str,
    pub message: String,
}

/// Scheduler worker that processes callbacks serially.
pub struct SchedulerWorker {
    scheduler: BrokerScheduler,
    driver: Box<dyn SchedulerDriver>,
    events: mpsc::Receiver<SchedulerEvent>,
}

impl SchedulerWorker {
    /// Create a new scheduler worker.
    pub fn new(
        scheduler: BrokerScheduler,
        driver: Box<dyn SchedulerDriver>,
        events: mpsc::Receiver<SchedulerEvent>,
    ) -> Self {
        Self {
            scheduler,
            driver,
            events,
        }
    }

    /// Run until shutdown is signaled or the event channel closes.
    #[instrument(skip(self, shutdown))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting scheduler worker");

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else {
                        warn!("Event channel closed, scheduler worker stopping");
                        break;
                    };
                    if let Err(fatal) = self.process(event) {
                        error!(
                            event = fatal.event,
                            message = %fatal.message,
                            "Fatal error in scheduler callback, exiting"
                        );
                        std::process::exit(FATAL_EXIT_CODE);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Scheduler worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Process one event to completion.
    ///
    /// Panics and fatal errors are caught and returned instead of unwinding.
    pub fn process(&mut self, event: SchedulerEvent) -> Result<(), FatalError> {
        let kind = event.kind();
        let result = catch_unwind(AssertUnwindSafe(|| self.dispatch(event)));

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_fatal() => Err(FatalError {
                event: kind,
                message: e.to_string(),
            }),
            Ok(Err(e)) => {
                warn!(event = kind, error = %e, "Scheduler callback failed");
                Ok(())
            }
            Err(panic) => Err(FatalError {
                event: kind,
                message: panic_message(panic.as_ref()),
            }),
        }
    }

    pub fn scheduler(&self) -> &BrokerScheduler {
        &self.scheduler
    }

    fn dispatch(&mut self, event: SchedulerEvent) -> Result<(), SchedulerError> {
        let driver = &mut *self.driver;
        match event {
            SchedulerEvent::Registered { framework_id } => {
                self.scheduler.registered(driver, &framework_id)?;
            }
            SchedulerEvent::Reregistered => self.scheduler.reregistered(driver),
            SchedulerEvent::Disconnected => self.scheduler.disconnected(),
            SchedulerEvent::ResourceOffers(offers) => self.scheduler.resource_offers(driver, offers),
            SchedulerEvent::OfferRescinded(offer_id) => self.scheduler.offer_rescinded(&offer_id),
            SchedulerEvent::StatusUpdate(status) => self.scheduler.status_update(driver, &status),
            SchedulerEvent::AgentLost(agent_id) => self.scheduler.agent_lost(&agent_id),
            SchedulerEvent::ExecutorLost {
                executor_id,
                agent_id,
                status,
            } => self
                .scheduler
                .executor_lost(&executor_id, &agent_id, status),
            SchedulerEvent::Error(message) => self.scheduler.error(&message)?,
        }
        Ok(())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
