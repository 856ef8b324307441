//! Offer acceptance pipeline.
//!
//! Requirements come from a [`OfferRequirementProvider`], are matched
//! against offers by the [`OfferEvaluator`] (placement first, then
//! resources), and the resulting operations are recorded and sent by the
//! [`OfferAccepter`]. The [`ResourceCleaner`] turns leftover reservations
//! into release operations.

pub mod accepter;
pub mod cleaner;
pub mod evaluator;
pub mod placement;
pub mod requirement;

pub use accepter::{OfferAccepter, OperationRecorder, PersistentOperationRecorder};
pub use cleaner::ResourceCleaner;
pub use evaluator::{OfferEvaluator, OfferRecommendation};
pub use placement::{BrokerHosts, PlacementStrategy, UnknownPlacementStrategy};
pub use requirement::{
    ExecutorRequirement, OfferRequirement, OfferRequirementProvider,
    PersistentRequirementProvider, RequirementError, RequirementKind, RequirementResult,
    TaskRequirement,
};
