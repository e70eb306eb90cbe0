pub mod controller;
pub mod estimator;

pub use controller::{AbrDecision, AdaptiveVariantController, DecisionAction, DecisionReason};
pub use estimator::{ThroughputEstimator, ThroughputSample};
