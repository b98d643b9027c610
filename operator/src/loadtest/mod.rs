//! LocustLoadTest is a k8s custom resource that describes a Locust load test.

// Export all spec types
mod spec;
pub use spec::*;

// All other mods are behind the controller flag to keep the deps to a minimum
#[cfg(feature = "controller")]
pub(crate) mod controller;
#[cfg(feature = "controller")]
pub mod deployment;
#[cfg(feature = "controller")]
pub mod events;
#[cfg(feature = "controller")]
pub mod index;
#[cfg(feature = "controller")]
pub mod validation;

#[cfg(test)]
#[cfg(feature = "controller")]
pub mod stub;

#[cfg(feature = "controller")]
pub use controller::{run, ReconcileOutcome};
