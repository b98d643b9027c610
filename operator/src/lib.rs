//! Provides API for the operator and related tooling.
#![warn(missing_docs)]

/// Labels module for managing resource labels.
#[cfg(feature = "controller")]
pub(crate) mod labels;
/// Loadtest module for managing Locust load test resources.
pub mod loadtest;
/// Utils module for shared utility functions.
#[cfg(feature = "controller")]
pub mod utils;

/// Name reported as the field manager and event reporter.
#[cfg(feature = "controller")]
const CONTROLLER_NAME: &str = "locust-operator";
