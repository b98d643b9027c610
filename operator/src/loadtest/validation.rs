//! Checks a spec must pass before the operator touches any Deployment.
//!
//! A spec that fails here cannot be fixed by retrying, only by editing the resource.
use crate::loadtest::LocustLoadTestSpec;

/// Longest DNS-1123 label. The name doubles as the `app` label value, which has the same cap.
const MAX_NAME_LEN: usize = 63;

/// Reasons a spec cannot be reconciled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    /// `deploymentName` is empty.
    #[error("deploymentName must not be empty")]
    EmptyDeploymentName,
    /// `deploymentName` is longer than Kubernetes allows.
    #[error("deploymentName {0:?} is longer than 63 characters")]
    DeploymentNameTooLong(String),
    /// `deploymentName` is not a DNS-1123 label.
    #[error("deploymentName {0:?} must consist of lower case alphanumeric characters or '-', and must start and end with an alphanumeric character")]
    InvalidDeploymentName(String),
    /// `workers` does not fit in a Deployment replica count.
    #[error("workers {0} exceeds the maximum replica count")]
    TooManyWorkers(u32),
}

/// Validate the spec and return the replica count the Deployment should run.
pub fn desired_replicas(spec: &LocustLoadTestSpec) -> Result<i32, SpecError> {
    validate_deployment_name(&spec.deployment_name)?;
    let workers = spec.workers_or_default();
    i32::try_from(workers).map_err(|_| SpecError::TooManyWorkers(workers))
}

fn validate_deployment_name(name: &str) -> Result<(), SpecError> {
    if name.is_empty() {
        return Err(SpecError::EmptyDeploymentName);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(SpecError::DeploymentNameTooLong(name.to_owned()));
    }
    let allowed = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-';
    let alphanumeric = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    let starts_ok = name.chars().next().is_some_and(alphanumeric);
    let ends_ok = name.chars().last().is_some_and(alphanumeric);
    if !(starts_ok && ends_ok && name.chars().all(allowed)) {
        return Err(SpecError::InvalidDeploymentName(name.to_owned()));
    }
    Ok(())
}
