//! Place all spec types into a single module so they can be used as a lightweight dependency
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Number of workers used when the spec does not set `workers`.
pub const DEFAULT_WORKERS: u32 = 1;

/// Primary CRD for creating and managing a Locust load test.
///
/// The operator keeps exactly one Deployment of Locust workers alive per load test, named by
/// `deploymentName`, and reports the number of ready workers in the status.
#[derive(CustomResource, Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "loadtests.cndev.io",
    version = "v1",
    kind = "LocustLoadTest",
    plural = "locustloadtests",
    shortname = "llt",
    status = "LocustLoadTestStatus",
    derive = "PartialEq",
    namespaced,
    printcolumn = r#"{"name":"Deployment", "type":"string", "jsonPath":".spec.deploymentName"}"#,
    printcolumn = r#"{"name":"Workers", "type":"integer", "jsonPath":".status.currentworkers"}"#
)]
pub struct LocustLoadTestSpec {
    /// Name of the Deployment running the Locust workers.
    /// Renaming it replaces the old Deployment with a new one.
    #[serde(rename = "deploymentName")]
    pub deployment_name: String,
    /// URL of the system under test.
    #[serde(rename = "hosturl")]
    pub host_url: String,
    /// Locust file defining the tests.
    #[serde(rename = "locustspec")]
    pub locust_spec: String,
    /// Repository the locust file is fetched from.
    #[serde(rename = "specrepository")]
    pub spec_repository: String,
    /// Number of Locust workers. Defaults to 1 when unset, an explicit 0 stops all workers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<u32>,
    /// Image for the worker containers, defaults to the operator configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Pull policy for the worker image.
    #[serde(
        rename = "imagePullPolicy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub image_pull_policy: Option<String>,
}

impl LocustLoadTestSpec {
    /// Number of workers requested, applying the default only when `workers` is unset.
    pub fn workers_or_default(&self) -> u32 {
        self.workers.unwrap_or(DEFAULT_WORKERS)
    }
}

/// Observed state of a load test.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
pub struct LocustLoadTestStatus {
    /// Ready replicas of the worker Deployment as of the last reconcile.
    #[serde(rename = "currentworkers", default)]
    pub current_workers: i32,
}
