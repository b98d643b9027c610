//! Utils is shared functions and constants for the controller

use std::{sync::Arc, time::Duration};

use k8s_openapi::api::apps::v1::Deployment;
use kube::{api::DeleteParams, client::Client, Api};

use crate::loadtest::{
    deployment::WorkerImageConfig,
    events::{EventRecorder, KubeEventRecorder},
    index::OwnerIndex,
};

/// Operator wide settings.
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Image used for workers when a load test does not name one.
    pub worker_image: WorkerImageConfig,
    /// How long to wait before re-checking a load test whose status is in sync.
    pub resync: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            worker_image: WorkerImageConfig::default(),
            resync: Duration::from_secs(300),
        }
    }
}

/// Operator Context
pub struct Context<E> {
    /// Kube client
    pub k_client: Client,
    /// Event sink for load tests
    pub events: E,
    /// Deployments by owning load test
    pub index: Arc<OwnerIndex>,
    /// Operator settings
    pub config: OperatorConfig,
}

impl Context<KubeEventRecorder> {
    /// Create new context
    pub fn new(k_client: Client, config: OperatorConfig) -> Self {
        Context {
            events: KubeEventRecorder::new(k_client.clone()),
            k_client,
            index: Arc::new(OwnerIndex::default()),
            config,
        }
    }
}

/// True when the API server reported the object as missing.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.reason == "NotFound" || resp.code == 404)
}

/// Delete a deployment in namespace. Returns false if it was already gone.
pub async fn delete_deployment(
    cx: Arc<Context<impl EventRecorder>>,
    ns: &str,
    name: &str,
) -> Result<bool, kube::error::Error> {
    let deployments: Api<Deployment> = Api::namespaced(cx.k_client.clone(), ns);

    match deployments.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(true),
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(e),
    }
}
