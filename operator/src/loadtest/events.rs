//! Kubernetes Events recorded against a LocustLoadTest.
//!
//! Events are fire-and-forget: a failed publish is logged and never fails the reconcile.
use async_trait::async_trait;
use kube::{
    runtime::events::{Event, EventType, Recorder, Reporter},
    Client, Resource,
};
use tracing::warn;

use crate::{loadtest::LocustLoadTest, CONTROLLER_NAME};

/// Event reasons, shown in the REASON column of `kubectl get events`.
pub mod reasons {
    /// The worker Deployment was created.
    pub const CREATED: &str = "Created";
    /// The worker Deployment replica count was changed.
    pub const SCALED: &str = "Scaled";
    /// A Deployment no longer named by the spec was deleted.
    pub const DELETED: &str = "Deleted";
    /// The spec cannot be reconciled until it is edited.
    pub const INVALID_SPEC: &str = "InvalidSpec";
    /// A Deployment with the desired name belongs to someone else.
    pub const DEPLOYMENT_CONFLICT: &str = "DeploymentConflict";
}

/// Action reported with every event.
const RECONCILE_ACTION: &str = "Reconcile";

/// Sink for events about a load test.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    /// Record an event on the load test.
    async fn publish(
        &self,
        load_test: &LocustLoadTest,
        type_: EventType,
        reason: &str,
        note: String,
    );
}

/// Publishes events through the Kubernetes events API.
pub struct KubeEventRecorder {
    client: Client,
    reporter: Reporter,
}

impl KubeEventRecorder {
    /// Create a recorder reporting as the operator.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: CONTROLLER_NAME.to_owned(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn publish(
        &self,
        load_test: &LocustLoadTest,
        type_: EventType,
        reason: &str,
        note: String,
    ) {
        let recorder = Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            load_test.object_ref(&()),
        );
        let event = Event {
            type_,
            reason: reason.to_owned(),
            note: Some(note),
            action: RECONCILE_ACTION.to_owned(),
            secondary: None,
        };
        if let Err(err) = recorder.publish(event).await {
            warn!(reason, %err, "failed to publish event");
        }
    }
}
