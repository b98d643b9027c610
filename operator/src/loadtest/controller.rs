use std::{sync::Arc, time::Duration};

use futures::stream::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    api::{Patch, PatchParams, PostParams},
    client::Client,
    runtime::{
        controller::Action,
        events::EventType,
        watcher::{self, watcher, Config},
        Controller, WatchStreamExt,
    },
    Api, Resource, ResourceExt,
};
use opentelemetry::{global, KeyValue};
use tracing::{debug, error, info, warn};

use crate::{
    labels::MANAGED_BY_LABEL_SELECTOR,
    loadtest::{
        deployment,
        events::{reasons, EventRecorder},
        validation::{self, SpecError},
        LocustLoadTest, LocustLoadTestStatus,
    },
    utils::{delete_deployment, is_not_found, Context, OperatorConfig},
};

/// Replica count Kubernetes assumes when a Deployment does not set one.
const KUBERNETES_DEFAULT_REPLICAS: i32 = 1;

/// Handle errors during reconciliation.
fn on_error(
    _load_test: Arc<LocustLoadTest>,
    error: &Error,
    _context: Arc<Context<impl EventRecorder>>,
) -> Action {
    error.action()
}

/// Errors produced by the reconcile function.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kube error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },
    #[error("Invalid spec: {source}")]
    InvalidSpec {
        #[from]
        source: SpecError,
    },
    #[error("Deployment {name:?} exists but is not controlled by this load test")]
    DeploymentConflict { name: String },
    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),
}

impl Error {
    /// True when retrying cannot help until the load test is edited.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::InvalidSpec { .. })
    }

    fn action(&self) -> Action {
        if self.is_terminal() {
            return Action::await_change();
        }
        match self {
            Error::DeploymentConflict { .. } => Action::requeue(Duration::from_secs(60)),
            _ => Action::requeue(Duration::from_secs(5)),
        }
    }
}

/// How a reconcile pass ended.
///
/// Passes that mutate the Deployment end early and leave the status for the next pass, which the
/// Deployment watch triggers once the change is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The load test no longer exists.
    ResourceGone,
    /// The worker Deployment was created.
    Created,
    /// The worker Deployment replica count was changed.
    Scaled,
    /// The status now mirrors the Deployment.
    StatusSynced,
}

impl ReconcileOutcome {
    fn action(self, config: &OperatorConfig) -> Action {
        match self {
            ReconcileOutcome::ResourceGone => Action::await_change(),
            ReconcileOutcome::Created | ReconcileOutcome::Scaled => {
                Action::requeue(Duration::from_secs(10))
            }
            ReconcileOutcome::StatusSynced => Action::requeue(config.resync),
        }
    }
}

/// Start a controller for the LocustLoadTest CRD.
pub async fn run(config: OperatorConfig) -> anyhow::Result<()> {
    let k_client = Client::try_default().await?;
    let context = Arc::new(Context::new(k_client.clone(), config));

    let load_tests: Api<LocustLoadTest> = Api::all(k_client.clone());
    let deployments = Api::<Deployment>::all(k_client.clone());

    // Keep the owner index current for the lifetime of the controller.
    let index = context.index.clone();
    tokio::spawn(
        watcher(deployments.clone(), index_watcher_config())
            .default_backoff()
            .for_each(move |event| {
                match event {
                    Ok(event) => index.apply(event),
                    Err(err) => warn!(%err, "deployment watch error"),
                }
                futures::future::ready(())
            }),
    );
    // Passes before the first listing would see no owned Deployments and skip cleanup.
    info!("waiting for deployment index to sync");
    context.index.wait_synced().await;
    info!(deployments = context.index.len(), "deployment index synced");

    Controller::new(load_tests, Config::default())
        .owns(
            deployments,
            watcher::Config::default().labels(MANAGED_BY_LABEL_SELECTOR),
        )
        .shutdown_on_signal()
        .run(reconcile, on_error, context)
        .for_each(|rec_res| async move {
            match rec_res {
                Ok((load_test, _)) => {
                    debug!(load_test = %load_test.name, "reconcile success");
                }
                Err(err) => {
                    error!(?err, "reconcile error")
                }
            }
        })
        .await;
    Ok(())
}

/// Watch for the owner index.
///
/// Unfiltered: ownership is decided by owner references alone, so Deployments that lost the
/// managed-by label or were created before it existed are still found and cleaned up.
fn index_watcher_config() -> watcher::Config {
    watcher::Config::default()
}

/// Perform a reconcile pass for the LocustLoadTest CRD
async fn reconcile(
    load_test: Arc<LocustLoadTest>,
    cx: Arc<Context<impl EventRecorder>>,
) -> Result<Action, Error> {
    let meter = global::meter("locust-operator");
    let runs = meter
        .u64_counter("locust_load_test_reconcile_count")
        .with_description("Number of load test reconciles")
        .init();

    match reconcile_pass(load_test, cx.clone()).await {
        Ok(outcome) => {
            runs.add(1, &[KeyValue::new("result", "ok")]);
            Ok(outcome.action(&cx.config))
        }
        Err(err) => {
            runs.add(1, &[KeyValue::new("result", "err")]);
            Err(err)
        }
    }
}

/// Fetch, validate, clean up, ensure the Deployment exists, scale it and sync the status.
async fn reconcile_pass(
    load_test: Arc<LocustLoadTest>,
    cx: Arc<Context<impl EventRecorder>>,
) -> Result<ReconcileOutcome, Error> {
    let ns = load_test
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let load_tests: Api<LocustLoadTest> = Api::namespaced(cx.k_client.clone(), &ns);

    // The cached copy may be stale, always work from the latest spec.
    let Some(load_test) = load_tests.get_opt(&load_test.name_any()).await? else {
        debug!(load_test = %load_test.name_any(), "load test no longer exists");
        return Ok(ReconcileOutcome::ResourceGone);
    };
    debug!(spec = ?load_test.spec, "reconcile");

    let replicas = match validation::desired_replicas(&load_test.spec) {
        Ok(replicas) => replicas,
        Err(err) => {
            cx.events
                .publish(
                    &load_test,
                    EventType::Warning,
                    reasons::INVALID_SPEC,
                    err.to_string(),
                )
                .await;
            return Err(err.into());
        }
    };

    cleanup_owned_deployments(cx.clone(), &ns, &load_test).await?;

    let deployment = match ensure_deployment(cx.clone(), &ns, &load_test, replicas).await? {
        Ensured::Created => return Ok(ReconcileOutcome::Created),
        Ensured::Existing(deployment) => deployment,
    };

    let deployment =
        match reconcile_scale(cx.clone(), &ns, &load_test, deployment, replicas).await? {
            Scaled::Scaled => return Ok(ReconcileOutcome::Scaled),
            Scaled::UpToDate(deployment) => deployment,
        };

    sync_status(cx, &ns, &load_test, &deployment).await
}

/// Delete every Deployment owned by the load test that the spec no longer names.
async fn cleanup_owned_deployments(
    cx: Arc<Context<impl EventRecorder>>,
    ns: &str,
    load_test: &LocustLoadTest,
) -> Result<(), Error> {
    for stale in cx
        .index
        .owned_by(ns, &load_test.name_any())
        .into_iter()
        .filter(|owned| owned.name_any() != load_test.spec.deployment_name)
    {
        let name = stale.name_any();
        info!(deployment = %name, "deleting stale deployment");
        let deleted = delete_deployment(cx.clone(), ns, &name).await?;
        cx.index.remove(&stale);
        if deleted {
            cx.events
                .publish(
                    load_test,
                    EventType::Normal,
                    reasons::DELETED,
                    format!("Deleted deployment {name:?}"),
                )
                .await;
        }
    }
    Ok(())
}

enum Ensured {
    Created,
    Existing(Deployment),
}

/// Create the worker Deployment if it does not exist yet.
async fn ensure_deployment(
    cx: Arc<Context<impl EventRecorder>>,
    ns: &str,
    load_test: &LocustLoadTest,
    replicas: i32,
) -> Result<Ensured, Error> {
    let name = &load_test.spec.deployment_name;
    let deployments: Api<Deployment> = Api::namespaced(cx.k_client.clone(), ns);

    if let Some(existing) = deployments.get_opt(name).await? {
        if !is_controlled_by(&existing, load_test) {
            cx.events
                .publish(
                    load_test,
                    EventType::Warning,
                    reasons::DEPLOYMENT_CONFLICT,
                    format!("Deployment {name:?} is not controlled by this load test"),
                )
                .await;
            return Err(Error::DeploymentConflict {
                name: name.to_owned(),
            });
        }
        return Ok(Ensured::Existing(existing));
    }

    info!(deployment = %name, replicas, "creating deployment");
    let owner = load_test
        .controller_owner_ref(&())
        .ok_or(Error::MissingObjectKey(".metadata.uid"))?;
    let created = deployments
        .create(
            &PostParams::default(),
            &deployment::deployment(load_test, owner, replicas, &cx.config.worker_image),
        )
        .await?;
    cx.index.upsert(created);
    cx.events
        .publish(
            load_test,
            EventType::Normal,
            reasons::CREATED,
            format!("Created deployment {name:?}"),
        )
        .await;
    Ok(Ensured::Created)
}

fn is_controlled_by(deployment: &Deployment, load_test: &LocustLoadTest) -> bool {
    let Some(uid) = load_test.uid() else {
        return false;
    };
    deployment
        .owner_references()
        .iter()
        .any(|oref| oref.controller == Some(true) && oref.uid == uid)
}

enum Scaled {
    Scaled,
    UpToDate(Deployment),
}

/// Bring the Deployment replica count in line with the spec.
async fn reconcile_scale(
    cx: Arc<Context<impl EventRecorder>>,
    ns: &str,
    load_test: &LocustLoadTest,
    mut deployment: Deployment,
    replicas: i32,
) -> Result<Scaled, Error> {
    let current = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(KUBERNETES_DEFAULT_REPLICAS);
    if current == replicas {
        debug!(replica_count = current, "replica count up to date");
        return Ok(Scaled::UpToDate(deployment));
    }

    let name = deployment.name_any();
    info!(
        deployment = %name,
        old_count = current,
        new_count = replicas,
        "updating replica count"
    );
    deployment.spec.get_or_insert_with(Default::default).replicas = Some(replicas);
    // Replace carries the resourceVersion we read, concurrent writers surface as a conflict.
    let deployments: Api<Deployment> = Api::namespaced(cx.k_client.clone(), ns);
    deployments
        .replace(&name, &PostParams::default(), &deployment)
        .await?;
    cx.events
        .publish(
            load_test,
            EventType::Normal,
            reasons::SCALED,
            format!("Scaled deployment {name:?} to {replicas} replicas"),
        )
        .await;
    Ok(Scaled::Scaled)
}

/// Copy the Deployment's ready replicas into the load test status.
async fn sync_status(
    cx: Arc<Context<impl EventRecorder>>,
    ns: &str,
    load_test: &LocustLoadTest,
    deployment: &Deployment,
) -> Result<ReconcileOutcome, Error> {
    let status = LocustLoadTestStatus {
        current_workers: deployment
            .status
            .as_ref()
            .and_then(|status| status.ready_replicas)
            .unwrap_or(0),
    };
    debug!(current_workers = status.current_workers, "updating status");

    let load_tests: Api<LocustLoadTest> = Api::namespaced(cx.k_client.clone(), ns);
    match load_tests
        .patch_status(
            &load_test.name_any(),
            &PatchParams::default(),
            &Patch::Merge(serde_json::json!({ "status": status })),
        )
        .await
    {
        Ok(_) => Ok(ReconcileOutcome::StatusSynced),
        Err(err) if is_not_found(&err) => {
            debug!("load test deleted before its status was written");
            Ok(ReconcileOutcome::ResourceGone)
        }
        Err(err) => Err(err.into()),
    }
}
