//! Helper methods only available for tests

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStatus};
use kube::{api::ObjectMeta, Resource, ResourceExt};
use tokio::task::JoinHandle;

use crate::{
    loadtest::{
        deployment::{deployment, WorkerImageConfig},
        LocustLoadTest, LocustLoadTestSpec, LocustLoadTestStatus,
    },
    utils::test::{error_response, ok_response, ApiServerVerifier, Request, WithStatus},
};

pub const LOAD_TEST_PATH: &str = "/apis/loadtests.cndev.io/v1/namespaces/test/locustloadtests/lt1";
pub const LOAD_TEST_STATUS_PATH: &str =
    "/apis/loadtests.cndev.io/v1/namespaces/test/locustloadtests/lt1/status";
pub const DEPLOYMENTS_PATH: &str = "/apis/apps/v1/namespaces/test/deployments";

pub fn deployment_path(name: &str) -> String {
    format!("{DEPLOYMENTS_PATH}/{name}")
}

// Add tests specific implementation to the LocustLoadTest
impl LocustLoadTest {
    /// A load test in the test namespace that has never been reconciled.
    pub fn test() -> Self {
        let mut load_test = LocustLoadTest::new(
            "lt1",
            LocustLoadTestSpec {
                deployment_name: "lt1-workers".to_owned(),
                host_url: "http://target.test".to_owned(),
                locust_spec: "locustfile.py".to_owned(),
                spec_repository: "https://github.com/example/load-tests".to_owned(),
                ..Default::default()
            },
        );
        let meta = load_test.meta_mut();
        meta.namespace = Some("test".to_owned());
        meta.uid = Some("lt1-uid".to_owned());
        load_test
    }
    pub fn with_spec(self, spec: LocustLoadTestSpec) -> Self {
        Self { spec, ..self }
    }
    pub fn with_workers(mut self, workers: Option<u32>) -> Self {
        self.spec.workers = workers;
        self
    }
    pub fn with_deployment_name(mut self, name: &str) -> Self {
        self.spec.deployment_name = name.to_owned();
        self
    }
    /// Rename the load test, giving it a matching uid.
    pub fn with_name(mut self, name: &str) -> Self {
        let meta = self.meta_mut();
        meta.name = Some(name.to_owned());
        meta.uid = Some(format!("{name}-uid"));
        self
    }
}
impl WithStatus for LocustLoadTest {
    type Status = LocustLoadTestStatus;
    fn with_status(self, status: LocustLoadTestStatus) -> Self {
        Self {
            status: Some(status),
            ..self
        }
    }
}

/// Deployment controlled by the load test, as the API server would return it.
///
/// Without `ready` the Deployment has no status yet.
pub fn owned_deployment(
    load_test: &LocustLoadTest,
    name: &str,
    replicas: i32,
    ready: Option<i32>,
) -> Deployment {
    let load_test = load_test.clone().with_deployment_name(name);
    let owner = load_test
        .controller_owner_ref(&())
        .expect("load test should have a name and uid");
    let mut owned = deployment(&load_test, owner, replicas, &WorkerImageConfig::default());
    owned.metadata.resource_version = Some("1".to_owned());
    owned.status = ready.map(|ready| DeploymentStatus {
        ready_replicas: Some(ready),
        ..Default::default()
    });
    owned
}

/// Deployment with the given name that no load test controls.
pub fn foreign_deployment(name: &str) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some("test".to_owned()),
            resource_version: Some("7".to_owned()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(2),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// In memory API server state for a single load test and its Deployments.
///
/// Unlike the scripted verifier it answers whatever the reconciler asks, so tests can run many
/// passes and assert on the resulting state and the mutations made.
#[derive(Debug, Default)]
pub struct Cluster {
    pub load_test: Option<LocustLoadTest>,
    pub deployments: BTreeMap<String, Deployment>,
    /// Writes to Deployments in the order they were made, e.g. "create lt1-workers".
    pub mutations: Vec<String>,
    resource_version: u64,
}

impl Cluster {
    pub fn with_load_test(load_test: LocustLoadTest) -> Self {
        Self {
            load_test: Some(load_test),
            ..Default::default()
        }
    }

    pub fn insert_deployment(&mut self, deployment: Deployment) {
        self.deployments.insert(deployment.name_any(), deployment);
    }

    /// Report every pod of every Deployment as ready.
    pub fn mark_ready(&mut self) {
        for deployment in self.deployments.values_mut() {
            let replicas = deployment.spec.as_ref().and_then(|spec| spec.replicas);
            deployment.status = Some(DeploymentStatus {
                replicas,
                ready_replicas: replicas,
                ..Default::default()
            });
        }
    }

    pub fn current_workers(&self) -> Option<i32> {
        self.load_test
            .as_ref()?
            .status
            .as_ref()
            .map(|status| status.current_workers)
    }

    pub fn set_workers(&mut self, workers: Option<u32>) {
        if let Some(load_test) = self.load_test.as_mut() {
            load_test.spec.workers = workers;
        }
    }

    pub fn set_deployment_name(&mut self, name: &str) {
        if let Some(load_test) = self.load_test.as_mut() {
            load_test.spec.deployment_name = name.to_owned();
        }
    }

    fn next_resource_version(&mut self) -> Option<String> {
        self.resource_version += 1;
        Some(format!("rv-{}", self.resource_version))
    }

    /// Serve requests until the client goes away.
    pub fn serve(cluster: Arc<Mutex<Self>>, mut verifier: ApiServerVerifier) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some((request, send)) = verifier.next().await {
                let response = cluster.lock().unwrap().respond(request);
                send.send_response(response);
            }
        })
    }

    fn respond(&mut self, request: Request) -> http::Response<hyper::Body> {
        let path = request.path().to_owned();
        match (request.method.as_str(), path.as_str()) {
            ("GET", LOAD_TEST_PATH) => match &self.load_test {
                Some(load_test) => ok_response(load_test),
                None => error_response(404, "NotFound"),
            },
            ("PATCH", LOAD_TEST_STATUS_PATH) => {
                let Some(load_test) = self.load_test.as_mut() else {
                    return error_response(404, "NotFound");
                };
                let status: LocustLoadTestStatus =
                    serde_json::from_value(request.body["status"].clone())
                        .expect("status patch should carry a status");
                load_test.status = Some(status);
                ok_response(&*load_test)
            }
            ("POST", DEPLOYMENTS_PATH) => {
                let mut created: Deployment =
                    serde_json::from_value(request.body).expect("deployment body");
                let name = created.name_any();
                if self.deployments.contains_key(&name) {
                    return error_response(409, "AlreadyExists");
                }
                created.metadata.resource_version = self.next_resource_version();
                self.mutations.push(format!("create {name}"));
                let response = ok_response(&created);
                self.deployments.insert(name, created);
                response
            }
            (method, path) => {
                let Some(name) = path
                    .strip_prefix(DEPLOYMENTS_PATH)
                    .and_then(|name| name.strip_prefix('/'))
                    .map(str::to_owned)
                else {
                    panic!("unexpected request {method} {path}");
                };
                self.respond_deployment(method, name, request.body)
            }
        }
    }

    fn respond_deployment(
        &mut self,
        method: &str,
        name: String,
        body: serde_json::Value,
    ) -> http::Response<hyper::Body> {
        match method {
            "GET" => match self.deployments.get(&name) {
                Some(existing) => ok_response(existing),
                None => error_response(404, "NotFound"),
            },
            "PUT" => {
                let replacement: Deployment =
                    serde_json::from_value(body).expect("deployment body");
                let rv = self.next_resource_version();
                let Some(existing) = self.deployments.get_mut(&name) else {
                    return error_response(404, "NotFound");
                };
                if replacement.metadata.resource_version != existing.metadata.resource_version {
                    return error_response(409, "Conflict");
                }
                // Status is owned by the Deployment controller and ignored on replace.
                existing.spec = replacement.spec;
                existing.metadata.resource_version = rv;
                self.mutations.push(format!("replace {name}"));
                ok_response(&*existing)
            }
            "DELETE" => match self.deployments.remove(&name) {
                Some(deleted) => {
                    self.mutations.push(format!("delete {name}"));
                    ok_response(&deleted)
                }
                None => error_response(404, "NotFound"),
            },
            _ => panic!("unexpected request {method} {name}"),
        }
    }
}
