//! Builds the Deployment that runs the Locust workers for a load test.
use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec},
    },
    apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference},
};
use kube::{api::ObjectMeta, ResourceExt};

use crate::{
    labels::{managed_labels_extend, selector_labels},
    loadtest::{LocustLoadTest, LocustLoadTestSpec},
};

/// Name of the worker container.
pub const WORKER_CONTAINER_NAME: &str = "locust-worker";
/// Port of the Locust web interface.
pub const WORKER_WEB_PORT: i32 = 8089;

/// Configuration for worker images.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerImageConfig {
    /// Image for the worker containers.
    pub image: String,
    /// Pull policy for image.
    pub image_pull_policy: String,
}

impl Default for WorkerImageConfig {
    fn default() -> Self {
        Self {
            image: "locustio/locust:latest".to_owned(),
            image_pull_policy: "IfNotPresent".to_owned(),
        }
    }
}

impl WorkerImageConfig {
    /// Apply the image overrides of a spec on top of these defaults.
    pub fn for_spec(&self, spec: &LocustLoadTestSpec) -> Self {
        Self {
            image: spec.image.to_owned().unwrap_or_else(|| self.image.clone()),
            image_pull_policy: spec
                .image_pull_policy
                .to_owned()
                .unwrap_or_else(|| self.image_pull_policy.clone()),
        }
    }
}

/// Deployment running `replicas` Locust workers against the load test target.
pub fn deployment(
    load_test: &LocustLoadTest,
    owner: OwnerReference,
    replicas: i32,
    images: &WorkerImageConfig,
) -> Deployment {
    let spec = &load_test.spec;
    let images = images.for_spec(spec);
    let name = &spec.deployment_name;

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: load_test.namespace(),
            owner_references: Some(vec![owner]),
            labels: managed_labels_extend(selector_labels(name)),
            ..ObjectMeta::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: selector_labels(name),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: selector_labels(name),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: WORKER_CONTAINER_NAME.to_owned(),
                        image: Some(images.image),
                        image_pull_policy: Some(images.image_pull_policy),
                        env: Some(env_vars(spec)),
                        ports: Some(vec![ContainerPort {
                            container_port: WORKER_WEB_PORT,
                            name: Some("web".to_owned()),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn env_vars(spec: &LocustLoadTestSpec) -> Vec<EnvVar> {
    BTreeMap::from_iter([
        ("LOCUST_HOST", &spec.host_url),
        ("LOCUST_LOCUSTFILE", &spec.locust_spec),
        ("LOCUST_SPEC_REPOSITORY", &spec.spec_repository),
    ])
    .into_iter()
    .map(|(name, value)| EnvVar {
        name: name.to_owned(),
        value: Some(value.to_owned()),
        ..Default::default()
    })
    .collect()
}
