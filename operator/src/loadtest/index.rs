//! Index of the Deployments owned by each LocustLoadTest.
//!
//! The index is keyed by (namespace, owner name) and is kept current by applying the events of a
//! Deployment watcher, so listing the Deployments of a load test only touches its own entries.
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, PoisonError, RwLock},
};

use k8s_openapi::{
    api::apps::v1::Deployment, apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::{runtime::watcher, ResourceExt};
use tokio::sync::watch;

/// API group an owner reference must carry to count as a load test.
pub const OWNER_GROUP: &str = "loadtests.cndev.io";
/// Kind an owner reference must carry to count as a load test.
pub const OWNER_KIND: &str = "LocustLoadTest";

/// Extracts the owning load test name from a Deployment.
pub type OwnerExtractor = fn(&Deployment) -> Option<String>;

/// Name of the LocustLoadTest owning the deployment, if any.
///
/// Owner references of any other kind or API group are ignored so Deployments owned by other
/// controllers never show up as ours.
pub fn owner_name(deployment: &Deployment) -> Option<String> {
    deployment
        .owner_references()
        .iter()
        .find(|oref| is_load_test_owner(oref))
        .map(|oref| oref.name.clone())
}

fn is_load_test_owner(oref: &OwnerReference) -> bool {
    // apiVersion is "<group>/<version>"; core types have no group at all.
    let group = oref
        .api_version
        .split_once('/')
        .map(|(group, _)| group)
        .unwrap_or_default();
    group == OWNER_GROUP && oref.kind == OWNER_KIND
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct OwnerKey {
    namespace: String,
    owner: String,
}

#[derive(Debug, Default)]
struct Entries {
    by_owner: HashMap<OwnerKey, BTreeMap<String, Arc<Deployment>>>,
    // (namespace, deployment name) -> key it is currently filed under
    owners: HashMap<(String, String), OwnerKey>,
}

impl Entries {
    fn remove(&mut self, namespace: &str, name: &str) {
        if let Some(key) = self.owners.remove(&(namespace.to_owned(), name.to_owned())) {
            if let Some(owned) = self.by_owner.get_mut(&key) {
                owned.remove(name);
                if owned.is_empty() {
                    self.by_owner.remove(&key);
                }
            }
        }
    }

    fn upsert(&mut self, extractor: OwnerExtractor, deployment: Deployment) {
        let Some(namespace) = deployment.namespace() else {
            return;
        };
        let name = deployment.name_any();
        self.remove(&namespace, &name);
        if let Some(owner) = extractor(&deployment) {
            let key = OwnerKey {
                namespace: namespace.clone(),
                owner,
            };
            self.owners.insert((namespace, name.clone()), key.clone());
            self.by_owner
                .entry(key)
                .or_default()
                .insert(name, Arc::new(deployment));
        }
    }
}

/// Deployments grouped by owning load test.
#[derive(Debug)]
pub struct OwnerIndex {
    extractor: OwnerExtractor,
    entries: RwLock<Entries>,
    // Flips to true on the first full listing.
    synced: watch::Sender<bool>,
}

impl Default for OwnerIndex {
    fn default() -> Self {
        Self::new(owner_name)
    }
}

impl OwnerIndex {
    /// Create an empty index using the given owner extractor.
    pub fn new(extractor: OwnerExtractor) -> Self {
        Self {
            extractor,
            entries: RwLock::default(),
            synced: watch::channel(false).0,
        }
    }

    /// Wait until the index has applied a full listing of Deployments.
    ///
    /// Before that it may be missing Deployments that already exist in the cluster.
    pub async fn wait_synced(&self) {
        let mut synced = self.synced.subscribe();
        // The sender lives in self, so this cannot fail.
        let _ = synced.wait_for(|synced| *synced).await;
    }

    /// True once a full listing has been applied.
    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Apply a watcher event to the index.
    pub fn apply(&self, event: watcher::Event<Deployment>) {
        match event {
            watcher::Event::Applied(deployment) => self.upsert(deployment),
            watcher::Event::Deleted(deployment) => self.remove(&deployment),
            watcher::Event::Restarted(deployments) => {
                let mut entries = Entries::default();
                for deployment in deployments {
                    entries.upsert(self.extractor, deployment);
                }
                *self.entries.write().unwrap_or_else(PoisonError::into_inner) = entries;
                self.synced.send_replace(true);
            }
        }
    }

    /// Insert or refresh a deployment. Deployments without a matching owner are dropped.
    pub fn upsert(&self, deployment: Deployment) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .upsert(self.extractor, deployment);
    }

    /// Forget a deployment.
    pub fn remove(&self, deployment: &Deployment) {
        if let Some(namespace) = deployment.namespace() {
            self.entries
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&namespace, &deployment.name_any());
        }
    }

    /// All deployments in `namespace` owned by the load test named `owner`, sorted by name.
    pub fn owned_by(&self, namespace: &str, owner: &str) -> Vec<Arc<Deployment>> {
        let key = OwnerKey {
            namespace: namespace.to_owned(),
            owner: owner.to_owned(),
        };
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_owner
            .get(&key)
            .map(|owned| owned.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of indexed deployments.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .owners
            .len()
    }

    /// True when nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
