use std::collections::BTreeMap;

/// Create lables that can be used as a unique selector for a given app name.
pub fn selector_labels(app: &str) -> Option<BTreeMap<String, String>> {
    Some(BTreeMap::from_iter(vec![(
        "app".to_owned(),
        app.to_owned(),
    )]))
}

/// Manage by label
pub const MANAGED_BY_LABEL_SELECTOR: &str = "managed-by=locust-operator";

/// Labels that indicate the resource is managed by the locust operator.
pub fn managed_labels() -> Option<BTreeMap<String, String>> {
    Some(BTreeMap::from_iter(vec![(
        "managed-by".to_owned(),
        "locust-operator".to_owned(),
    )]))
}

/// Managed labels extended with any extra labels. Extra labels win on key collisions.
pub fn managed_labels_extend(
    labels: Option<BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    let mut all = managed_labels().unwrap_or_default();
    if let Some(labels) = labels {
        all.extend(labels);
    }
    Some(all)
}
