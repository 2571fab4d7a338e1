//! # Secret module
//!
//! This module provide helpers to generate the secret derived from a
//! custom resource

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::{api::ObjectMeta, ResourceExt};

// -----------------------------------------------------------------------------
// Constants

pub const MANAGED_BY_ANNOTATION: &str = "managed-by";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const SOURCE_UID_LABEL: &str = "apps.sd01dev.com/calculator-uid";
pub const MANAGER: &str = "calc-operator";
pub const SECRET_TYPE: &str = "Opaque";

// -----------------------------------------------------------------------------
// Helpers functions

/// returns a new opaque secret named after the given object and holding the
/// given string data.
///
/// The secret does not carry an owner reference. The source is recorded through
/// labels instead, see [`selector`] and [`source_uid`].
pub fn new<T>(obj: &T, data: BTreeMap<String, String>) -> Secret
where
    T: ResourceExt,
{
    let mut labels = BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGER.to_string())]);
    if let Some(uid) = obj.uid() {
        labels.insert(SOURCE_UID_LABEL.to_string(), uid);
    }

    Secret {
        metadata: ObjectMeta {
            name: Some(obj.name_any()),
            namespace: obj.namespace(),
            annotations: Some(BTreeMap::from([(
                MANAGED_BY_ANNOTATION.to_string(),
                MANAGER.to_string(),
            )])),
            labels: Some(labels),
            ..Default::default()
        },
        type_: Some(SECRET_TYPE.to_string()),
        string_data: Some(data),
        ..Default::default()
    }
}

/// returns the label selector matching every secret managed by the operator
pub fn selector() -> String {
    format!("{MANAGED_BY_LABEL}={MANAGER}")
}

/// returns the uid of the object the secret was derived from, if recorded
pub fn source_uid(secret: &Secret) -> Option<&str> {
    secret
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(SOURCE_UID_LABEL))
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(uid: Option<&str>) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("example".to_string()),
                namespace: Some("default".to_string()),
                uid: uid.map(ToString::to_string),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn new_secret_mirrors_source_identity() {
        let data = BTreeMap::from([("result".to_string(), "76".to_string())]);
        let secret = new(&source(Some("1234")), data.to_owned());

        assert_eq!(secret.metadata.name.as_deref(), Some("example"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("default"));
        assert_eq!(secret.metadata.owner_references, None);
        assert_eq!(
            secret.metadata.annotations,
            Some(BTreeMap::from([(
                "managed-by".to_string(),
                "calc-operator".to_string()
            )]))
        );
        assert_eq!(secret.type_.as_deref(), Some("Opaque"));
        assert_eq!(secret.string_data, Some(data));
        assert_eq!(source_uid(&secret), Some("1234"));
    }

    #[test]
    fn new_secret_without_source_uid() {
        let secret = new(&source(None), BTreeMap::new());

        assert_eq!(source_uid(&secret), None);
        assert_eq!(
            secret
                .metadata
                .labels
                .as_ref()
                .and_then(|labels| labels.get(MANAGED_BY_LABEL))
                .map(String::as_str),
            Some(MANAGER)
        );
    }

    #[test]
    fn selector_matches_managed_label() {
        assert_eq!(selector(), "app.kubernetes.io/managed-by=calc-operator");
    }
}
