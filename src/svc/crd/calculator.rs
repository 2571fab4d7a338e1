//! # Calculator
//!
//! This module provide the calculator custom resource, its definition and the
//! reconciliation which writes the sum of its operands in its status and
//! exposes it through a secret

use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
    sync::Arc,
};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    runtime::{controller, reflector::ObjectRef, watcher, Controller},
    Api, CustomResource, Resource, ResourceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::svc::k8s::{
    self, resource, secret,
    store::{self, Store},
    Context, ControllerBuilder,
};

// -----------------------------------------------------------------------------
// Constants

pub const RESULT_KEY: &str = "result";

// -----------------------------------------------------------------------------
// Spec structure

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[kube(group = "apps.sd01dev.com")]
#[kube(version = "v1")]
#[kube(kind = "Calculator")]
#[kube(singular = "calculator")]
#[kube(plural = "calculators")]
#[kube(shortname = "calc")]
#[kube(status = "Status")]
#[kube(namespaced)]
#[kube(derive = "PartialEq")]
#[kube(
    printcolumn = r#"{"name":"Processed", "type":"boolean", "jsonPath":".status.processed"}"#,
    printcolumn = r#"{"name":"Result", "type":"integer", "jsonPath":".status.result"}"#
)]
pub struct Spec {
    #[serde(rename = "x")]
    pub x: i32,
    #[serde(rename = "z")]
    pub z: i32,
}

impl Spec {
    /// returns the status of a processed calculator, the sum wraps around on
    /// overflow
    pub fn compute(&self) -> Status {
        Status {
            processed: true,
            result: self.x.wrapping_add(self.z),
        }
    }
}

// -----------------------------------------------------------------------------
// Status structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct Status {
    #[serde(rename = "processed")]
    pub processed: bool,
    #[serde(rename = "result")]
    pub result: i32,
}

// -----------------------------------------------------------------------------
// SecretPolicy enum

/// what to do when the secret derived from a calculator already exists
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SecretPolicy {
    /// always create the secret, an existing one makes the reconciliation fail
    #[default]
    Create,
    /// create the secret or update the existing one
    Overwrite,
    /// create the secret, leave an existing one untouched
    Skip,
}

impl Display for SecretPolicy {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Overwrite => write!(f, "overwrite"),
            Self::Skip => write!(f, "skip"),
        }
    }
}

// -----------------------------------------------------------------------------
// ReconcilerError enum

#[derive(thiserror::Error, Debug)]
pub enum ReconcilerError {
    #[error("failed to reconcile resource, {0}")]
    Reconcile(String),
    #[error("failed to reconcile custom resource '{0}', it has no namespace")]
    MissingNamespace(String),
    #[error("failed to get custom resource '{0}', {1}")]
    Fetch(String, kube::Error),
    #[error("failed to update status of custom resource '{0}', {1}")]
    StatusWrite(String, kube::Error),
    #[error("failed to create secret '{0}', {1}")]
    SecretCreate(String, kube::Error),
    #[error("failed to update secret '{0}', {1}")]
    SecretUpdate(String, kube::Error),
    #[error("failed to execute request on kubernetes api, {0}")]
    KubeClient(kube::Error),
    #[error("failed to compute diff between the original and modified object, {0}")]
    Diff(serde_json::Error),
}

impl From<kube::Error> for ReconcilerError {
    #[cfg_attr(feature = "trace", tracing::instrument)]
    fn from(err: kube::Error) -> Self {
        Self::KubeClient(err)
    }
}

impl From<controller::Error<Self, watcher::Error>> for ReconcilerError {
    #[cfg_attr(feature = "trace", tracing::instrument)]
    fn from(err: controller::Error<ReconcilerError, watcher::Error>) -> Self {
        Self::Reconcile(err.to_string())
    }
}

// -----------------------------------------------------------------------------
// Reconciliation

/// fetch the calculator, persist its computed status and materialize the
/// secret holding the result.
///
/// Each step is only attempted once the previous one succeeded. A calculator
/// which does not exist anymore is not an error.
#[cfg_attr(feature = "trace", tracing::instrument(skip(store)))]
pub async fn reconcile<S: Store>(
    store: &S,
    policy: SecretPolicy,
    key: &ObjectRef<Calculator>,
) -> Result<(), ReconcilerError> {
    let kind = Calculator::kind(&()).to_string();
    let name = key.name.to_owned();
    let namespace = key
        .namespace
        .to_owned()
        .ok_or_else(|| ReconcilerError::MissingNamespace(name.to_owned()))?;

    // -------------------------------------------------------------------------
    // Step 1: fetch the custom resource

    let origin = match store.get::<Calculator>(&namespace, &name).await {
        Ok(Some(origin)) => origin,
        Ok(None) => {
            info!(
                kind = &kind,
                namespace = &namespace,
                name = &name,
                "Custom resource does not exist anymore, skip reconciliation"
            );
            return Ok(());
        }
        Err(err) => {
            error!(
                kind = &kind,
                namespace = &namespace,
                name = &name,
                error = err.to_string(),
                "Failed to get custom resource"
            );
            return Err(ReconcilerError::Fetch(format!("{namespace}/{name}"), err));
        }
    };

    // -------------------------------------------------------------------------
    // Step 2: compute and persist the status

    let mut modified = origin.to_owned();
    let status = modified.spec.compute();
    modified.status = Some(status.to_owned());

    let patch = resource::diff(&origin, &modified).map_err(ReconcilerError::Diff)?;
    if patch.0.is_empty() {
        debug!(
            kind = &kind,
            namespace = &namespace,
            name = &name,
            "skip patch request on resource's status, no operation to apply"
        );
    } else {
        info!(
            kind = &kind,
            namespace = &namespace,
            name = &name,
            result = status.result,
            "Update status of custom resource"
        );
        if let Err(err) = store
            .patch_status::<Calculator>(&namespace, &name, patch)
            .await
        {
            error!(
                kind = &kind,
                namespace = &namespace,
                name = &name,
                error = err.to_string(),
                "Failed to update status of custom resource"
            );
            return Err(ReconcilerError::StatusWrite(
                format!("{namespace}/{name}"),
                err,
            ));
        }
    }

    // -------------------------------------------------------------------------
    // Step 3: materialize the secret

    let data = BTreeMap::from([(RESULT_KEY.to_string(), status.result.to_string())]);
    let s = secret::new(&modified, data);

    if let Err(err) = upsert_secret(store, policy, &s).await {
        error!(
            kind = &kind,
            namespace = &namespace,
            name = &name,
            policy = policy.to_string(),
            error = err.to_string(),
            "Failed to materialize secret of custom resource"
        );
        return Err(err);
    }

    Ok(())
}

/// write the secret following the given policy
async fn upsert_secret<S: Store>(
    store: &S,
    policy: SecretPolicy,
    s: &Secret,
) -> Result<(), ReconcilerError> {
    let (namespace, name) = resource::namespaced_name(s);

    let existing = match policy {
        SecretPolicy::Create => None,
        SecretPolicy::Overwrite | SecretPolicy::Skip => store
            .get::<Secret>(&namespace, &name)
            .await
            .map_err(|err| ReconcilerError::SecretCreate(format!("{namespace}/{name}"), err))?,
    };

    let existing = match (policy, existing) {
        (_, None) => {
            info!(
                kind = "Secret",
                namespace = &namespace,
                name = &name,
                "Create kubernetes secret"
            );
            store
                .create(s)
                .await
                .map_err(|err| ReconcilerError::SecretCreate(format!("{namespace}/{name}"), err))?;

            return Ok(());
        }
        (SecretPolicy::Skip, Some(_)) => {
            info!(
                kind = "Secret",
                namespace = &namespace,
                name = &name,
                "Kubernetes secret already exists, leave it untouched"
            );
            return Ok(());
        }
        (_, Some(existing)) => existing,
    };

    let mut modified = existing.to_owned();
    modified
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .extend(s.metadata.annotations.to_owned().unwrap_or_default());
    modified
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(s.metadata.labels.to_owned().unwrap_or_default());
    modified.string_data = s.string_data.to_owned();

    let patch = resource::diff(&existing, &modified).map_err(ReconcilerError::Diff)?;
    if patch.0.is_empty() {
        debug!(
            kind = "Secret",
            namespace = &namespace,
            name = &name,
            "skip patch request on secret, no operation to apply"
        );
        return Ok(());
    }

    info!(
        kind = "Secret",
        namespace = &namespace,
        name = &name,
        "Update kubernetes secret"
    );
    store
        .patch::<Secret>(&namespace, &name, patch)
        .await
        .map_err(|err| ReconcilerError::SecretUpdate(format!("{namespace}/{name}"), err))?;

    Ok(())
}

/// delete secrets managed by the operator whose calculator no longer exists or
/// was re-created since, returns the namespace and name of collected secrets
#[cfg_attr(feature = "trace", tracing::instrument(skip(store)))]
pub async fn garbage_collect<S: Store>(
    store: &S,
    dry_run: bool,
) -> Result<Vec<(String, String)>, ReconcilerError> {
    let secrets: Vec<Secret> = store.list(None, &secret::selector()).await?;
    let mut collected = vec![];

    for s in secrets {
        let (namespace, name) = resource::namespaced_name(&s);
        let source = store.get::<Calculator>(&namespace, &name).await?;

        let orphan = match (&source, secret::source_uid(&s)) {
            (None, _) => true,
            (Some(calculator), Some(uid)) => calculator.uid().as_deref() != Some(uid),
            (Some(_), None) => false,
        };

        if !orphan {
            continue;
        }

        if dry_run {
            info!(
                kind = "Secret",
                namespace = &namespace,
                name = &name,
                "Found orphaned kubernetes secret"
            );
        } else {
            info!(
                kind = "Secret",
                namespace = &namespace,
                name = &name,
                "Delete orphaned kubernetes secret"
            );
            store.delete::<Secret>(&namespace, &name).await?;
        }

        collected.push((namespace, name));
    }

    Ok(collected)
}

// -----------------------------------------------------------------------------
// Reconciler structure

#[derive(Clone, Default, Debug)]
pub struct Reconciler {}

impl ControllerBuilder<Calculator> for Reconciler {
    fn build(&self, ctx: Arc<Context>) -> Controller<Calculator> {
        Controller::new(Api::all(ctx.kube.to_owned()), watcher::Config::default())
    }
}

#[async_trait]
impl k8s::Reconciler<Calculator> for Reconciler {
    type Error = ReconcilerError;

    async fn upsert(ctx: Arc<Context>, origin: Arc<Calculator>) -> Result<(), ReconcilerError> {
        let store = store::Kubernetes::from(ctx.kube.to_owned());
        let key = ObjectRef::from_obj(&*origin);

        reconcile(&store, ctx.config.operator.secret_policy, &key).await
    }
}

#[cfg(test)]
mod tests {
    use kube::CustomResourceExt;

    use super::*;
    use crate::svc::k8s::store::memory::{Memory, Verb};

    const NAMESPACE: &str = "default";
    const NAME: &str = "example one";

    fn calculator(x: i32, z: i32) -> Calculator {
        let mut calculator = Calculator::new(NAME, Spec { x, z });

        calculator.metadata.namespace = Some(NAMESPACE.to_string());
        calculator.metadata.uid = Some("a2c3e1f0-0000-4000-8000-000000000001".to_string());
        calculator.status = Some(Status::default());
        calculator
    }

    fn key() -> ObjectRef<Calculator> {
        ObjectRef::new(NAME).within(NAMESPACE)
    }

    async fn status(store: &Memory) -> Option<Status> {
        store
            .get::<Calculator>(NAMESPACE, NAME)
            .await
            .unwrap()
            .unwrap()
            .status
    }

    async fn result(store: &Memory) -> Option<String> {
        store
            .get::<Secret>(NAMESPACE, NAME)
            .await
            .unwrap()
            .and_then(|s| s.string_data)
            .and_then(|data| data.get(RESULT_KEY).cloned())
    }

    #[test]
    fn compute_sums_operands() {
        assert_eq!(
            Spec { x: 42, z: 34 }.compute(),
            Status {
                processed: true,
                result: 76
            }
        );
        assert_eq!(Spec { x: -5, z: 3 }.compute().result, -2);
        assert_eq!(Spec { x: 0, z: 0 }.compute().result, 0);
    }

    #[test]
    fn compute_wraps_on_overflow() {
        assert_eq!(Spec { x: i32::MAX, z: 1 }.compute().result, i32::MIN);
        assert_eq!(Spec { x: i32::MIN, z: -1 }.compute().result, i32::MAX);
    }

    #[test]
    fn secret_policy_names() {
        assert_eq!(
            serde_json::from_str::<SecretPolicy>(r#""overwrite""#).unwrap(),
            SecretPolicy::Overwrite
        );
        assert_eq!(SecretPolicy::default(), SecretPolicy::Create);
        assert_eq!(SecretPolicy::Skip.to_string(), "skip");
    }

    #[test]
    fn custom_resource_definition() {
        let crd = Calculator::crd();

        assert_eq!(crd.spec.group, "apps.sd01dev.com");
        assert_eq!(crd.spec.names.kind, "Calculator");
        assert_eq!(crd.spec.names.plural, "calculators");
        assert_eq!(crd.spec.scope, "Namespaced");
    }

    #[tokio::test]
    async fn reconcile_writes_status_and_secret() {
        let store = Memory::default().with(calculator(42, 34));

        reconcile(&store, SecretPolicy::Create, &key()).await.unwrap();

        assert_eq!(
            status(&store).await,
            Some(Status {
                processed: true,
                result: 76
            })
        );

        let s = store
            .get::<Secret>(NAMESPACE, NAME)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            s.metadata.annotations,
            Some(BTreeMap::from([(
                "managed-by".to_string(),
                "calc-operator".to_string()
            )]))
        );
        assert_eq!(
            s.string_data,
            Some(BTreeMap::from([("result".to_string(), "76".to_string())]))
        );
        assert_eq!(s.type_.as_deref(), Some("Opaque"));
        assert_eq!(s.metadata.owner_references, None);
        assert_eq!(
            secret::source_uid(&s),
            Some("a2c3e1f0-0000-4000-8000-000000000001")
        );
    }

    #[tokio::test]
    async fn reconcile_formats_zero_and_negative_sums() {
        for (x, z, expected) in [(0, 0, "0"), (-5, 3, "-2"), (-7, -8, "-15")] {
            let store = Memory::default().with(calculator(x, z));

            reconcile(&store, SecretPolicy::Create, &key()).await.unwrap();

            assert_eq!(status(&store).await.map(|s| s.result), x.checked_add(z));
            assert_eq!(result(&store).await.as_deref(), Some(expected));
        }
    }

    #[tokio::test]
    async fn reconcile_wraps_overflowing_sum() {
        let store = Memory::default().with(calculator(i32::MAX, 1));

        reconcile(&store, SecretPolicy::Create, &key()).await.unwrap();

        assert_eq!(
            status(&store).await,
            Some(Status {
                processed: true,
                result: i32::MIN
            })
        );
        assert_eq!(result(&store).await.as_deref(), Some("-2147483648"));
    }

    #[tokio::test]
    async fn second_reconcile_fails_on_existing_secret() {
        let store = Memory::default().with(calculator(42, 34));

        reconcile(&store, SecretPolicy::Create, &key()).await.unwrap();
        let first = status(&store).await;

        match reconcile(&store, SecretPolicy::Create, &key()).await {
            Err(ReconcilerError::SecretCreate(_, kube::Error::Api(err))) => {
                assert_eq!(err.code, 409);
                assert_eq!(err.reason, "AlreadyExists");
            }
            other => panic!("expected the secret creation to fail, got {other:?}"),
        }

        assert_eq!(status(&store).await, first);
        assert_eq!(result(&store).await.as_deref(), Some("76"));
    }

    #[tokio::test]
    async fn missing_resource_is_not_an_error() {
        let store = Memory::default().with(calculator(42, 34));

        let key = ObjectRef::new(NAME).within("none");
        reconcile(&store, SecretPolicy::Create, &key).await.unwrap();

        let key = ObjectRef::new("other").within(NAMESPACE);
        reconcile(&store, SecretPolicy::Create, &key).await.unwrap();

        assert_eq!(store.count::<Secret>(), 0);
        assert_eq!(status(&store).await, Some(Status::default()));
    }

    #[tokio::test]
    async fn key_without_namespace_is_rejected() {
        let store = Memory::default().with(calculator(1, 2));

        assert!(matches!(
            reconcile(&store, SecretPolicy::Create, &ObjectRef::new(NAME)).await,
            Err(ReconcilerError::MissingNamespace(_))
        ));
    }

    #[tokio::test]
    async fn fetch_failure_is_propagated() {
        let store = Memory::default()
            .with(calculator(42, 34))
            .failing(Verb::Get);

        assert!(matches!(
            reconcile(&store, SecretPolicy::Create, &key()).await,
            Err(ReconcilerError::Fetch(_, _))
        ));
        assert_eq!(store.count::<Secret>(), 0);
    }

    #[tokio::test]
    async fn status_failure_skips_secret() {
        let store = Memory::default()
            .with(calculator(42, 34))
            .failing(Verb::PatchStatus);

        assert!(matches!(
            reconcile(&store, SecretPolicy::Create, &key()).await,
            Err(ReconcilerError::StatusWrite(_, _))
        ));
        assert_eq!(store.count::<Secret>(), 0);
    }

    #[tokio::test]
    async fn status_patch_does_not_touch_spec() {
        let store = Memory::default().with(calculator(2, 3));

        reconcile(&store, SecretPolicy::Create, &key()).await.unwrap();

        let calculator = store
            .get::<Calculator>(NAMESPACE, NAME)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(calculator.spec, Spec { x: 2, z: 3 });
    }

    #[tokio::test]
    async fn overwrite_policy_updates_existing_secret() {
        let stale = secret::new(
            &calculator(0, 1),
            BTreeMap::from([(RESULT_KEY.to_string(), "1".to_string())]),
        );
        let store = Memory::default().with(calculator(3, 4)).with(stale);

        reconcile(&store, SecretPolicy::Overwrite, &key())
            .await
            .unwrap();
        assert_eq!(result(&store).await.as_deref(), Some("7"));

        reconcile(&store, SecretPolicy::Overwrite, &key())
            .await
            .unwrap();
        assert_eq!(result(&store).await.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn overwrite_policy_creates_missing_secret() {
        let store = Memory::default().with(calculator(3, 4));

        reconcile(&store, SecretPolicy::Overwrite, &key())
            .await
            .unwrap();
        assert_eq!(result(&store).await.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn skip_policy_leaves_existing_secret() {
        let stale = secret::new(
            &calculator(0, 1),
            BTreeMap::from([(RESULT_KEY.to_string(), "1".to_string())]),
        );
        let store = Memory::default().with(calculator(3, 4)).with(stale);

        reconcile(&store, SecretPolicy::Skip, &key()).await.unwrap();

        assert_eq!(status(&store).await.map(|s| s.result), Some(7));
        assert_eq!(result(&store).await.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn create_policy_keeps_status_when_secret_exists() {
        let stale = secret::new(
            &calculator(0, 1),
            BTreeMap::from([(RESULT_KEY.to_string(), "1".to_string())]),
        );
        let store = Memory::default().with(calculator(3, 4)).with(stale);

        assert!(matches!(
            reconcile(&store, SecretPolicy::Create, &key()).await,
            Err(ReconcilerError::SecretCreate(_, _))
        ));
        assert_eq!(status(&store).await.map(|s| s.result), Some(7));
        assert_eq!(result(&store).await.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn garbage_collect_removes_orphaned_secrets() {
        let mut recreated = calculator(1, 1);
        recreated.metadata.name = Some("recreated".to_string());
        let stale = secret::new(&recreated, BTreeMap::new());
        recreated.metadata.uid = Some("b7d1e2f0-0000-4000-8000-000000000002".to_string());

        let mut deleted = calculator(1, 1);
        deleted.metadata.name = Some("deleted".to_string());

        let mut foreign = secret::new(&deleted, BTreeMap::new());
        foreign.metadata.name = Some("foreign".to_string());
        foreign.metadata.labels = None;

        let store = Memory::default()
            .with(calculator(1, 1))
            .with(secret::new(&calculator(1, 1), BTreeMap::new()))
            .with(recreated)
            .with(stale)
            .with(secret::new(&deleted, BTreeMap::new()))
            .with(foreign);

        let collected = garbage_collect(&store, true).await.unwrap();
        assert_eq!(
            collected,
            vec![
                (NAMESPACE.to_string(), "deleted".to_string()),
                (NAMESPACE.to_string(), "recreated".to_string()),
            ]
        );
        assert_eq!(store.count::<Secret>(), 4);

        let collected = garbage_collect(&store, false).await.unwrap();
        assert_eq!(collected.len(), 2);
        assert_eq!(store.count::<Secret>(), 2);
        assert!(store
            .get::<Secret>(NAMESPACE, NAME)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get::<Secret>(NAMESPACE, "foreign")
            .await
            .unwrap()
            .is_some());
    }
}
