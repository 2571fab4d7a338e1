//! # Store module
//!
//! This module provide the [`Store`] trait which abstracts requests made to the
//! kubernetes api server, so that reconcilers receive their backend as an
//! explicit dependency instead of building it themselves.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{DeleteParams, ListParams, Patch, PatchParams, PostParams},
    Api, Client, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

// -----------------------------------------------------------------------------
// Object trait

/// namespaced kubernetes resource which could be handled by a [`Store`]
pub trait Object:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + DeserializeOwned
    + Serialize
    + Clone
    + Debug
    + Send
    + Sync
    + 'static
{
}

/// Blanket implementation of [`Object`]
impl<T> Object for T where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + DeserializeOwned
        + Serialize
        + Clone
        + Debug
        + Send
        + Sync
        + 'static
{
}

// -----------------------------------------------------------------------------
// Store trait

#[async_trait]
pub trait Store: Send + Sync {
    /// returns the object, or none if the api server answers that it does not exist
    async fn get<T: Object>(&self, namespace: &str, name: &str) -> Result<Option<T>, kube::Error>;

    /// create the object, fails if an object with the same name already exists
    async fn create<T: Object>(&self, obj: &T) -> Result<T, kube::Error>;

    /// apply the json patch on the object
    async fn patch<T: Object>(
        &self,
        namespace: &str,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<T, kube::Error>;

    /// apply the json patch on the status sub-resource of the object
    async fn patch_status<T: Object>(
        &self,
        namespace: &str,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<T, kube::Error>;

    /// list objects matching the label selector in the namespace, or in all
    /// namespaces if none is given
    async fn list<T: Object>(
        &self,
        namespace: Option<&str>,
        selector: &str,
    ) -> Result<Vec<T>, kube::Error>;

    async fn delete<T: Object>(&self, namespace: &str, name: &str) -> Result<(), kube::Error>;
}

// -----------------------------------------------------------------------------
// Kubernetes structure

/// [`Store`] backed by the kubernetes api server
#[derive(Clone)]
pub struct Kubernetes {
    client: Client,
}

impl From<Client> for Kubernetes {
    fn from(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Store for Kubernetes {
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    async fn get<T: Object>(&self, namespace: &str, name: &str) -> Result<Option<T>, kube::Error> {
        debug!(
            kind = %T::kind(&()),
            namespace = namespace,
            name = name,
            "execute a request to retrieve resource"
        );
        Api::<T>::namespaced(self.client.to_owned(), namespace)
            .get_opt(name)
            .await
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    async fn create<T: Object>(&self, obj: &T) -> Result<T, kube::Error> {
        let namespace = obj.meta().namespace.to_owned().unwrap_or_default();

        debug!(
            kind = %T::kind(&()),
            namespace = namespace.as_str(),
            name = ?obj.meta().name,
            "execute a request to create resource"
        );
        Api::<T>::namespaced(self.client.to_owned(), &namespace)
            .create(&PostParams::default(), obj)
            .await
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    async fn patch<T: Object>(
        &self,
        namespace: &str,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<T, kube::Error> {
        debug!(
            kind = %T::kind(&()),
            namespace = namespace,
            name = name,
            "execute a patch request on resource"
        );
        Api::<T>::namespaced(self.client.to_owned(), namespace)
            .patch(name, &PatchParams::default(), &Patch::Json::<T>(patch))
            .await
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    async fn patch_status<T: Object>(
        &self,
        namespace: &str,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<T, kube::Error> {
        debug!(
            kind = %T::kind(&()),
            namespace = namespace,
            name = name,
            "execute a patch request on resource's status"
        );
        Api::<T>::namespaced(self.client.to_owned(), namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Json::<T>(patch))
            .await
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    async fn list<T: Object>(
        &self,
        namespace: Option<&str>,
        selector: &str,
    ) -> Result<Vec<T>, kube::Error> {
        let api = match namespace {
            Some(namespace) => Api::<T>::namespaced(self.client.to_owned(), namespace),
            None => Api::<T>::all(self.client.to_owned()),
        };

        debug!(
            kind = %T::kind(&()),
            selector = selector,
            "execute a request to list resources"
        );
        Ok(api.list(&ListParams::default().labels(selector)).await?.items)
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    async fn delete<T: Object>(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        debug!(
            kind = %T::kind(&()),
            namespace = namespace,
            name = name,
            "execute a request to delete resource"
        );
        Api::<T>::namespaced(self.client.to_owned(), namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
    }
}

// -----------------------------------------------------------------------------
// Memory structure
