use crate::{labels::Selector, FIELD_MANAGER};
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams, Preconditions},
    Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

/// Builds an [`Api`] handle appropriate to a resource's scope.
pub trait ApiScope: Sized {
    fn api<K>(client: Client, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = Self, DynamicType = ()>;
}

/// A statically-typed cluster resource that the controller reads or writes.
pub trait Object:
    Resource<DynamicType = (), Scope: ApiScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

/// The cluster operations used by the controller.
///
/// NotFound and AlreadyExists responses are folded into the return values;
/// every other API error is surfaced unchanged.
#[async_trait::async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    async fn get<K: Object>(&self, namespace: Option<&str>, name: &str)
        -> Result<Option<K>, kube::Error>;

    /// Lists objects matching `selector`, across all namespaces when
    /// `namespace` is `None`.
    async fn list<K: Object>(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<K>, kube::Error>;

    /// Creates an object, returning `None` if it already exists.
    async fn create<K: Object>(&self, obj: &K) -> Result<Option<K>, kube::Error>;

    /// Replaces an object. The object's resource version is sent along, so a
    /// concurrent update fails with a conflict.
    async fn replace<K: Object>(&self, obj: &K) -> Result<K, kube::Error>;

    /// Deletes an object, returning `false` if it did not exist. When a
    /// resource version is given, the deletion only succeeds if the live
    /// object still has it.
    async fn delete<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<bool, kube::Error>;

    /// Indicates whether the API server serves the resource type.
    async fn kind_installed<K: Object>(&self) -> Result<bool, kube::Error>;
}

/// Returns true if the error is an API response with the given status code.
pub fn is_status(error: &kube::Error, code: u16) -> bool {
    matches!(error, kube::Error::Api(e) if e.code == code)
}

pub fn is_conflict(error: &kube::Error) -> bool {
    is_status(error, 409)
}

// === impl Object ===

impl<K> Object for K where
    K: Resource<DynamicType = (), Scope: ApiScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

// === impl ApiScope ===

impl ApiScope for NamespaceResourceScope {
    fn api<K>(client: Client, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = Self, DynamicType = ()>,
    {
        match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        }
    }
}

impl ApiScope for ClusterResourceScope {
    fn api<K>(client: Client, _: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = Self, DynamicType = ()>,
    {
        Api::all(client)
    }
}

fn api<K: Object>(client: &Client, namespace: Option<&str>) -> Api<K> {
    <K::Scope as ApiScope>::api(client.clone(), namespace)
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..PostParams::default()
    }
}

// === impl Client ===

#[async_trait::async_trait]
impl Store for Client {
    async fn get<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<K>, kube::Error> {
        api::<K>(self, namespace).get_opt(name).await
    }

    async fn list<K: Object>(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<K>, kube::Error> {
        let params = if selector.is_empty() {
            ListParams::default()
        } else {
            ListParams::default().labels(&selector.to_string())
        };
        let list = api::<K>(self, namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<Option<K>, kube::Error> {
        let api = api::<K>(self, obj.meta().namespace.as_deref());
        match api.create(&post_params(), obj).await {
            Ok(created) => Ok(Some(created)),
            Err(error) if is_conflict(&error) => {
                tracing::debug!(kind = %K::kind(&()), name = %obj.name_any(), "Already exists");
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    async fn replace<K: Object>(&self, obj: &K) -> Result<K, kube::Error> {
        let api = api::<K>(self, obj.meta().namespace.as_deref());
        api.replace(&obj.name_any(), &post_params(), obj).await
    }

    async fn delete<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<bool, kube::Error> {
        let params = DeleteParams {
            preconditions: resource_version.map(|rv| Preconditions {
                resource_version: Some(rv.to_string()),
                uid: None,
            }),
            ..DeleteParams::background()
        };
        match api::<K>(self, namespace).delete(name, &params).await {
            Ok(_) => Ok(true),
            Err(error) if is_status(&error, 404) => Ok(false),
            Err(error) => Err(error),
        }
    }

    async fn kind_installed<K: Object>(&self) -> Result<bool, kube::Error> {
        if K::group(&()).is_empty() {
            return Ok(true);
        }
        let kind = K::kind(&());
        match self.list_api_group_resources(&K::api_version(&())).await {
            Ok(list) => Ok(list.resources.iter().any(|r| r.kind == kind)),
            Err(error) if is_status(&error, 404) => Ok(false),
            Err(error) => Err(error),
        }
    }
}
