#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod artifact;
pub mod authorizer;
pub mod grant;
mod pass;

pub use self::{
    artifact::{synthesize, NamespaceResolutionError},
    pass::{GatewayClassification, GatewayInfo, OverlappingClassification, Pass, RouteInfo, Target},
};
use authpolicy_controller_k8s_api::{Resource, ResourceExt};

/// The name of the external authorization service.
pub const AUTHORIZER_SERVICE: &str = "authorino-authorino-authorization";

/// The gRPC port on which the authorizer serves external authorization checks.
pub const AUTHORIZER_PORT: u16 = 50051;

/// The name under which the authorizer is registered as a mesh extension
/// provider.
pub const AUTHORIZER_PROVIDER: &str = "kuadrant-authorization";

/// The name of the grant allowing artifacts to reference the authorizer.
pub const GRANT_NAME: &str = "kuadrant-authorization-rg";

/// Identifies a namespaced resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
}

/// The computed state of an object the controller manages.
///
/// An absent object is a tombstone: it carries the identity of an object
/// that should be deleted if it exists.
#[derive(Clone, Debug, PartialEq)]
pub enum Desired<T> {
    Present(T),
    Absent(T),
}

// === impl ResourceId ===

impl ResourceId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of<K: Resource>(obj: &K) -> Self {
        Self::new(obj.namespace().unwrap_or_default(), obj.name_any())
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === impl Desired ===

impl<T> Desired<T> {
    pub fn object(&self) -> &T {
        match self {
            Self::Present(obj) | Self::Absent(obj) => obj,
        }
    }

    pub fn into_object(self) -> T {
        match self {
            Self::Present(obj) | Self::Absent(obj) => obj,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent(_))
    }
}
