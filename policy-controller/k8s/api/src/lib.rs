#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod envoy_gateway;
pub mod istio;
pub mod labels;
pub mod maistra;
pub mod policy;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use self::{
    envoy_gateway::SecurityPolicy,
    labels::Selector,
    store::{Object, Store},
};
pub use k8s_openapi::{
    api::core::v1::ConfigMap,
    apimachinery::pkg::apis::meta::v1::{OwnerReference, Time},
};
pub use kube::{
    api::ObjectMeta,
    runtime::watcher,
    Client, Error, Resource, ResourceExt,
};

/// Gateway API resources consumed and produced by the controller.
pub mod gateway {
    pub use gateway_api::apis::standard::{
        gateways::{Gateway, GatewaySpec},
        httproutes::{
            HTTPRoute, HTTPRouteParentRefs, HTTPRouteSpec, HTTPRouteStatus, HTTPRouteStatusParents,
        },
        referencegrants::{ReferenceGrant, ReferenceGrantFrom, ReferenceGrantSpec, ReferenceGrantTo},
    };
}

/// The field manager recorded on every write made by the controller.
pub const FIELD_MANAGER: &str = "authpolicy-controller";
