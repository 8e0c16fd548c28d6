//! Envoy Gateway resources.
//!
//! Only the fields written by the controller are modeled; everything else is
//! preserved through the flattened `other` maps so that updates made by other
//! writers survive a read-modify-write cycle.

use crate::policy::PolicyTargetRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const API_GROUP: &str = "gateway.envoyproxy.io";

/// SecurityPolicy configures authentication and authorization for the
/// Gateway or route it targets.
#[derive(Clone, Debug, PartialEq, kube::CustomResource, Deserialize, Serialize)]
#[kube(
    group = "gateway.envoyproxy.io",
    version = "v1alpha1",
    kind = "SecurityPolicy",
    derive = "PartialEq",
    schema = "disabled",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicySpec {
    pub target_ref: PolicyTargetRef,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext_auth: Option<ExtAuth>,

    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

/// Defines the external authorization service used by a SecurityPolicy.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grpc: Option<GrpcExtAuthService>,

    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcExtAuthService {
    pub backend_ref: BackendObjectReference,

    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendObjectReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl SecurityPolicy {
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Returns the namespace of the authorizer this policy points at, as
    /// recorded in its backend reference.
    pub fn authorizer_namespace(&self) -> Option<&str> {
        self.spec
            .ext_auth
            .as_ref()?
            .grpc
            .as_ref()?
            .backend_ref
            .namespace
            .as_deref()
    }
}
