//! OpenShift Service Mesh (Maistra) resources.

use crate::istio::MeshConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The name of the member object that enrolls a namespace into a control
/// plane. Maistra only honors members with this name.
pub const MEMBER_NAME: &str = "default";

#[derive(Clone, Debug, PartialEq, kube::CustomResource, Deserialize, Serialize)]
#[kube(
    group = "maistra.io",
    version = "v2",
    kind = "ServiceMeshControlPlane",
    schema = "disabled",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMeshControlPlaneSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tech_preview: Option<TechPreview>,

    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TechPreview {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_config: Option<MeshConfig>,

    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

/// Enrolls the namespace it lives in into a control plane.
#[derive(Clone, Debug, PartialEq, kube::CustomResource, Deserialize, Serialize)]
#[kube(
    group = "maistra.io",
    version = "v1",
    kind = "ServiceMeshMember",
    schema = "disabled",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMeshMemberSpec {
    pub control_plane_ref: ControlPlaneRef,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ControlPlaneRef {
    pub name: String,
    pub namespace: String,
}
