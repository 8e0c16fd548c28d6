//! Istio mesh configuration resources.
//!
//! Istio may be installed through the `IstioOperator` install spec or the Sail
//! operator's `Istio` resource; either way the effective mesh configuration may
//! also be mirrored into the `istio` ConfigMap. Only the extension provider list
//! is modeled. All other fields are preserved.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The ConfigMap key holding the YAML-encoded mesh configuration.
pub const MESH_CONFIG_KEY: &str = "mesh";

#[derive(Clone, Debug, PartialEq, kube::CustomResource, Deserialize, Serialize)]
#[kube(
    group = "install.istio.io",
    version = "v1alpha1",
    kind = "IstioOperator",
    schema = "disabled",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct IstioOperatorSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_config: Option<MeshConfig>,

    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

/// The Sail operator's control plane resource. It is cluster-scoped.
#[derive(Clone, Debug, PartialEq, kube::CustomResource, Deserialize, Serialize)]
#[kube(
    group = "operator.istio.io",
    version = "v1alpha1",
    kind = "Istio",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct IstioSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<IstioValues>,

    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IstioValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_config: Option<MeshConfig>,

    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_providers: Option<Vec<ExtensionProvider>>,

    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

/// A named extension provider. Providers other than gRPC external
/// authorization are kept in `other`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionProvider {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envoy_ext_authz_grpc: Option<EnvoyExtAuthzGrpc>,

    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvoyExtAuthzGrpc {
    pub service: String,
    pub port: u32,

    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

impl MeshConfig {
    pub fn extension_providers(&self) -> &[ExtensionProvider] {
        self.extension_providers.as_deref().unwrap_or_default()
    }

    /// Parses the YAML mesh document stored in the `istio` ConfigMap.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
