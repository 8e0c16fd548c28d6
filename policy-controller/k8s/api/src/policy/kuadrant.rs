use std::collections::BTreeMap;

/// Kuadrant represents an installation of the control plane in a namespace.
///
/// Its namespace is where the authorizer service runs.
#[derive(
    Clone, Debug, Default, kube::CustomResource, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[kube(
    group = "kuadrant.io",
    version = "v1beta1",
    kind = "Kuadrant",
    namespaced
)]
pub struct KuadrantSpec {
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}
