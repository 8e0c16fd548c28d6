use super::PolicyTargetRef;
use std::collections::BTreeMap;

/// AuthPolicy attaches an external authorization requirement to a Gateway
/// or an HTTPRoute.
///
/// Only the target reference is interpreted by the controller; the
/// authorization rules themselves are evaluated by the authorizer and are
/// carried opaquely.
#[derive(
    Clone, Debug, PartialEq, kube::CustomResource, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[kube(
    group = "kuadrant.io",
    version = "v1beta2",
    kind = "AuthPolicy",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AuthPolicySpec {
    pub target_ref: PolicyTargetRef,

    #[serde(flatten)]
    pub rules: BTreeMap<String, serde_json::Value>,
}

impl AuthPolicy {
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
