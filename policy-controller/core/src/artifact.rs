//! Synthesizes the enforcement artifact for a (policy, gateway) pair.

use crate::{Desired, GatewayInfo, ResourceId, RouteInfo, Target, AUTHORIZER_PORT, AUTHORIZER_SERVICE};
use authpolicy_controller_k8s_api::{
    envoy_gateway::{BackendObjectReference, ExtAuth, GrpcExtAuthService, SecurityPolicySpec},
    labels::{self, Map},
    policy::{AuthPolicy, PolicyTargetRef},
    ObjectMeta, ResourceExt, SecurityPolicy,
};
use sha2::{Digest, Sha256};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error(
    "cannot resolve the authorizer namespace of AuthPolicy {policy}: \
     neither the policy nor gateway {gateway} set {}",
    labels::KUADRANT_NAMESPACE
)]
pub struct NamespaceResolutionError {
    pub policy: ResourceId,
    pub gateway: ResourceId,
}

/// Computes the desired `SecurityPolicy` enforcing `policy` at `gateway`.
///
/// The artifact's identity depends only on the inputs, so repeated synthesis
/// always addresses the same object. The artifact is a tombstone when the
/// policy is being deleted, when a gateway-level policy would no longer
/// govern any route, or when a route-level policy is superseded by a policy
/// on the route's gateway.
pub fn synthesize(
    policy: &AuthPolicy,
    target: &Target,
    gateway: &GatewayInfo,
) -> Result<Desired<SecurityPolicy>, NamespaceResolutionError> {
    let policy_id = ResourceId::of(policy);
    let authorizer_ns = authorizer_namespace(policy, gateway)?;
    let target_ref = &policy.spec.target_ref;

    let (name, routes) = match target {
        Target::Gateway { routes } => (
            format!("on-{}", target_ref.name),
            routes.iter().filter(|r| r.policy.is_none()).collect::<Vec<_>>(),
        ),
        Target::Route(route) => (
            format!("on-{}-{}", target_ref.name, pair_hash(&gateway.id, target_ref)),
            vec![route],
        ),
    };

    let artifact = SecurityPolicy {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(target_ref.namespace_or(&policy_id.namespace).to_string()),
            labels: Some(artifact_labels(&policy_id, &gateway.id, &authorizer_ns)),
            annotations: Some(
                std::iter::once((labels::ROUTES.to_string(), route_list(&routes))).collect(),
            ),
            ..ObjectMeta::default()
        },
        spec: SecurityPolicySpec {
            target_ref: PolicyTargetRef {
                section_name: None,
                ..target_ref.clone()
            },
            ext_auth: Some(ExtAuth {
                grpc: Some(GrpcExtAuthService {
                    backend_ref: authorizer_backend(&authorizer_ns),
                    other: Default::default(),
                }),
                other: Default::default(),
            }),
            other: Default::default(),
        },
    };

    if policy.is_deleting() {
        return Ok(Desired::Absent(artifact));
    }

    let needed = match target {
        Target::Gateway { .. } => routes.iter().map(|r| r.effective_rules()).sum::<usize>() > 0,
        Target::Route(_) => gateway.policy.is_none(),
    };
    if needed {
        Ok(Desired::Present(artifact))
    } else {
        Ok(Desired::Absent(artifact))
    }
}

/// Resolves the control plane namespace that hosts the authorizer for a
/// policy.
///
/// An explicit annotation on the policy wins; otherwise the namespace is
/// taken from the gateway at the end of the policy's target chain.
pub fn authorizer_namespace(
    policy: &AuthPolicy,
    gateway: &GatewayInfo,
) -> Result<String, NamespaceResolutionError> {
    let annotated = policy
        .annotations()
        .get(labels::KUADRANT_NAMESPACE)
        .filter(|ns| !ns.is_empty());
    if let Some(ns) = annotated {
        return Ok(ns.clone());
    }
    gateway
        .authorizer_namespace
        .clone()
        .filter(|ns| !ns.is_empty())
        .ok_or_else(|| NamespaceResolutionError {
            policy: ResourceId::of(policy),
            gateway: gateway.id.clone(),
        })
}

/// The backend reference through which artifacts reach the authorizer.
pub fn authorizer_backend(authorizer_ns: &str) -> BackendObjectReference {
    BackendObjectReference {
        group: None,
        kind: None,
        name: AUTHORIZER_SERVICE.to_string(),
        namespace: Some(authorizer_ns.to_string()),
        port: Some(AUTHORIZER_PORT),
    }
}

fn artifact_labels(policy: &ResourceId, gateway: &ResourceId, authorizer_ns: &str) -> Map {
    let mut map = Map::new();
    map.insert(labels::KUADRANT_NAMESPACE.to_string(), authorizer_ns.to_string());
    map.insert(labels::AUTH_POLICY.to_string(), policy.name.clone());
    map.insert(labels::AUTH_POLICY_NAMESPACE.to_string(), policy.namespace.clone());
    map.insert(labels::GATEWAY.to_string(), gateway.name.clone());
    map.insert(labels::GATEWAY_NAMESPACE.to_string(), gateway.namespace.clone());
    map
}

fn route_list(routes: &[&RouteInfo]) -> String {
    let mut ids = routes.iter().map(|r| r.id.to_string()).collect::<Vec<_>>();
    ids.sort();
    ids.dedup();
    ids.join(",")
}

/// Returns 8 hex characters identifying a (gateway, target) pair.
fn pair_hash(gateway: &ResourceId, target: &PolicyTargetRef) -> String {
    let mut hasher = Sha256::new();
    hasher.update(gateway.namespace.as_bytes());
    hasher.update(b"/");
    hasher.update(gateway.name.as_bytes());
    hasher.update(b"\n");
    hasher.update(target.canonical_kind().as_bytes());
    hasher.update(b"/");
    hasher.update(target.namespace.as_deref().unwrap_or_default().as_bytes());
    hasher.update(b"/");
    hasher.update(target.name.as_bytes());
    hasher.finalize()[..4]
        .iter()
        .fold(String::with_capacity(8), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{b:02x}");
            s
        })
}
