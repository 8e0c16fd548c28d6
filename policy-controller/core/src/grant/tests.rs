use super::*;
use crate::artifact::authorizer_backend;
use authpolicy_controller_k8s_api::{
    envoy_gateway::{ExtAuth, GrpcExtAuthService, SecurityPolicySpec},
    policy::PolicyTargetRef,
};
use pretty_assertions::assert_eq;

fn artifact(ns: &str, authorizer_ns: &str) -> SecurityPolicy {
    SecurityPolicy {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some("on-gw".to_string()),
            ..ObjectMeta::default()
        },
        spec: SecurityPolicySpec {
            target_ref: PolicyTargetRef {
                group: "gateway.networking.k8s.io".to_string(),
                kind: "Gateway".to_string(),
                name: "gw".to_string(),
                namespace: None,
                section_name: None,
            },
            ext_auth: Some(ExtAuth {
                grpc: Some(GrpcExtAuthService {
                    backend_ref: authorizer_backend(authorizer_ns),
                    other: Default::default(),
                }),
                other: Default::default(),
            }),
            other: Default::default(),
        },
    }
}

fn grant(namespaces: &[&str]) -> ReferenceGrant {
    desired(
        "kuadrant-system",
        namespaces.iter().map(|ns| ns.to_string()).collect(),
    )
    .into_object()
}

fn namespaces(grant: &ReferenceGrant) -> Vec<&str> {
    grant.spec.from.iter().map(|e| e.namespace.as_str()).collect()
}

#[test]
fn aggregates_distinct_namespaces() {
    let artifacts = [
        artifact("a", "kuadrant-system"),
        artifact("b", "kuadrant-system"),
        artifact("a", "kuadrant-system"),
        artifact("c", "other-system"),
    ];
    let desired = aggregate("kuadrant-system", &artifacts);
    assert!(!desired.is_absent());

    let grant = desired.object();
    assert_eq!(grant.metadata.name.as_deref(), Some("kuadrant-authorization-rg"));
    assert_eq!(grant.metadata.namespace.as_deref(), Some("kuadrant-system"));
    assert_eq!(namespaces(grant), ["a", "b"]);
    for entry in &grant.spec.from {
        assert_eq!(entry.group, "gateway.envoyproxy.io");
        assert_eq!(entry.kind, "SecurityPolicy");
    }
    assert_eq!(grant.spec.to.len(), 1);
    assert_eq!(grant.spec.to[0].group, "");
    assert_eq!(grant.spec.to[0].kind, "Service");
    assert_eq!(
        grant.spec.to[0].name.as_deref(),
        Some("authorino-authorino-authorization")
    );
}

#[test]
fn same_namespace_is_suppressed() {
    let artifacts = [artifact("kuadrant-system", "kuadrant-system")];
    let desired = aggregate("kuadrant-system", &artifacts);
    assert!(desired.is_absent());

    let mixed = [
        artifact("kuadrant-system", "kuadrant-system"),
        artifact("apps", "kuadrant-system"),
    ];
    assert_eq!(namespaces(aggregate("kuadrant-system", &mixed).object()), ["apps"]);
}

#[test]
fn deleting_artifacts_are_ignored() {
    let mut deleting = artifact("apps", "kuadrant-system");
    deleting.metadata.deletion_timestamp =
        Some(serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).unwrap());
    assert!(aggregate("kuadrant-system", [&deleting]).is_absent());
}

#[test]
fn additive_merge_preserves_live_entries() {
    let mut live = grant(&["a", "b"]);
    let desired = grant(&["b", "c"]);
    assert!(merge_additive(&mut live, &desired));
    assert_eq!(namespaces(&live), ["a", "b", "c"]);

    assert!(!merge_additive(&mut live, &desired), "merge must be idempotent");
}

#[test]
fn additive_merge_suppresses_duplicates() {
    let mut live = grant(&["a"]);
    live.spec.from.push(live.spec.from[0].clone());
    assert!(merge_additive(&mut live, &grant(&["a"])));
    assert_eq!(namespaces(&live), ["a"]);
}

#[test]
fn merge_overwrites_to() {
    let mut live = grant(&["a"]);
    live.spec.to[0].name = Some("stale".to_string());
    assert!(merge_additive(&mut live, &grant(&["a"])));
    assert_eq!(
        live.spec.to[0].name.as_deref(),
        Some("authorino-authorino-authorization")
    );
}

#[test]
fn prune_merge_removes_stale_artifact_entries_only() {
    let mut live = grant(&["a", "b"]);
    live.spec.from.push(ReferenceGrantFrom {
        group: "gateway.networking.k8s.io".to_string(),
        kind: "HTTPRoute".to_string(),
        namespace: "a".to_string(),
    });
    assert!(merge_prune(&mut live, &grant(&["b", "c"])));
    assert_eq!(namespaces(&live), ["b", "a", "c"]);
    assert_eq!(live.spec.from[1].kind, "HTTPRoute");
    let artifact_namespaces = live
        .spec
        .from
        .iter()
        .filter(|e| e.kind == "SecurityPolicy")
        .map(|e| e.namespace.as_str())
        .collect::<Vec<_>>();
    assert_eq!(artifact_namespaces, ["b", "c"]);
    assert!(!merge_prune(&mut live, &grant(&["b", "c"])));
}
