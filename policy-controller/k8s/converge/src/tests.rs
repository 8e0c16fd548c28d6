use crate::{converge, Controller, ControllerMetrics, Error};
use authpolicy_controller_core::{
    GatewayClassification, GatewayInfo, Pass, ResourceId, RouteInfo, Target, GRANT_NAME,
};
use authpolicy_controller_k8s_api::{
    gateway::ReferenceGrant,
    policy::{AuthPolicy, AuthPolicySpec, PolicyTargetRef},
    labels::Selector,
    testing::{FakeStore, Verb},
    Object, ObjectMeta, SecurityPolicy, Store,
};
use parking_lot::Mutex;
use maplit::btreemap;
use pretty_assertions::assert_eq;
use std::{collections::BTreeSet, sync::Arc, time::Duration};
use tokio::sync::mpsc;

const AUTHORIZER_NS: &str = "kuadrant-system";

fn policy(ns: &str, name: &str, kind: &str, target: &str) -> Arc<AuthPolicy> {
    Arc::new(AuthPolicy {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            ..ObjectMeta::default()
        },
        spec: AuthPolicySpec {
            target_ref: PolicyTargetRef {
                group: "gateway.networking.k8s.io".to_string(),
                kind: kind.to_string(),
                name: target.to_string(),
                namespace: None,
                section_name: None,
            },
            rules: Default::default(),
        },
    })
}

fn gateway(ns: &str, name: &str) -> GatewayInfo {
    GatewayInfo {
        id: ResourceId::new(ns, name),
        policy: None,
        authorizer_namespace: Some(AUTHORIZER_NS.to_string()),
    }
}

fn route(ns: &str, name: &str, policy: Option<&str>) -> RouteInfo {
    RouteInfo {
        id: ResourceId::new(ns, name),
        policy: policy.map(|p| ResourceId::new(ns, p)),
        rules: 1,
        parents: vec![ResourceId::new(ns, "gw")],
    }
}

fn pass(
    policy: Arc<AuthPolicy>,
    target: Option<Target>,
    valid: Vec<GatewayInfo>,
    missing: Vec<GatewayInfo>,
    invalid: Vec<ResourceId>,
) -> Pass {
    Pass {
        policy,
        target,
        gateways: GatewayClassification::new(valid, missing, invalid).unwrap(),
        generation: 1,
    }
}

/// A pass for a gateway-level policy `ap` on `<ns>/gw` with one route.
pub(crate) fn gateway_pass(ns: &str, missing: bool) -> Pass {
    let target = Target::Gateway {
        routes: vec![route(ns, "r1", None)],
    };
    let (valid, missing) = if missing {
        (vec![], vec![gateway(ns, "gw")])
    } else {
        (vec![gateway(ns, "gw")], vec![])
    };
    pass(policy(ns, "ap", "Gateway", "gw"), Some(target), valid, missing, vec![])
}

pub(crate) fn deleted_pass(ns: &str) -> Pass {
    pass(
        policy(ns, "ap", "Gateway", "gw"),
        None,
        vec![],
        vec![],
        vec![ResourceId::new(ns, "gw")],
    )
}

fn grant_namespaces(store: &FakeStore) -> Option<Vec<String>> {
    store
        .get_object::<ReferenceGrant>(Some(AUTHORIZER_NS), GRANT_NAME)
        .map(|g| g.spec.from.into_iter().map(|f| f.namespace).collect())
}

fn ids(ids: &[(&str, &str)]) -> BTreeSet<ResourceId> {
    ids.iter().map(|(ns, name)| ResourceId::new(*ns, *name)).collect()
}

pub(crate) fn metrics() -> ControllerMetrics {
    ControllerMetrics::register(&mut Default::default())
}

#[tokio::test(flavor = "current_thread")]
async fn end_to_end() {
    let store = FakeStore::default();

    // P targets gateway G; R2 has its own policy Q, so only R1 is covered.
    let target = Target::Gateway {
        routes: vec![route("apps", "r1", None), route("apps", "r2", Some("q"))],
    };
    let p = pass(
        policy("apps", "p", "Gateway", "gw"),
        Some(target),
        vec![],
        vec![gateway("apps", "gw")],
        vec![],
    );
    let report = converge(&store, &p).await.unwrap();
    assert_eq!(
        report.artifacts("created"),
        ids(&[("apps", "on-gw")])
    );

    let artifacts = store.objects::<SecurityPolicy>();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(
        artifacts[0].metadata.annotations,
        Some(btreemap! { "kuadrant.io/routes".to_string() => "apps/r1".to_string() })
    );
    assert_eq!(grant_namespaces(&store), Some(vec!["apps".to_string()]));

    // Q's artifact for R2 lives alongside and must survive P's deletion.
    let q_target = Target::Route(route("apps", "r2", Some("q")));
    let q = pass(
        policy("apps", "q", "HTTPRoute", "r2"),
        Some(q_target),
        vec![],
        vec![gateway("gateways", "other-gw")],
        vec![],
    );
    converge(&store, &q).await.unwrap();
    assert_eq!(store.objects::<SecurityPolicy>().len(), 2);

    // Deleting P sweeps its artifact; the grant still admits `apps` for Q.
    let deleted = pass(
        policy("apps", "p", "Gateway", "gw"),
        None,
        vec![],
        vec![],
        vec![ResourceId::new("apps", "gw")],
    );
    let report = converge(&store, &deleted).await.unwrap();
    assert_eq!(
        report.artifacts("deleted"),
        ids(&[("apps", "on-gw")])
    );
    let remaining = store.objects::<SecurityPolicy>();
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].metadata.name.as_deref().unwrap().starts_with("on-r2-"));
    assert_eq!(grant_namespaces(&store), Some(vec!["apps".to_string()]));
}

#[tokio::test(flavor = "current_thread")]
async fn deleting_last_artifact_removes_grant() {
    let store = FakeStore::default();
    converge(&store, &gateway_pass("apps", true)).await.unwrap();
    assert_eq!(grant_namespaces(&store), Some(vec!["apps".to_string()]));

    converge(&store, &deleted_pass("apps")).await.unwrap();
    assert!(store.objects::<SecurityPolicy>().is_empty());
    assert_eq!(grant_namespaces(&store), None);
}

#[tokio::test(flavor = "current_thread")]
async fn prune_removes_only_unneeded_namespaces() {
    let store = FakeStore::default();
    converge(&store, &gateway_pass("a", true)).await.unwrap();
    converge(&store, &gateway_pass("b", true)).await.unwrap();
    assert_eq!(
        grant_namespaces(&store),
        Some(vec!["a".to_string(), "b".to_string()])
    );

    converge(&store, &deleted_pass("a")).await.unwrap();
    assert_eq!(grant_namespaces(&store), Some(vec!["b".to_string()]));
}

#[tokio::test(flavor = "current_thread")]
async fn sweep_runs_before_upsert() {
    let store = FakeStore::default();
    converge(&store, &gateway_pass("apps", true)).await.unwrap();

    // gw-old leaves the policy's scope in the same pass that upserts gw.
    let target = Target::Gateway {
        routes: vec![route("apps", "r1", None)],
    };
    let p = pass(
        policy("apps", "ap", "Gateway", "gw"),
        Some(target),
        vec![],
        vec![gateway("apps", "gw")],
        vec![ResourceId::new("apps", "gw-old")],
    );
    store.clear_ops();
    converge(&store, &p).await.unwrap();

    let ops = store.ops();
    let last_sweep = ops
        .iter()
        .rposition(|op| op.verb == Verb::List && op.kind == "SecurityPolicy")
        .unwrap();
    let first_upsert = ops
        .iter()
        .position(|op| op.verb == Verb::Get && op.kind == "SecurityPolicy")
        .unwrap();
    assert!(last_sweep < first_upsert, "{ops:#?}");
}

#[tokio::test(flavor = "current_thread")]
async fn invalid_then_valid_recreates_without_conflict() {
    let store = FakeStore::default();
    converge(&store, &gateway_pass("apps", true)).await.unwrap();

    let report = converge(&store, &deleted_pass("apps")).await.unwrap();
    assert_eq!(report.artifacts("deleted").len(), 1);

    let report = converge(&store, &gateway_pass("apps", true)).await.unwrap();
    assert_eq!(
        report.artifacts("created"),
        ids(&[("apps", "on-gw")])
    );
    assert_eq!(store.objects::<SecurityPolicy>().len(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn grant_is_additive() {
    let store = FakeStore::default();
    let mut live = authpolicy_controller_core::grant::desired(
        AUTHORIZER_NS,
        ["a".to_string(), "b".to_string()].into_iter().collect(),
    )
    .into_object();
    live.metadata.resource_version = None;
    store.insert(live);

    converge(&store, &gateway_pass("b", true)).await.unwrap();
    converge(&store, &gateway_pass("c", true)).await.unwrap();
    assert_eq!(
        grant_namespaces(&store),
        Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
    );
}

#[tokio::test(flavor = "current_thread")]
async fn same_namespace_needs_no_grant() {
    let store = FakeStore::default();
    converge(&store, &gateway_pass(AUTHORIZER_NS, true)).await.unwrap();
    assert_eq!(store.objects::<SecurityPolicy>().len(), 1);
    assert!(store.objects::<ReferenceGrant>().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn converge_is_idempotent_and_preserves_foreign_fields() {
    let store = FakeStore::default();
    converge(&store, &gateway_pass("apps", true)).await.unwrap();

    let mut sp = store
        .get_object::<SecurityPolicy>(Some("apps"), "on-gw")
        .unwrap();
    sp.spec
        .other
        .insert("cors".to_string(), serde_json::json!({"allowOrigins": ["*"]}));
    let ext_auth = sp.spec.ext_auth.as_mut().unwrap();
    ext_auth
        .other
        .insert("failOpen".to_string(), serde_json::json!(true));
    ext_auth
        .grpc
        .as_mut()
        .unwrap()
        .other
        .insert("backendSettings".to_string(), serde_json::json!({"timeout": "5s"}));
    sp.metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert("team".to_string(), "edge".to_string());
    store.insert(sp);

    store.clear_ops();
    let report = converge(&store, &gateway_pass("apps", false)).await.unwrap();
    assert_eq!(report.changes().count(), 0, "{report:#?}");
    assert!(store.writes().is_empty());

    let sp = store
        .get_object::<SecurityPolicy>(Some("apps"), "on-gw")
        .unwrap();
    assert!(sp.spec.other.contains_key("cors"));
    let ext_auth = sp.spec.ext_auth.unwrap();
    assert!(ext_auth.other.contains_key("failOpen"));
    assert!(ext_auth.grpc.unwrap().other.contains_key("backendSettings"));
    assert_eq!(sp.metadata.labels.unwrap().get("team").map(String::as_str), Some("edge"));
}

#[tokio::test(flavor = "current_thread")]
async fn merge_restores_backend_and_keeps_grpc_settings() {
    let store = FakeStore::default();
    converge(&store, &gateway_pass("apps", true)).await.unwrap();

    let mut sp = store
        .get_object::<SecurityPolicy>(Some("apps"), "on-gw")
        .unwrap();
    let grpc = sp.spec.ext_auth.as_mut().unwrap().grpc.as_mut().unwrap();
    grpc.backend_ref.namespace = Some("elsewhere".to_string());
    grpc.other
        .insert("backendSettings".to_string(), serde_json::json!({"timeout": "5s"}));
    store.insert(sp);

    let report = converge(&store, &gateway_pass("apps", false)).await.unwrap();
    assert_eq!(report.artifacts("updated").len(), 1);
    let sp = store
        .get_object::<SecurityPolicy>(Some("apps"), "on-gw")
        .unwrap();
    let grpc = sp.spec.ext_auth.unwrap().grpc.unwrap();
    assert_eq!(grpc.backend_ref.namespace.as_deref(), Some(AUTHORIZER_NS));
    assert_eq!(
        grpc.other.get("backendSettings"),
        Some(&serde_json::json!({"timeout": "5s"}))
    );
}

#[tokio::test(flavor = "current_thread")]
async fn merge_restores_owned_fields() {
    let store = FakeStore::default();
    converge(&store, &gateway_pass("apps", true)).await.unwrap();

    let mut sp = store
        .get_object::<SecurityPolicy>(Some("apps"), "on-gw")
        .unwrap();
    sp.spec.ext_auth = None;
    sp.metadata.labels.get_or_insert_with(Default::default).remove("kuadrant.io/gateway");
    store.insert(sp);

    let report = converge(&store, &gateway_pass("apps", false)).await.unwrap();
    assert_eq!(report.artifacts("updated").len(), 1);
    let sp = store
        .get_object::<SecurityPolicy>(Some("apps"), "on-gw")
        .unwrap();
    assert!(sp.spec.ext_auth.is_some());
    assert_eq!(
        sp.metadata.labels.unwrap().get("kuadrant.io/gateway").map(String::as_str),
        Some("gw")
    );
}

#[tokio::test(flavor = "current_thread")]
async fn route_policy_superseded_by_gateway_policy() {
    let store = FakeStore::default();
    let route_pass = |gw: GatewayInfo| {
        pass(
            policy("apps", "rp", "HTTPRoute", "r1"),
            Some(Target::Route(route("apps", "r1", Some("rp")))),
            vec![gw],
            vec![],
            vec![],
        )
    };
    converge(&store, &route_pass(gateway("apps", "gw"))).await.unwrap();
    assert_eq!(store.objects::<SecurityPolicy>().len(), 1);

    let covered = GatewayInfo {
        policy: Some(ResourceId::new("apps", "gw-policy")),
        ..gateway("apps", "gw")
    };
    let report = converge(&store, &route_pass(covered)).await.unwrap();
    assert_eq!(report.artifacts("deleted").len(), 1);
    assert!(store.objects::<SecurityPolicy>().is_empty());
    assert_eq!(grant_namespaces(&store), None);
}

#[tokio::test(flavor = "current_thread")]
async fn unresolvable_namespace_fails_the_pass() {
    let store = FakeStore::default();
    let mut p = gateway_pass("apps", true);
    p.gateways = GatewayClassification::new(
        vec![],
        vec![GatewayInfo {
            authorizer_namespace: None,
            ..gateway("apps", "gw")
        }],
        vec![],
    )
    .unwrap();
    let error = converge(&store, &p).await.expect_err("pass must fail");
    assert!(matches!(error, Error::NamespaceResolution(_)));
    assert!(!error.is_retryable());
    assert!(store.writes().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn conflicts_surface() {
    let store = FakeStore::default();
    converge(&store, &gateway_pass("a", true)).await.unwrap();

    store.fail::<ReferenceGrant>(Verb::Replace, 409);
    let error = converge(&store, &gateway_pass("b", true))
        .await
        .expect_err("conflict must surface");
    assert!(matches!(error, Error::Cluster(_)));
    assert!(error.is_retryable());

    store.clear_failures();
    converge(&store, &gateway_pass("b", true)).await.unwrap();
    assert_eq!(
        grant_namespaces(&store),
        Some(vec!["a".to_string(), "b".to_string()])
    );
}

/// Creates a grant on behalf of another writer right after the engine first
/// finds it missing.
#[derive(Clone, Default)]
struct RacingStore {
    inner: FakeStore,
    pending: Arc<Mutex<Option<ReferenceGrant>>>,
}

#[async_trait::async_trait]
impl Store for RacingStore {
    async fn get<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<K>, authpolicy_controller_k8s_api::Error> {
        let obj = self.inner.get::<K>(namespace, name).await?;
        if K::kind(&()) == "ReferenceGrant" {
            let pending = self.pending.lock().take();
            if let Some(grant) = pending {
                self.inner.insert(grant);
            }
        }
        Ok(obj)
    }

    async fn list<K: Object>(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<K>, authpolicy_controller_k8s_api::Error> {
        self.inner.list(namespace, selector).await
    }

    async fn create<K: Object>(
        &self,
        obj: &K,
    ) -> Result<Option<K>, authpolicy_controller_k8s_api::Error> {
        self.inner.create(obj).await
    }

    async fn replace<K: Object>(&self, obj: &K) -> Result<K, authpolicy_controller_k8s_api::Error> {
        self.inner.replace(obj).await
    }

    async fn delete<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<bool, authpolicy_controller_k8s_api::Error> {
        self.inner.delete::<K>(namespace, name, resource_version).await
    }

    async fn kind_installed<K: Object>(&self) -> Result<bool, authpolicy_controller_k8s_api::Error> {
        self.inner.kind_installed::<K>().await
    }
}

#[tokio::test(flavor = "current_thread")]
async fn concurrently_created_grant_is_merged() {
    let store = RacingStore::default();
    let other = authpolicy_controller_core::grant::desired(
        AUTHORIZER_NS,
        ["other".to_string()].into_iter().collect(),
    )
    .into_object();
    *store.pending.lock() = Some(other);

    converge(&store, &gateway_pass("apps", true))
        .await
        .expect("an existing grant must not fail the pass");
    assert!(store.pending.lock().is_none());
    assert_eq!(
        grant_namespaces(&store.inner),
        Some(vec!["other".to_string(), "apps".to_string()])
    );
    assert_eq!(store.inner.objects::<SecurityPolicy>().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn controller_retries_failed_passes() {
    let store = FakeStore::default();
    store.fail::<SecurityPolicy>(Verb::Create, 500);

    let (tx, rx) = mpsc::channel(8);
    let controller = Controller::new(
        store.clone(),
        &tx,
        rx,
        Duration::from_secs(5),
        Duration::from_secs(1),
        metrics(),
    );
    let task = tokio::spawn(controller.run());

    tx.send(gateway_pass("apps", true)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(store.objects::<SecurityPolicy>().is_empty());

    store.clear_failures();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(store.objects::<SecurityPolicy>().len(), 1);

    drop(tx);
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn controller_drops_stale_passes() {
    let store = FakeStore::default();
    let (tx, rx) = mpsc::channel(8);
    let controller = Controller::new(
        store.clone(),
        &tx,
        rx,
        Duration::from_secs(5),
        Duration::from_secs(1),
        metrics(),
    );

    let newer = Pass {
        generation: 2,
        ..deleted_pass("apps")
    };
    let older = Pass {
        generation: 1,
        ..gateway_pass("apps", true)
    };
    tx.send(newer).await.unwrap();
    tx.send(older).await.unwrap();
    drop(tx);
    controller.run().await;

    assert!(store.objects::<SecurityPolicy>().is_empty());
    assert!(store.writes().is_empty());
}
