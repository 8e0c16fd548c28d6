use crate::{
    grant::{reconcile_grant, GrantMode},
    reconcile::{reconcile_resource, Outcome},
    Error,
};
use authpolicy_controller_core::{synthesize, Pass, ResourceId};
use authpolicy_controller_k8s_api::{labels, ResourceExt, SecurityPolicy, Store};
use std::collections::{BTreeMap, BTreeSet};

/// The writes performed by a pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Report {
    pub writes: Vec<Write>,
}

/// A single object reconciled by a pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Write {
    pub kind: &'static str,
    pub id: ResourceId,
    pub outcome: &'static str,
}

/// Converges the cluster toward the state required by a pass.
///
/// Artifacts for gateways that left the policy's scope are deleted first, so
/// that an artifact recreated under the same name later in the pass never
/// collides with a stale one. Artifacts for in-scope gateways are then
/// created, updated or deleted, and finally the grant in every authorizer
/// namespace touched by the pass is reconciled.
///
/// Every step is idempotent; a failed pass may simply be retried.
pub async fn converge<S: Store>(store: &S, pass: &Pass) -> Result<Report, Error> {
    let policy = &*pass.policy;
    let policy_id = ResourceId::of(policy);
    let mut report = Report::default();
    let mut grants = BTreeMap::<String, GrantMode>::new();

    for gateway in pass.gateways.invalid() {
        let selector = labels::artifact_selector(
            &policy_id.namespace,
            &policy_id.name,
            &gateway.namespace,
            &gateway.name,
        );
        let stale = store.list::<SecurityPolicy>(None, &selector).await?;
        for sp in stale {
            let id = ResourceId::of(&sp);
            if store
                .delete::<SecurityPolicy>(Some(id.namespace.as_str()), &id.name, None)
                .await?
            {
                tracing::info!(policy = %policy_id, artifact = %id, "Deleted stale SecurityPolicy");
                report.push("SecurityPolicy", id, "deleted");
                if let Some(ns) = artifact_authorizer(&sp) {
                    grants.insert(ns, GrantMode::Prune);
                }
            }
        }
    }

    let mut current = Vec::new();
    if let Some(target) = pass.target.as_ref() {
        for gateway in pass.gateways.in_scope() {
            let desired = synthesize(policy, target, gateway)?;
            let outcome = reconcile_resource(store, desired, merge_security_policy).await?;
            match &outcome {
                Outcome::Created(sp) | Outcome::Updated(sp) | Outcome::Unchanged(sp) => {
                    if let Some(ns) = artifact_authorizer(sp) {
                        grants.entry(ns).or_insert(GrantMode::Additive);
                    }
                    current.push(sp.clone());
                }
                Outcome::Deleted(sp) => {
                    if let Some(ns) = artifact_authorizer(sp) {
                        grants.insert(ns, GrantMode::Prune);
                    }
                }
                Outcome::Absent => {}
            }
            if let Some(sp) = outcome.object() {
                report.push("SecurityPolicy", ResourceId::of(sp), outcome.as_str());
            }
            if outcome.is_write() {
                tracing::info!(
                    policy = %policy_id,
                    gateway = %gateway.id,
                    outcome = outcome.as_str(),
                    "Reconciled SecurityPolicy"
                );
            }
        }
    } else if pass.gateways.in_scope().next().is_some() {
        tracing::debug!(policy = %policy_id, "Policy target not found; skipping in-scope gateways");
    }

    for (authorizer_ns, mode) in grants {
        let outcome = reconcile_grant(store, &authorizer_ns, mode, &current).await?;
        if let Some(grant) = outcome.object() {
            if outcome.is_write() {
                tracing::info!(
                    namespace = %authorizer_ns,
                    ?mode,
                    outcome = outcome.as_str(),
                    "Reconciled ReferenceGrant"
                );
            }
            report.push("ReferenceGrant", ResourceId::of(grant), outcome.as_str());
        }
    }

    Ok(report)
}

/// Folds the fields owned by the controller into a live `SecurityPolicy`.
///
/// Only the external authorization backend, the target reference, and the
/// controller's own labels and annotations are compared and overwritten.
/// Everything else on the live object belongs to other writers.
pub fn merge_security_policy(live: &mut SecurityPolicy, desired: &SecurityPolicy) -> bool {
    let mut changed = false;

    // Only the backend reference is owned; other gRPC settings are kept.
    if let Some(desired) = desired.spec.ext_auth.as_ref().and_then(|e| e.grpc.as_ref()) {
        let ext_auth = live.spec.ext_auth.get_or_insert_with(Default::default);
        match &mut ext_auth.grpc {
            Some(grpc) if grpc.backend_ref == desired.backend_ref => {}
            Some(grpc) => {
                grpc.backend_ref = desired.backend_ref.clone();
                changed = true;
            }
            None => {
                ext_auth.grpc = Some(desired.clone());
                changed = true;
            }
        }
    }

    if live.spec.target_ref != desired.spec.target_ref {
        live.spec.target_ref = desired.spec.target_ref.clone();
        changed = true;
    }

    for (key, value) in desired.labels() {
        if live.labels().get(key) != Some(value) {
            live.labels_mut().insert(key.clone(), value.clone());
            changed = true;
        }
    }

    for (key, value) in desired.annotations() {
        if live.annotations().get(key) != Some(value) {
            live.annotations_mut().insert(key.clone(), value.clone());
            changed = true;
        }
    }

    changed
}

fn artifact_authorizer(sp: &SecurityPolicy) -> Option<String> {
    sp.labels()
        .get(labels::KUADRANT_NAMESPACE)
        .map(String::as_str)
        .or_else(|| sp.authorizer_namespace())
        .map(str::to_string)
}

// === impl Report ===

impl Report {
    fn push(&mut self, kind: &'static str, id: ResourceId, outcome: &'static str) {
        self.writes.push(Write { kind, id, outcome });
    }

    /// Returns the writes that modified the cluster.
    pub fn changes(&self) -> impl Iterator<Item = &Write> + '_ {
        self.writes.iter().filter(|w| w.outcome != "unchanged")
    }

    pub fn artifacts(&self, outcome: &str) -> BTreeSet<ResourceId> {
        self.writes
            .iter()
            .filter(|w| w.kind == "SecurityPolicy" && w.outcome == outcome)
            .map(|w| w.id.clone())
            .collect()
    }
}
