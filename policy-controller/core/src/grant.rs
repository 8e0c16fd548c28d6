//! Computes the cross-namespace grants that allow enforcement artifacts to
//! reference the authorizer service.
//!
//! A single grant exists per authorizer namespace. It is shared by every
//! policy using that authorizer, so its `from` list is merged additively:
//! recomputing it from one policy's artifacts must never revoke entries that
//! belong to another policy. Stale entries are only removed by a prune, which
//! recomputes the list from every live artifact.

use crate::{Desired, AUTHORIZER_SERVICE, GRANT_NAME};
use authpolicy_controller_k8s_api::{
    envoy_gateway,
    gateway::{ReferenceGrant, ReferenceGrantFrom, ReferenceGrantSpec, ReferenceGrantTo},
    ObjectMeta, Resource, SecurityPolicy,
};
use std::collections::BTreeSet;

/// Computes the grant needed in `authorizer_ns` by the given artifacts.
///
/// Only live artifacts that reference the authorizer in `authorizer_ns` are
/// considered. Artifacts in the authorizer's own namespace need no grant, so
/// the grant is a tombstone when no other namespace remains.
pub fn aggregate<'a>(
    authorizer_ns: &str,
    artifacts: impl IntoIterator<Item = &'a SecurityPolicy>,
) -> Desired<ReferenceGrant> {
    let namespaces = artifacts
        .into_iter()
        .filter(|sp| !sp.is_deleting())
        .filter(|sp| sp.authorizer_namespace() == Some(authorizer_ns))
        .filter_map(|sp| sp.metadata.namespace.clone())
        .collect::<BTreeSet<_>>();
    desired(authorizer_ns, namespaces)
}

/// Builds the grant admitting artifacts from `namespaces`.
pub fn desired(authorizer_ns: &str, namespaces: BTreeSet<String>) -> Desired<ReferenceGrant> {
    let from = namespaces
        .into_iter()
        .filter(|ns| ns != authorizer_ns)
        .map(from_namespace)
        .collect::<Vec<_>>();
    let empty = from.is_empty();

    let mut grant = ReferenceGrant::new(
        GRANT_NAME,
        ReferenceGrantSpec {
            from,
            to: vec![authorizer_to()],
        },
    );
    grant.metadata = ObjectMeta {
        name: Some(GRANT_NAME.to_string()),
        namespace: Some(authorizer_ns.to_string()),
        ..ObjectMeta::default()
    };

    if empty {
        Desired::Absent(grant)
    } else {
        Desired::Present(grant)
    }
}

/// Adds the desired `from` entries to the live grant and overwrites its `to`
/// list. Returns true if the live grant changed.
pub fn merge_additive(live: &mut ReferenceGrant, desired: &ReferenceGrant) -> bool {
    let mut changed = false;
    for entry in &desired.spec.from {
        if !live.spec.from.iter().any(|e| same_from(e, entry)) {
            live.spec.from.push(entry.clone());
            changed = true;
        }
    }
    changed |= dedup_from(&mut live.spec.from);
    changed | overwrite_to(live, desired)
}

/// Replaces the artifact entries of the live grant's `from` list with the
/// desired ones, leaving entries for other kinds untouched. Returns true if
/// the live grant changed.
pub fn merge_prune(live: &mut ReferenceGrant, desired: &ReferenceGrant) -> bool {
    let before = live.spec.from.len();
    live.spec
        .from
        .retain(|e| !is_artifact_entry(e) || desired.spec.from.iter().any(|d| same_from(e, d)));
    let mut changed = live.spec.from.len() != before;
    changed |= merge_additive(live, desired);
    changed
}

fn from_namespace(namespace: String) -> ReferenceGrantFrom {
    ReferenceGrantFrom {
        group: envoy_gateway::API_GROUP.to_string(),
        kind: SecurityPolicy::kind(&()).to_string(),
        namespace,
    }
}

fn authorizer_to() -> ReferenceGrantTo {
    ReferenceGrantTo {
        group: String::new(),
        kind: "Service".to_string(),
        name: Some(AUTHORIZER_SERVICE.to_string()),
    }
}

fn is_artifact_entry(entry: &ReferenceGrantFrom) -> bool {
    entry.group == envoy_gateway::API_GROUP && entry.kind == SecurityPolicy::kind(&())
}

fn same_from(a: &ReferenceGrantFrom, b: &ReferenceGrantFrom) -> bool {
    a.group == b.group && a.kind == b.kind && a.namespace == b.namespace
}

fn dedup_from(from: &mut Vec<ReferenceGrantFrom>) -> bool {
    let before = from.len();
    let mut seen = BTreeSet::new();
    from.retain(|e| seen.insert((e.group.clone(), e.kind.clone(), e.namespace.clone())));
    from.len() != before
}

fn same_to(a: &ReferenceGrantTo, b: &ReferenceGrantTo) -> bool {
    a.group == b.group && a.kind == b.kind && a.name == b.name
}

fn overwrite_to(live: &mut ReferenceGrant, desired: &ReferenceGrant) -> bool {
    let same = live.spec.to.len() == desired.spec.to.len()
        && live
            .spec
            .to
            .iter()
            .zip(&desired.spec.to)
            .all(|(a, b)| same_to(a, b));
    if same {
        return false;
    }
    live.spec.to = desired.spec.to.clone();
    true
}

#[cfg(test)]
mod tests;
