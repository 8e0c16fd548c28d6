use crate::{reconcile::Outcome, Error};
use authpolicy_controller_core::{grant, ResourceId, GRANT_NAME};
use authpolicy_controller_k8s_api::{gateway::ReferenceGrant, labels, SecurityPolicy, Store};

/// How a grant's `from` list is recomputed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GrantMode {
    /// Entries for the pass's own artifacts are added; nothing is removed.
    Additive,

    /// The list is recomputed from every live artifact that references the
    /// authorizer, removing entries that no artifact needs anymore. Used
    /// after a pass deletes artifacts.
    Prune,
}

/// Reconciles the grant in `authorizer_ns`.
///
/// In additive mode the desired entries are computed from `artifacts`, the
/// pass's current artifacts. In prune mode they are computed from all
/// artifacts in the cluster. The live grant is read before the artifacts are
/// listed and written back with the resource version it was read at, so a
/// concurrent additive update causes a conflict instead of being lost.
pub async fn reconcile_grant<S: Store>(
    store: &S,
    authorizer_ns: &str,
    mode: GrantMode,
    artifacts: &[SecurityPolicy],
) -> Result<Outcome<ReferenceGrant>, Error> {
    let live = store
        .get::<ReferenceGrant>(Some(authorizer_ns), GRANT_NAME)
        .await?;

    let desired = match mode {
        GrantMode::Additive => grant::aggregate(authorizer_ns, artifacts),
        GrantMode::Prune => {
            let all = store
                .list::<SecurityPolicy>(None, &labels::authorizer_selector(authorizer_ns))
                .await?;
            grant::aggregate(authorizer_ns, &all)
        }
    };

    let (live, mode) = match live {
        Some(live) => (live, mode),
        None => {
            if desired.is_absent() {
                return Ok(Outcome::Absent);
            }
            if let Some(created) = store.create(desired.object()).await? {
                return Ok(Outcome::Created(created));
            }
            // Another writer created the grant after it was read. Its entries
            // may be newer than the artifacts listed above, so they are only
            // added to.
            tracing::debug!(namespace = %authorizer_ns, "ReferenceGrant created concurrently");
            let Some(live) = store
                .get::<ReferenceGrant>(Some(authorizer_ns), GRANT_NAME)
                .await?
            else {
                return Err(Error::GrantRace(ResourceId::new(authorizer_ns, GRANT_NAME)));
            };
            (live, GrantMode::Additive)
        }
    };

    let mut merged = live.clone();
    let changed = match mode {
        GrantMode::Additive => grant::merge_additive(&mut merged, desired.object()),
        GrantMode::Prune => grant::merge_prune(&mut merged, desired.object()),
    };

    if merged.spec.from.is_empty() {
        let rv = live.metadata.resource_version.as_deref();
        return if store
            .delete::<ReferenceGrant>(Some(authorizer_ns), GRANT_NAME, rv)
            .await?
        {
            Ok(Outcome::Deleted(live))
        } else {
            Ok(Outcome::Absent)
        };
    }

    if !changed {
        return Ok(Outcome::Unchanged(live));
    }
    let updated = store.replace(&merged).await?;
    Ok(Outcome::Updated(updated))
}
