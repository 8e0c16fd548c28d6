use authpolicy_controller_core::Desired;
use authpolicy_controller_k8s_api::{Object, Resource, Store};

/// The result of reconciling one object.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome<K> {
    /// The object was created.
    Created(K),
    /// The live object differed and was replaced with the merged object.
    Updated(K),
    /// The live object already matched. Also returned when a concurrent writer
    /// created the object first.
    Unchanged(K),
    /// The live object was deleted. Holds the object as it was before
    /// deletion.
    Deleted(K),
    /// The object should not exist and does not.
    Absent,
}

impl<K> Outcome<K> {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Updated(_) => "updated",
            Self::Unchanged(_) => "unchanged",
            Self::Deleted(_) => "deleted",
            Self::Absent => "absent",
        }
    }

    /// The object the outcome concerns, if any.
    pub fn object(&self) -> Option<&K> {
        match self {
            Self::Created(obj) | Self::Updated(obj) | Self::Unchanged(obj) | Self::Deleted(obj) => {
                Some(obj)
            }
            Self::Absent => None,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Self::Created(_) | Self::Updated(_) | Self::Deleted(_))
    }
}

/// Drives a single object toward its desired state.
///
/// A tombstone deletes the live object if there is one. Otherwise the object
/// is created, or `merge` folds the desired state into the live object and
/// the result is written back only if `merge` reports a change. The live
/// object's resource version is kept, so a concurrent update surfaces as a
/// conflict rather than being overwritten.
pub async fn reconcile_resource<K, S, F>(
    store: &S,
    desired: Desired<K>,
    merge: F,
) -> Result<Outcome<K>, authpolicy_controller_k8s_api::Error>
where
    K: Object,
    S: Store,
    F: FnOnce(&mut K, &K) -> bool,
{
    let meta = Resource::meta(desired.object());
    let namespace = meta.namespace.clone();
    let name = meta.name.clone().unwrap_or_default();
    let live = store.get::<K>(namespace.as_deref(), &name).await?;

    match (desired, live) {
        (Desired::Absent(_), None) => Ok(Outcome::Absent),

        (Desired::Absent(_), Some(live)) => {
            if store.delete::<K>(namespace.as_deref(), &name, None).await? {
                Ok(Outcome::Deleted(live))
            } else {
                Ok(Outcome::Absent)
            }
        }

        (Desired::Present(obj), None) => match store.create(&obj).await? {
            Some(created) => Ok(Outcome::Created(created)),
            None => Ok(Outcome::Unchanged(obj)),
        },

        (Desired::Present(obj), Some(mut live)) => {
            if !merge(&mut live, &obj) {
                return Ok(Outcome::Unchanged(live));
            }
            let updated = store.replace(&live).await?;
            Ok(Outcome::Updated(updated))
        }
    }
}
