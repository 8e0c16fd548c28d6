use authpolicy_controller_k8s_api::{policy::Kuadrant, Resource, ResourceExt};
use authpolicy_controller_k8s_mesh::Event;
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tokio::sync::mpsc;

pub type SharedKuadrantIndex = Arc<RwLock<KuadrantIndex>>;

/// Tracks `Kuadrant` installations and asks the registrar to configure the
/// mesh for the authorizer in each installation's namespace.
///
/// Registration is requested every time an installation is applied; the
/// registrar makes no changes when the mesh is already configured. The mesh
/// entry for a namespace is removed once its last installation is deleted.
pub struct KuadrantIndex {
    installs: BTreeMap<String, BTreeSet<String>>,
    events: mpsc::UnboundedSender<Event>,
}

impl KuadrantIndex {
    pub fn shared(events: mpsc::UnboundedSender<Event>) -> SharedKuadrantIndex {
        Arc::new(RwLock::new(Self {
            installs: BTreeMap::new(),
            events,
        }))
    }

    fn send(&self, event: Event) {
        if self.events.send(event).is_err() {
            tracing::debug!("Registrar stopped");
        }
    }
}

impl kubert::index::IndexNamespacedResource<Kuadrant> for KuadrantIndex {
    fn apply(&mut self, kuadrant: Kuadrant) {
        let namespace = kuadrant.namespace().unwrap_or_default();
        let name = kuadrant.name_any();
        if kuadrant.meta().deletion_timestamp.is_some() {
            tracing::debug!(%namespace, %name, "Kuadrant is being deleted");
            return;
        }

        self.installs
            .entry(namespace.clone())
            .or_default()
            .insert(name);
        self.send(Event::Register {
            namespace,
            owner: kuadrant.controller_owner_ref(&()),
        });
    }

    fn delete(&mut self, namespace: String, name: String) {
        let Some(names) = self.installs.get_mut(&namespace) else {
            return;
        };
        names.remove(&name);
        if names.is_empty() {
            self.installs.remove(&namespace);
            self.send(Event::Unregister { namespace });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authpolicy_controller_k8s_api::{policy::KuadrantSpec, ObjectMeta, Time};
    use kubert::index::IndexNamespacedResource;
    use pretty_assertions::assert_eq;

    fn kuadrant(ns: &str, name: &str) -> Kuadrant {
        Kuadrant {
            metadata: ObjectMeta {
                namespace: Some(ns.to_string()),
                name: Some(name.to_string()),
                uid: Some(format!("{ns}-{name}-uid")),
                ..ObjectMeta::default()
            },
            spec: KuadrantSpec::default(),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn registers_on_apply() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let index = KuadrantIndex::shared(tx);

        index.write().apply(kuadrant("kuadrant-system", "kuadrant"));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Register { namespace, owner } => {
                assert_eq!(namespace, "kuadrant-system");
                let owner = owner.as_ref().expect("owner must be set");
                assert_eq!(owner.kind, "Kuadrant");
                assert_eq!(owner.name, "kuadrant");
                assert_eq!(owner.uid, "kuadrant-system-kuadrant-uid");
                assert_eq!(owner.controller, Some(true));
            }
            event => panic!("unexpected event: {event:?}"),
        }

        // Reapplying requests registration again.
        index.write().apply(kuadrant("kuadrant-system", "kuadrant"));
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn unregisters_after_last_install_is_deleted() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let index = KuadrantIndex::shared(tx);

        index.write().apply(kuadrant("kuadrant-system", "a"));
        index.write().apply(kuadrant("kuadrant-system", "b"));
        drain(&mut rx);

        index
            .write()
            .delete("kuadrant-system".to_string(), "a".to_string());
        assert!(drain(&mut rx).is_empty());

        index
            .write()
            .delete("kuadrant-system".to_string(), "b".to_string());
        assert_eq!(
            drain(&mut rx),
            vec![Event::Unregister {
                namespace: "kuadrant-system".to_string()
            }]
        );

        // Unknown installations are ignored.
        index
            .write()
            .delete("kuadrant-system".to_string(), "b".to_string());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn ignores_installs_being_deleted() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let index = KuadrantIndex::shared(tx);

        let mut deleting = kuadrant("kuadrant-system", "kuadrant");
        deleting.metadata.deletion_timestamp = Some(Time(Default::default()));
        index.write().apply(deleting);
        assert!(drain(&mut rx).is_empty());
    }
}
