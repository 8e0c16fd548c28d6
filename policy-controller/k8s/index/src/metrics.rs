use authpolicy_controller_k8s_api::ResourceExt;
use kubert::index::NamespacedRemoved;
use parking_lot::RwLock;
use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::{collections::BTreeSet, sync::Arc};

/// Counts the passes the index publishes to the controller.
#[derive(Clone, Debug, Default)]
pub struct PassMetrics {
    published: Family<PublishLabels, Counter>,
    policies: Gauge,
}

/// Wraps an index, counting the watch events it observes and tracking how
/// many resources of each kind it holds per namespace.
pub struct IndexMetrics<T> {
    inner: T,
    resources: Family<ResourceLabels, Gauge>,
    events: Family<EventLabels, Counter>,
}

/// Reports the number of resources of kind `R` held in a namespace.
pub trait SizedIndex<R> {
    fn size(&self, namespace: &str) -> usize;
}

/// Why a pass was published.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub(crate) enum Trigger {
    Changed,
    Resync,
}

/// What became of a published pass.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub(crate) enum Delivery {
    Queued,
    Deferred,
    Closed,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PublishLabels {
    trigger: Trigger,
    delivery: Delivery,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ResourceLabels {
    namespace: String,
    kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
enum Op {
    Apply,
    Delete,
    Reset,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct EventLabels {
    kind: String,
    op: Op,
}

// === impl PassMetrics ===

impl PassMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let published = Family::default();
        prom.register(
            "passes",
            "Count of passes published by trigger and delivery",
            published.clone(),
        );

        let policies = Gauge::default();
        prom.register(
            "policies",
            "Gauge of the number of policies passes are computed for",
            policies.clone(),
        );

        Self {
            published,
            policies,
        }
    }

    pub(crate) fn published(&self, trigger: Trigger, delivery: Delivery) {
        self.published
            .get_or_create(&PublishLabels { trigger, delivery })
            .inc();
    }

    pub(crate) fn set_policies(&self, policies: usize) {
        self.policies.set(policies as i64);
    }
}

// === impl IndexMetrics ===

impl<T> IndexMetrics<T> {
    pub fn register(inner: T, prom: &mut Registry) -> Self {
        let resources = Family::default();
        prom.register(
            "resources",
            "Gauge of the number of resources in the index by namespace and kind",
            resources.clone(),
        );

        let events = Family::default();
        prom.register(
            "events",
            "Count of watch events applied to the index by kind",
            events.clone(),
        );

        Self {
            inner,
            resources,
            events,
        }
    }

    pub fn shared(self) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(self))
    }

    fn observe<R>(&self, op: Op)
    where
        R: ResourceExt<DynamicType = ()>,
    {
        self.events
            .get_or_create(&EventLabels {
                kind: R::kind(&()).to_string(),
                op,
            })
            .inc();
    }
}

impl<T> IndexMetrics<Arc<RwLock<T>>> {
    fn update_size<R>(&self, namespace: &str)
    where
        T: SizedIndex<R>,
        R: ResourceExt<DynamicType = ()>,
    {
        let size = SizedIndex::<R>::size(&*self.inner.read(), namespace);
        self.resources
            .get_or_create(&ResourceLabels {
                namespace: namespace.to_string(),
                kind: R::kind(&()).to_string(),
            })
            .set(size as i64);
    }
}

impl<R, T> kubert::index::IndexNamespacedResource<R> for IndexMetrics<Arc<RwLock<T>>>
where
    T: SizedIndex<R> + kubert::index::IndexNamespacedResource<R>,
    R: ResourceExt<DynamicType = ()>,
{
    fn apply(&mut self, resource: R) {
        self.observe::<R>(Op::Apply);
        let namespace = resource.namespace().unwrap_or_default();
        self.inner.write().apply(resource);
        self.update_size::<R>(&namespace);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.observe::<R>(Op::Delete);
        self.inner.write().delete(namespace.clone(), name);
        self.update_size::<R>(&namespace);
    }

    fn reset(&mut self, resources: Vec<R>, removed: NamespacedRemoved) {
        self.observe::<R>(Op::Reset);
        let namespaces = resources
            .iter()
            .filter_map(|r| r.namespace())
            .chain(removed.keys().cloned())
            .collect::<BTreeSet<_>>();
        self.inner.write().reset(resources, removed);
        for ns in namespaces {
            self.update_size::<R>(&ns);
        }
    }
}
