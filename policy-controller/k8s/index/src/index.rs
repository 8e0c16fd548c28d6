use crate::{
    metrics::{Delivery, PassMetrics, SizedIndex, Trigger},
    route::RouteState,
};
use ahash::AHashMap as HashMap;
use authpolicy_controller_core::{
    GatewayClassification, GatewayInfo, Pass, ResourceId, RouteInfo, Target,
};
use authpolicy_controller_k8s_api::{
    gateway::{Gateway, HTTPRoute},
    labels,
    policy::{AuthPolicy, AuthPolicySpec, PolicyTargetRef},
    ObjectMeta, Resource, ResourceExt, SecurityPolicy,
};
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time,
};

pub type SharedIndex = Arc<RwLock<Index>>;

/// Tracks policies, their targets, and the artifacts already synthesized for
/// them, and publishes a [`Pass`] whenever the work required for a policy
/// changes.
pub struct Index {
    policies: BTreeMap<ResourceId, Arc<AuthPolicy>>,

    /// The last known state of deleted policies. A deleted policy is kept
    /// until no artifact refers to it.
    deleted: BTreeMap<ResourceId, Arc<AuthPolicy>>,

    /// Gateways, by the authorizer namespace they are annotated with.
    gateways: HashMap<ResourceId, Option<String>>,
    routes: HashMap<ResourceId, RouteState>,
    artifacts: HashMap<ResourceId, ArtifactRef>,

    /// The last pass queued for each policy.
    queued: HashMap<ResourceId, Pass>,
    generation: u64,
    passes: mpsc::Sender<Pass>,
    metrics: PassMetrics,
}

/// The owner labels of an enforcement artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
struct ArtifactRef {
    policy: ResourceId,
    gateway: ResourceId,
}

// === impl Index ===

impl Index {
    pub fn shared(passes: mpsc::Sender<Pass>, metrics: PassMetrics) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            policies: BTreeMap::new(),
            deleted: BTreeMap::new(),
            gateways: HashMap::new(),
            routes: HashMap::new(),
            artifacts: HashMap::new(),
            queued: HashMap::new(),
            generation: 0,
            passes,
            metrics,
        }))
    }

    /// Periodically requeues every policy's pass, so that passes which did
    /// not fit in the queue are retried and artifacts or grants changed by
    /// other writers are converged again.
    pub async fn run(index: SharedIndex, period: time::Duration) {
        let mut interval = time::interval_at(time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            index.write().resync();
        }
    }

    fn resync(&mut self) {
        let generation = self.generation;
        self.reconcile();

        // Passes queued by the reconciliation above are already current.
        let unchanged = self
            .queued
            .iter()
            .filter(|(_, pass)| pass.generation <= generation)
            .map(|(id, pass)| (id.clone(), pass.clone()))
            .collect::<Vec<_>>();
        for (id, pass) in unchanged {
            self.queue(id, pass, Trigger::Resync);
        }
    }

    /// Computes the pass for every known policy and queues those that differ
    /// from the last pass queued for the policy.
    fn reconcile(&mut self) {
        let referenced = self
            .artifacts
            .values()
            .map(|a| a.policy.clone())
            .collect::<BTreeSet<_>>();
        self.deleted.retain(|id, _| referenced.contains(id));

        let ids = self
            .policies
            .keys()
            .cloned()
            .chain(referenced)
            .collect::<BTreeSet<_>>();
        self.queued.retain(|id, _| ids.contains(id));
        self.metrics.set_policies(ids.len());

        for id in ids {
            let Some(pass) = self.pass(&id) else {
                continue;
            };
            if let Some(queued) = self.queued.get(&id) {
                if queued.policy == pass.policy
                    && queued.target == pass.target
                    && queued.gateways == pass.gateways
                {
                    continue;
                }
            }
            self.queue(id, pass, Trigger::Changed);
        }
    }

    fn queue(&mut self, id: ResourceId, mut pass: Pass, trigger: Trigger) {
        self.generation += 1;
        pass.generation = self.generation;
        let delivery = match self.passes.try_send(pass.clone()) {
            Ok(()) => {
                tracing::debug!(policy = %id, generation = pass.generation, ?trigger, "Queued pass");
                self.queued.insert(id, pass);
                Delivery::Queued
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(policy = %id, ?trigger, "Pass queue is full; deferring");
                Delivery::Deferred
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(policy = %id, "Pass queue closed");
                Delivery::Closed
            }
        };
        self.metrics.published(trigger, delivery);
    }

    fn pass(&self, id: &ResourceId) -> Option<Pass> {
        let (policy, target, in_scope) = match self.policies.get(id) {
            Some(policy) => {
                let (target, in_scope) = self.resolve(policy, id).unzip();
                (policy.clone(), target, in_scope.unwrap_or_default())
            }
            None => {
                let policy = self
                    .deleted
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| Arc::new(placeholder(id)));
                (policy, None, Vec::new())
            }
        };

        let owned = self
            .artifacts
            .values()
            .filter(|a| a.policy == *id)
            .map(|a| a.gateway.clone())
            .collect::<BTreeSet<_>>();

        let (valid, missing): (Vec<_>, Vec<_>) = in_scope
            .into_iter()
            .partition(|gw| owned.contains(&gw.id));
        let invalid = owned
            .into_iter()
            .filter(|gw| !valid.iter().any(|v| v.id == *gw))
            .collect();

        match GatewayClassification::new(valid, missing, invalid) {
            Ok(gateways) => Some(Pass {
                policy,
                target,
                gateways,
                generation: 0,
            }),
            Err(error) => {
                tracing::error!(policy = %id, %error, "Failed to classify gateways");
                None
            }
        }
    }

    /// Resolves a live policy's target and the gateways that should enforce
    /// it. Returns `None` if the target does not exist.
    fn resolve(&self, policy: &AuthPolicy, id: &ResourceId) -> Option<(Target, Vec<GatewayInfo>)> {
        let target_ref = &policy.spec.target_ref;
        let target_id = ResourceId::new(target_ref.namespace_or(&id.namespace), &target_ref.name);

        if target_ref.targets_kind::<Gateway>() {
            let gateway = self.gateway_info(&target_id)?;
            let mut routes = self
                .routes
                .iter()
                .filter(|(_, route)| route.attaches_to(&target_id))
                .map(|(route_id, route)| self.route_info(route_id, route))
                .collect::<Vec<_>>();
            routes.sort_by(|a, b| a.id.cmp(&b.id));
            return Some((Target::Gateway { routes }, vec![gateway]));
        }

        if target_ref.targets_kind::<HTTPRoute>() {
            let route = self.routes.get(&target_id)?;
            let gateways = route
                .parents
                .iter()
                .filter_map(|gw| self.gateway_info(gw))
                .collect();
            return Some((Target::Route(self.route_info(&target_id, route)), gateways));
        }

        tracing::debug!(policy = %id, kind = %target_ref.canonical_kind(), "Unsupported target kind");
        None
    }

    fn gateway_info(&self, id: &ResourceId) -> Option<GatewayInfo> {
        let authorizer_namespace = self.gateways.get(id)?.clone();
        Some(GatewayInfo {
            id: id.clone(),
            policy: self.attached_policy::<Gateway>(id),
            authorizer_namespace,
        })
    }

    fn route_info(&self, id: &ResourceId, route: &RouteState) -> RouteInfo {
        RouteInfo {
            id: id.clone(),
            policy: self.attached_policy::<HTTPRoute>(id),
            rules: route.rules,
            parents: route.parents.clone(),
        }
    }

    /// Finds the live policy attached to a resource of kind `T`.
    fn attached_policy<T: Resource<DynamicType = ()>>(
        &self,
        target: &ResourceId,
    ) -> Option<ResourceId> {
        self.policies
            .iter()
            .find(|(id, policy)| {
                !policy.is_deleting()
                    && policy.spec.target_ref.targets::<T>(
                        &target.namespace,
                        &target.name,
                        &id.namespace,
                    )
            })
            .map(|(id, _)| id.clone())
    }
}

/// Stands in for a policy that was deleted before it was observed, so that
/// artifacts left behind by it are still swept.
fn placeholder(id: &ResourceId) -> AuthPolicy {
    AuthPolicy {
        metadata: ObjectMeta {
            namespace: Some(id.namespace.clone()),
            name: Some(id.name.clone()),
            ..ObjectMeta::default()
        },
        spec: AuthPolicySpec {
            target_ref: PolicyTargetRef {
                group: String::new(),
                kind: String::new(),
                name: String::new(),
                namespace: None,
                section_name: None,
            },
            rules: Default::default(),
        },
    }
}

fn artifact_ref(sp: &SecurityPolicy) -> Option<ArtifactRef> {
    let labels = sp.labels();
    let get = |key: &str| labels.get(key).cloned();
    Some(ArtifactRef {
        policy: ResourceId::new(get(labels::AUTH_POLICY_NAMESPACE)?, get(labels::AUTH_POLICY)?),
        gateway: ResourceId::new(get(labels::GATEWAY_NAMESPACE)?, get(labels::GATEWAY)?),
    })
}

impl kubert::index::IndexNamespacedResource<AuthPolicy> for Index {
    fn apply(&mut self, policy: AuthPolicy) {
        let id = ResourceId::of(&policy);
        self.deleted.remove(&id);
        self.policies.insert(id, Arc::new(policy));
        self.reconcile();
    }

    fn delete(&mut self, namespace: String, name: String) {
        let id = ResourceId::new(namespace, name);
        if let Some(policy) = self.policies.remove(&id) {
            self.deleted.insert(id, policy);
        }
        self.reconcile();
    }
}

impl kubert::index::IndexNamespacedResource<Gateway> for Index {
    fn apply(&mut self, gateway: Gateway) {
        let authorizer_ns = gateway
            .annotations()
            .get(labels::KUADRANT_NAMESPACE)
            .cloned();
        self.gateways.insert(ResourceId::of(&gateway), authorizer_ns);
        self.reconcile();
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.gateways.remove(&ResourceId::new(namespace, name));
        self.reconcile();
    }
}

impl kubert::index::IndexNamespacedResource<HTTPRoute> for Index {
    fn apply(&mut self, route: HTTPRoute) {
        let id = ResourceId::of(&route);
        let state = RouteState::from_resource(&route, &id.namespace);
        self.routes.insert(id, state);
        self.reconcile();
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.routes.remove(&ResourceId::new(namespace, name));
        self.reconcile();
    }
}

impl kubert::index::IndexNamespacedResource<SecurityPolicy> for Index {
    fn apply(&mut self, sp: SecurityPolicy) {
        let id = ResourceId::of(&sp);
        match artifact_ref(&sp) {
            Some(owner) => {
                self.artifacts.insert(id, owner);
            }
            None => {
                tracing::debug!(artifact = %id, "Ignoring SecurityPolicy without owner labels");
                self.artifacts.remove(&id);
            }
        }
        self.reconcile();
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.artifacts.remove(&ResourceId::new(namespace, name));
        self.reconcile();
    }
}

impl SizedIndex<AuthPolicy> for Index {
    fn size(&self, namespace: &str) -> usize {
        self.policies
            .keys()
            .filter(|id| id.namespace == namespace)
            .count()
    }
}

impl SizedIndex<Gateway> for Index {
    fn size(&self, namespace: &str) -> usize {
        self.gateways
            .keys()
            .filter(|id| id.namespace == namespace)
            .count()
    }
}

impl SizedIndex<HTTPRoute> for Index {
    fn size(&self, namespace: &str) -> usize {
        self.routes
            .keys()
            .filter(|id| id.namespace == namespace)
            .count()
    }
}

impl SizedIndex<SecurityPolicy> for Index {
    fn size(&self, namespace: &str) -> usize {
        self.artifacts
            .keys()
            .filter(|id| id.namespace == namespace)
            .count()
    }
}
