use authpolicy_controller_core::ResourceId;
use authpolicy_controller_k8s_api::gateway::{HTTPRoute, HTTPRouteStatusParents};

const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";

/// The parts of an `HTTPRoute` that affect enforcement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RouteState {
    pub(crate) rules: usize,

    /// The gateways the route references, sorted and without duplicates.
    pub(crate) parents: Vec<ResourceId>,

    /// The referenced gateways that report the route as accepted.
    accepted: Vec<ResourceId>,
}

impl RouteState {
    pub(crate) fn from_resource(route: &HTTPRoute, namespace: &str) -> Self {
        let mut parents = route
            .spec
            .parent_refs
            .iter()
            .flatten()
            .filter(|parent| is_gateway(parent.group.as_deref(), parent.kind.as_deref()))
            .map(|parent| {
                ResourceId::new(
                    parent.namespace.as_deref().unwrap_or(namespace),
                    parent.name.clone(),
                )
            })
            .collect::<Vec<_>>();
        parents.sort();
        parents.dedup();

        // A status entry may outlive the parent reference it was written for.
        let mut accepted = route
            .status
            .iter()
            .flat_map(|status| status.parents.iter())
            .filter(|status| is_accepted(status))
            .filter(|status| {
                let parent = &status.parent_ref;
                is_gateway(parent.group.as_deref(), parent.kind.as_deref())
            })
            .map(|status| {
                ResourceId::new(
                    status.parent_ref.namespace.as_deref().unwrap_or(namespace),
                    status.parent_ref.name.clone(),
                )
            })
            .filter(|gateway| parents.binary_search(gateway).is_ok())
            .collect::<Vec<_>>();
        accepted.sort();
        accepted.dedup();

        Self {
            rules: route.spec.rules.as_ref().map_or(0, Vec::len),
            parents,
            accepted,
        }
    }

    /// Indicates whether `gateway` has accepted the route.
    pub(crate) fn attaches_to(&self, gateway: &ResourceId) -> bool {
        self.accepted.binary_search(gateway).is_ok()
    }
}

// Parent references default to the Gateway kind of the Gateway API group.
fn is_gateway(group: Option<&str>, kind: Option<&str>) -> bool {
    let group = group.unwrap_or(GATEWAY_API_GROUP);
    let kind = kind.unwrap_or("Gateway");
    group.eq_ignore_ascii_case(GATEWAY_API_GROUP) && kind.eq_ignore_ascii_case("Gateway")
}

fn is_accepted(status: &HTTPRouteStatusParents) -> bool {
    status
        .conditions
        .iter()
        .flatten()
        .any(|c| c.type_ == "Accepted" && c.status == "True")
}
