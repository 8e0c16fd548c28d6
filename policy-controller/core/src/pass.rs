use crate::ResourceId;
use authpolicy_controller_k8s_api::policy::AuthPolicy;
use std::{collections::BTreeSet, sync::Arc};

/// A unit of convergence work: one policy, its resolved target, and the
/// gateways relevant to it.
#[derive(Clone, Debug, PartialEq)]
pub struct Pass {
    pub policy: Arc<AuthPolicy>,

    /// The policy's target, or `None` if it does not exist (or the policy has
    /// been deleted).
    pub target: Option<Target>,

    pub gateways: GatewayClassification,

    /// Increases with every pass computed for the same policy.
    pub generation: u64,
}

/// The resource a policy is attached to.
#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    Gateway {
        /// Routes accepted by the gateway.
        routes: Vec<RouteInfo>,
    },
    Route(RouteInfo),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RouteInfo {
    pub id: ResourceId,

    /// The policy directly attached to the route, if any.
    pub policy: Option<ResourceId>,

    /// The number of rules declared by the route. A route without rules is
    /// still routable through a single implicit rule.
    pub rules: usize,

    pub parents: Vec<ResourceId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GatewayInfo {
    pub id: ResourceId,

    /// The policy directly attached to the gateway, if any.
    pub policy: Option<ResourceId>,

    /// The control plane namespace that owns the gateway, if annotated.
    pub authorizer_namespace: Option<String>,
}

/// Partitions the gateways relevant to a policy.
///
/// `valid` gateways are in scope and already have an artifact; `missing`
/// gateways are in scope without one; `invalid` gateways have an artifact but
/// are no longer in scope. A gateway belongs to at most one of these sets.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GatewayClassification {
    valid: Vec<GatewayInfo>,
    missing: Vec<GatewayInfo>,
    invalid: Vec<ResourceId>,
}

#[derive(Debug, thiserror::Error)]
#[error("gateway {0} is classified more than once")]
pub struct OverlappingClassification(pub ResourceId);

// === impl RouteInfo ===

impl RouteInfo {
    pub(crate) fn effective_rules(&self) -> usize {
        self.rules.max(1)
    }
}

// === impl GatewayClassification ===

impl GatewayClassification {
    pub fn new(
        valid: Vec<GatewayInfo>,
        missing: Vec<GatewayInfo>,
        invalid: Vec<ResourceId>,
    ) -> Result<Self, OverlappingClassification> {
        let mut seen = BTreeSet::new();
        let ids = valid
            .iter()
            .chain(missing.iter())
            .map(|gw| &gw.id)
            .chain(invalid.iter());
        for id in ids {
            if !seen.insert(id) {
                return Err(OverlappingClassification(id.clone()));
            }
        }
        Ok(Self {
            valid,
            missing,
            invalid,
        })
    }

    pub fn valid(&self) -> &[GatewayInfo] {
        &self.valid
    }

    pub fn missing(&self) -> &[GatewayInfo] {
        &self.missing
    }

    pub fn invalid(&self) -> &[ResourceId] {
        &self.invalid
    }

    /// Iterates over the gateways that should carry an artifact.
    pub fn in_scope(&self) -> impl Iterator<Item = &GatewayInfo> + '_ {
        self.valid.iter().chain(self.missing.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.valid.is_empty() && self.missing.is_empty() && self.invalid.is_empty()
    }
}
