use std::collections::BTreeMap;

/// Names the authorizer (control-plane) namespace. Used as an annotation on
/// policies and gateways and as a label on enforcement artifacts.
pub const KUADRANT_NAMESPACE: &str = "kuadrant.io/namespace";

/// Labels recording the policy that owns an enforcement artifact.
pub const AUTH_POLICY: &str = "kuadrant.io/authpolicy";
pub const AUTH_POLICY_NAMESPACE: &str = "kuadrant.io/authpolicy-namespace";

/// Labels recording the gateway an enforcement artifact was synthesized for.
pub const GATEWAY: &str = "kuadrant.io/gateway";
pub const GATEWAY_NAMESPACE: &str = "kuadrant.io/gateway-namespace";

/// Annotation listing the routes whose rules an enforcement artifact covers.
pub const ROUTES: &str = "kuadrant.io/routes";

pub type Map = BTreeMap<String, String>;

/// An equality-based label selector.
///
/// Every label in the selector must be present, with the same value, on a
/// matching resource. An empty selector matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Selector(Map);

// === impl Selector ===

impl Selector {
    pub fn from_map(map: Map) -> Self {
        Self(map)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, labels: Option<&Map>) -> bool {
        self.0
            .iter()
            .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

impl std::iter::FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// Selects the enforcement artifacts owned by a policy for one gateway.
pub fn artifact_selector(
    policy_ns: &str,
    policy: &str,
    gateway_ns: &str,
    gateway: &str,
) -> Selector {
    Selector::from_map(
        [
            (AUTH_POLICY, policy),
            (AUTH_POLICY_NAMESPACE, policy_ns),
            (GATEWAY, gateway),
            (GATEWAY_NAMESPACE, gateway_ns),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
    )
}

/// Selects every enforcement artifact that references the authorizer in the
/// given namespace.
pub fn authorizer_selector(authorizer_ns: &str) -> Selector {
    std::iter::once((KUADRANT_NAMESPACE.to_string(), authorizer_ns.to_string())).collect()
}
