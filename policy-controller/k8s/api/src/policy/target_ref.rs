use super::targets_kind;

/// Identifies the routing target a policy attaches to.
///
/// Policies may only target resources in their own namespace unless
/// `namespace` is set explicitly.
#[derive(
    Clone, Debug, Eq, PartialEq, Hash, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTargetRef {
    pub group: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
}

impl PolicyTargetRef {
    /// Returns the target ref kind, qualified by its group, if necessary.
    pub fn canonical_kind(&self) -> String {
        if self.group.is_empty() {
            self.kind.clone()
        } else {
            format!("{}.{}", self.kind, self.group)
        }
    }

    /// Checks whether the target references the given resource type
    pub fn targets_kind<T>(&self) -> bool
    where
        T: kube::Resource,
        T::DynamicType: Default,
    {
        targets_kind::<T>(Some(&self.group), &self.kind)
    }

    /// Returns the namespace of the target, defaulting to the policy's.
    pub fn namespace_or<'a>(&'a self, local_ns: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(local_ns)
    }

    /// Checks whether the target references the resource of type `T` named
    /// `namespace/name`. `local_ns` is the namespace of the policy.
    pub fn targets<T>(&self, namespace: &str, name: &str, local_ns: &str) -> bool
    where
        T: kube::Resource,
        T::DynamicType: Default,
    {
        self.targets_kind::<T>() && self.namespace_or(local_ns) == namespace && self.name == name
    }
}
