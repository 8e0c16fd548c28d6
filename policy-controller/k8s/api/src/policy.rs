pub mod auth_policy;
pub mod kuadrant;
pub mod target_ref;

pub use self::{
    auth_policy::{AuthPolicy, AuthPolicySpec},
    kuadrant::{Kuadrant, KuadrantSpec},
    target_ref::PolicyTargetRef,
};

fn targets_kind<T>(group: Option<&str>, kind: &str) -> bool
where
    T: kube::Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();

    let mut t_group = &*T::group(&dt);
    if t_group.is_empty() {
        t_group = "core";
    }

    let group = match group {
        Some(g) if !g.is_empty() => g,
        _ => "core",
    };

    group.eq_ignore_ascii_case(t_group) && kind.eq_ignore_ascii_case(&T::kind(&dt))
}
