#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use authpolicy_controller_core as core;
pub use authpolicy_controller_k8s_api as k8s;
pub use authpolicy_controller_k8s_converge as converge;
pub use authpolicy_controller_k8s_index as index;
pub use authpolicy_controller_k8s_mesh as mesh;

mod args;

pub use self::args::Args;
