//! AuthPolicy classifier index
//!
//! The index watches the resources that determine where an `AuthPolicy` must
//! be enforced and turns them into convergence work:
//!
//! - Each `AuthPolicy` targets a `Gateway` or an `HTTPRoute` in its namespace.
//! - Each `HTTPRoute` attaches to one or more parent `Gateway`s.
//! - Each `Gateway` may be annotated with the namespace of the authorizer that
//!   serves it.
//! - Each `SecurityPolicy` synthesized by the controller is labeled with the
//!   policy and gateway it was synthesized for.
//!
//! ```text
//! [ AuthPolicy ] -> [ HTTPRoute ] -> [ Gateway ] <- [ SecurityPolicy ]
//!        \_______________________________^
//! ```
//!
//! Whenever any of these change, the index recomputes a [`Pass`] for every
//! policy, classifying gateways by comparing the gateways the policy should be
//! enforced at against the artifacts that exist. Passes that differ from the
//! last one queued for the policy are sent to the controller.
//!
//! A separate [`KuadrantIndex`] tracks control plane installations and drives
//! the mesh registrar.
//!
//! [`Pass`]: authpolicy_controller_core::Pass

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod index;
mod kuadrant;
pub mod metrics;
mod route;


pub use self::{
    index::{Index, SharedIndex},
    kuadrant::{KuadrantIndex, SharedKuadrantIndex},
    metrics::{IndexMetrics, PassMetrics},
};
