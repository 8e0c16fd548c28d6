#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod controller;
mod converge;
mod error;
mod grant;
mod metrics;
mod reconcile;

#[cfg(test)]
mod tests;

pub use self::{
    controller::Controller,
    converge::{converge, merge_security_policy, Report, Write},
    error::Error,
    grant::{reconcile_grant, GrantMode},
    metrics::ControllerMetrics,
    reconcile::{reconcile_resource, Outcome},
};
