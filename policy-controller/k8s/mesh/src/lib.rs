#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod error;
mod metrics;
mod registrar;
mod representation;


pub use self::{
    error::Error,
    metrics::RegistrarMetrics,
    registrar::{Event, Mesh, MeshSettings, Registrar, Registration},
    representation::Representation,
};
