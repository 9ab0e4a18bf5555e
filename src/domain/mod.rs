//! Domain layer: models, ports, and error taxonomies.

pub mod errors;
pub mod models;
pub mod ports;
