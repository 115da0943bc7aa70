//! Dynamics models
//!
//! - [`DynamicsModel`]: the model interface and everything derived from a vector field
//! - [`RocketXzModel`]: gimballed single-engine rocket
//! - [`DroneXzModel`]: bi-rotor drone

pub mod model;
pub mod rocket;
pub mod drone;

pub use model::*;
pub use rocket::*;
pub use drone::*;
