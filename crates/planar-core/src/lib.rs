//! # Planar Core
//!
//! Rigid-body dynamics for vehicles moving in a vertical (x-z) plane.
//!
//! This library provides the physical models consumed by the trajectory
//! optimizer in `planar-planner`: a continuous vector field, its one-step
//! discretization, and derivatives of both obtained by forward-mode
//! automatic differentiation.
//!
//! ## Modules
//!
//! - [`math`]: Numerical integration and dual-number differentiation
//! - [`dynamics`]: The [`DynamicsModel`](dynamics::DynamicsModel) trait and concrete models

pub mod math;
pub mod dynamics;

pub use dynamics::{DynamicsError, DynamicsModel, DroneXzModel, RocketXzModel};

/// Gravity constant [m/s²]
pub const GRAVITY: f64 = 9.81;
