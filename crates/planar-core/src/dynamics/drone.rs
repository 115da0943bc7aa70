//! Planar bi-rotor drone
//!
//! State x = (pₓ, p_z, vₓ, v_z, θ, ω), control u = (f_l, f_r):
//!
//! v̇ₓ = -(f_l + f_r) sin θ / m
//! v̇_z = -g + (f_l + f_r) cos θ / m
//! ω̇  = (f_r - f_l) · d / J
//!
//! with both rotors mounted at distance d from the center of mass.

use num_dual::DualNum;
use serde::{Deserialize, Serialize};

use super::DynamicsModel;
use crate::GRAVITY;

/// Drone physical parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroneXzParams {
    /// Mass [kg]
    pub mass: f64,
    /// Pitch moment of inertia [kg·m²]
    pub inertia: f64,
    /// Rotor arm length [m]
    pub arm_length: f64,
    /// Gravity acceleration [m/s²]
    pub gravity: f64,
}

impl Default for DroneXzParams {
    fn default() -> Self {
        Self {
            mass: 0.5,
            inertia: 0.04,
            arm_length: 0.2,
            gravity: GRAVITY,
        }
    }
}

impl DroneXzParams {
    /// Per-rotor thrust for hover
    pub fn hover_thrust(&self) -> f64 {
        0.5 * self.mass * self.gravity
    }
}

/// Drone dynamics model
#[derive(Debug, Clone)]
pub struct DroneXzModel {
    pub params: DroneXzParams,
    sampling_time: f64,
}

impl DroneXzModel {
    pub const NX: usize = 6;
    pub const NU: usize = 2;

    pub fn new(sampling_time: f64) -> Self {
        Self::with_params(sampling_time, DroneXzParams::default())
    }

    pub fn with_params(sampling_time: f64, params: DroneXzParams) -> Self {
        Self {
            params,
            sampling_time,
        }
    }
}

impl DynamicsModel for DroneXzModel {
    fn name(&self) -> &str {
        "DroneXzModel"
    }

    fn nx(&self) -> usize {
        Self::NX
    }

    fn nu(&self) -> usize {
        Self::NU
    }

    fn sampling_time(&self) -> f64 {
        self.sampling_time
    }

    fn vector_field<D: DualNum<f64> + Copy>(&self, x: &[D], u: &[D]) -> Vec<D> {
        let p = &self.params;
        let total = u[0] + u[1];

        vec![
            x[2],
            x[3],
            -(total * x[4].sin()) / p.mass,
            total * x[4].cos() / p.mass - p.gravity,
            x[5],
            (u[1] - u[0]) * (p.arm_length / p.inertia),
        ]
    }
}
