//! Planar rocket with a gimballed main engine
//!
//! State x = (pₓ, p_z, vₓ, v_z, θ, ω), control u = (T, δ):
//!
//! ṗₓ = vₓ
//! ṗ_z = v_z
//! v̇ₓ = -T sin(θ + δ) / m
//! v̇_z = -g + T cos(θ + δ) / m
//! θ̇  = ω
//! ω̇  = -T sin(δ) · l / J
//!
//! where:
//! - T: engine thrust along the gimballed nozzle
//! - δ: gimbal angle relative to the body axis
//! - l: distance from the center of mass to the gimbal pivot
//! - J: pitch moment of inertia

use num_dual::DualNum;
use serde::{Deserialize, Serialize};

use super::DynamicsModel;
use crate::GRAVITY;

/// Rocket physical parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocketXzParams {
    /// Mass [kg]
    pub mass: f64,
    /// Pitch moment of inertia [kg·m²]
    pub inertia: f64,
    /// Gimbal lever arm [m]
    pub lever_arm: f64,
    /// Gravity acceleration [m/s²]
    pub gravity: f64,
}

impl Default for RocketXzParams {
    fn default() -> Self {
        Self {
            mass: 1.0,
            inertia: 0.1,
            lever_arm: 0.5,
            gravity: GRAVITY,
        }
    }
}

impl RocketXzParams {
    /// Thrust that balances gravity with a vertical body and centered gimbal
    pub fn hover_thrust(&self) -> f64 {
        self.mass * self.gravity
    }
}

/// Rocket dynamics model
#[derive(Debug, Clone)]
pub struct RocketXzModel {
    pub params: RocketXzParams,
    sampling_time: f64,
}

impl RocketXzModel {
    pub const NX: usize = 6;
    pub const NU: usize = 2;

    /// Create a model with default parameters
    pub fn new(sampling_time: f64) -> Self {
        Self::with_params(sampling_time, RocketXzParams::default())
    }

    pub fn with_params(sampling_time: f64, params: RocketXzParams) -> Self {
        Self {
            params,
            sampling_time,
        }
    }
}

impl DynamicsModel for RocketXzModel {
    fn name(&self) -> &str {
        "RocketXzModel"
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
        let (thrust, gimbal) = (u[0], u[1]);
        let heading = x[4] + gimbal;

        vec![
            x[2],
            x[3],
            -(thrust * heading.sin()) / p.mass,
            thrust * heading.cos() / p.mass - p.gravity,
            x[5],
            -(thrust * gimbal.sin()) * (p.lever_arm / p.inertia),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{DVector, dvector};

    use crate::DynamicsError;

    #[test]
    fn test_hover_is_equilibrium() {
        let model = RocketXzModel::new(0.05);
        let x = dvector![1.0, 2.0, 0.0, 0.0, 0.0, 0.0];
        let u = dvector![model.params.hover_thrust(), 0.0];

        let x_dot = model.continuous_dynamics(&x, &u).unwrap();
        assert_relative_eq!(x_dot.norm(), 0.0, epsilon = 1e-12);

        let x_next = model.discrete_step(&x, &u).unwrap();
        assert_relative_eq!(x_next, x, epsilon = 1e-12);
    }

    #[test]
    fn test_free_fall_step() {
        let dt = 0.1;
        let model = RocketXzModel::new(dt);
        let x = DVector::zeros(6);
        let u = DVector::zeros(2);

        let x_next = model.discrete_step(&x, &u).unwrap();
        assert_relative_eq!(x_next[1], -0.5 * GRAVITY * dt * dt, epsilon = 1e-12);
        assert_relative_eq!(x_next[3], -GRAVITY * dt, epsilon = 1e-12);
        assert_relative_eq!(x_next[0], 0.0);
    }

    #[test]
    fn test_gimbal_pitches_nose_down() {
        let model = RocketXzModel::new(0.05);
        let x = DVector::zeros(6);
        let u = dvector![10.0, 0.1];

        let x_dot = model.continuous_dynamics(&x, &u).unwrap();
        // Positive gimbal deflection produces negative pitch acceleration
        assert!(x_dot[5] < 0.0);
        // and pushes the vehicle toward -x
        assert!(x_dot[2] < 0.0);
    }

    #[test]
    fn test_continuous_jacobian_analytic() {
        let model = RocketXzModel::new(0.05);
        let (theta, delta, thrust) = (0.2, -0.1, 12.0);
        let x = dvector![0.0, 0.0, 0.0, 0.0, theta, 0.0];
        let u = dvector![thrust, delta];
        let p = &model.params;

        let a = model.jacobian_wrt_state(&x, &u).unwrap();
        let b = model.jacobian_wrt_control(&x, &u).unwrap();

        assert_eq!(a.shape(), (6, 6));
        assert_eq!(b.shape(), (6, 2));
        assert_relative_eq!(a[(0, 2)], 1.0);
        assert_relative_eq!(a[(4, 5)], 1.0);
        assert_relative_eq!(a[(2, 4)], -thrust * (theta + delta).cos() / p.mass, epsilon = 1e-12);
        assert_relative_eq!(b[(3, 0)], (theta + delta).cos() / p.mass, epsilon = 1e-12);
        assert_relative_eq!(
            b[(5, 1)],
            -thrust * delta.cos() * p.lever_arm / p.inertia,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_dimension_mismatch() {
        let model = RocketXzModel::new(0.05);
        let err = model
            .discrete_step(&DVector::zeros(5), &DVector::zeros(2))
            .unwrap_err();
        assert_eq!(
            err,
            DynamicsError::DimensionMismatch { quantity: "state", expected: 6, got: 5 }
        );

        let err = model
            .continuous_dynamics(&DVector::zeros(6), &DVector::zeros(3))
            .unwrap_err();
        assert_eq!(
            err,
            DynamicsError::DimensionMismatch { quantity: "control", expected: 2, got: 3 }
        );
    }
}
