//! Reference Scenarios
//!
//! Named point-to-point problems: a model, a configuration, an initial
//! state and a goal. Used by the `open_loop` demo and the integration tests.
//!
//! States are ordered `[x, z, vx, vz, pitch, pitch_rate]` for both models.

use std::sync::Arc;

use nalgebra::{dvector, DVector};
use planar_core::{DroneXzModel, DynamicsModel, RocketXzModel};

use crate::config::{ConfigError, OcpConfig};
use crate::optimizer::{OptimizerError, TrajectoryOptimizer};

/// Sampling time shared by all presets [s]
pub const SCENARIO_SAMPLING_TIME: f64 = 0.05;

/// One point-to-point trajectory optimization problem
#[derive(Debug, Clone)]
pub struct Scenario<M> {
    pub name: &'static str,
    pub model: Arc<M>,
    pub config: Arc<OcpConfig>,
    pub initial_state: DVector<f64>,
    pub goal: DVector<f64>,
}

impl<M: DynamicsModel> Scenario<M> {
    /// A configured optimizer for this scenario, sharing its model and config
    pub fn optimizer(&self) -> Result<TrajectoryOptimizer<M>, OptimizerError> {
        let mut optimizer = TrajectoryOptimizer::new(Arc::clone(&self.model), Arc::clone(&self.config))?;
        optimizer.setup()?;
        Ok(optimizer)
    }

    /// The same problem over a different number of stages
    pub fn with_horizon(self, horizon: usize) -> Result<Self, ConfigError> {
        let params = self.config.params().clone().with_horizon(horizon);
        Ok(Self {
            config: Arc::new(OcpConfig::try_from(params)?),
            ..self
        })
    }
}

impl Scenario<RocketXzModel> {
    /// Rocket from rest at the origin to hover at (3, 3) m
    ///
    /// 50 stages of 0.05 s, thrust in [0, 15] N, gimbal in [-0.5, 0.5] rad.
    pub fn rocket_climb_and_translate() -> Result<Self, ConfigError> {
        Ok(Self {
            name: "rocket_climb_and_translate",
            model: Arc::new(RocketXzModel::new(SCENARIO_SAMPLING_TIME)),
            config: Arc::new(OcpConfig::rocket(SCENARIO_SAMPLING_TIME)?),
            initial_state: DVector::zeros(RocketXzModel::NX),
            goal: dvector![3.0, 3.0, 0.0, 0.0, 0.0, 0.0],
        })
    }

    /// Rocket straight up by 2 m; the gimbal should stay centred
    pub fn rocket_vertical_hop() -> Result<Self, ConfigError> {
        Ok(Self {
            name: "rocket_vertical_hop",
            model: Arc::new(RocketXzModel::new(SCENARIO_SAMPLING_TIME)),
            config: Arc::new(OcpConfig::rocket(SCENARIO_SAMPLING_TIME)?),
            initial_state: DVector::zeros(RocketXzModel::NX),
            goal: dvector![0.0, 2.0, 0.0, 0.0, 0.0, 0.0],
        })
    }
}

impl Scenario<DroneXzModel> {
    /// Bi-rotor drone lifted 1 m and moved 1 m sideways
    pub fn drone_lift() -> Result<Self, ConfigError> {
        Ok(Self {
            name: "drone_lift",
            model: Arc::new(DroneXzModel::new(SCENARIO_SAMPLING_TIME)),
            config: Arc::new(OcpConfig::drone(SCENARIO_SAMPLING_TIME)?),
            initial_state: DVector::zeros(DroneXzModel::NX),
            goal: dvector![1.0, 1.0, 0.0, 0.0, 0.0, 0.0],
        })
    }
}
