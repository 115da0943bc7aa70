//! State and control trajectories
//!
//! A [`Trajectory`] over a horizon of N stages holds N+1 states and N
//! controls. The invariant is checked on construction and on
//! deserialization, so every value of the type satisfies it.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrajectoryError {
    #[error("Expected {expected} states for {controls} controls, got {got}")]
    LengthMismatch {
        controls: usize,
        expected: usize,
        got: usize,
    },
    #[error("{quantity} {index} has dimension {got}, expected {expected}")]
    InconsistentDimension {
        quantity: &'static str,
        index: usize,
        expected: usize,
        got: usize,
    },
}

/// N+1 states and N controls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TrajectoryData", into = "TrajectoryData")]
pub struct Trajectory {
    states: Vec<DVector<f64>>,
    controls: Vec<DVector<f64>>,
}

impl Trajectory {
    pub fn new(
        states: Vec<DVector<f64>>,
        controls: Vec<DVector<f64>>,
    ) -> Result<Self, TrajectoryError> {
        if states.len() != controls.len() + 1 {
            return Err(TrajectoryError::LengthMismatch {
                controls: controls.len(),
                expected: controls.len() + 1,
                got: states.len(),
            });
        }
        check_uniform("state", &states)?;
        check_uniform("control", &controls)?;

        Ok(Self { states, controls })
    }

    /// `x0` held over the horizon with zero controls
    pub fn constant(x0: &DVector<f64>, nu: usize, horizon: usize) -> Self {
        Self {
            states: vec![x0.clone(); horizon + 1],
            controls: vec![DVector::zeros(nu); horizon],
        }
    }

    /// Built from parts whose shape the caller guarantees
    pub(crate) fn from_parts(states: Vec<DVector<f64>>, controls: Vec<DVector<f64>>) -> Self {
        debug_assert_eq!(states.len(), controls.len() + 1);
        Self { states, controls }
    }

    /// Number of stages N
    pub fn horizon(&self) -> usize {
        self.controls.len()
    }

    pub fn states(&self) -> &[DVector<f64>] {
        &self.states
    }

    pub fn controls(&self) -> &[DVector<f64>] {
        &self.controls
    }

    pub fn initial_state(&self) -> &DVector<f64> {
        &self.states[0]
    }

    pub fn terminal_state(&self) -> &DVector<f64> {
        &self.states[self.states.len() - 1]
    }

    /// u_0, the control applied next; `None` for an empty horizon
    pub fn first_control(&self) -> Option<&DVector<f64>> {
        self.controls.first()
    }

    /// Time stamp of every state for the sampling time `dt`
    pub fn times(&self, dt: f64) -> Vec<f64> {
        (0..self.states.len()).map(|k| k as f64 * dt).collect()
    }

    pub fn into_parts(self) -> (Vec<DVector<f64>>, Vec<DVector<f64>>) {
        (self.states, self.controls)
    }
}

fn check_uniform(quantity: &'static str, vectors: &[DVector<f64>]) -> Result<(), TrajectoryError> {
    let Some(expected) = vectors.first().map(|v| v.len()) else {
        return Ok(());
    };
    for (index, v) in vectors.iter().enumerate() {
        if v.len() != expected {
            return Err(TrajectoryError::InconsistentDimension {
                quantity,
                index,
                expected,
                got: v.len(),
            });
        }
    }
    Ok(())
}

/// Serialized form: nested arrays, one per stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryData {
    pub states: Vec<Vec<f64>>,
    pub controls: Vec<Vec<f64>>,
}

impl TryFrom<TrajectoryData> for Trajectory {
    type Error = TrajectoryError;

    fn try_from(data: TrajectoryData) -> Result<Self, Self::Error> {
        let to_vectors = |rows: Vec<Vec<f64>>| -> Vec<DVector<f64>> {
            rows.into_iter().map(DVector::from_vec).collect()
        };
        Trajectory::new(to_vectors(data.states), to_vectors(data.controls))
    }
}

impl From<Trajectory> for TrajectoryData {
    fn from(trajectory: Trajectory) -> Self {
        let to_rows = |vectors: Vec<DVector<f64>>| -> Vec<Vec<f64>> {
            vectors.into_iter().map(|v| v.as_slice().to_vec()).collect()
        };
        let (states, controls) = trajectory.into_parts();
        Self {
            states: to_rows(states),
            controls: to_rows(controls),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::dvector;

    #[test]
    fn test_constant_trajectory() {
        let x0 = dvector![1.0, 2.0, 0.0, 0.0, 0.0, 0.0];
        let traj = Trajectory::constant(&x0, 2, 4);

        assert_eq!(traj.horizon(), 4);
        assert_eq!(traj.states().len(), 5);
        assert_eq!(traj.terminal_state(), &x0);
        assert_eq!(traj.first_control(), Some(&DVector::zeros(2)));
    }

    #[test]
    fn test_length_invariant() {
        let err = Trajectory::new(vec![DVector::zeros(2); 3], vec![DVector::zeros(1); 3]).unwrap_err();
        assert_eq!(
            err,
            TrajectoryError::LengthMismatch { controls: 3, expected: 4, got: 3 }
        );
    }

    #[test]
    fn test_dimension_invariant() {
        let states = vec![DVector::zeros(2), DVector::zeros(3)];
        let err = Trajectory::new(states, vec![DVector::zeros(1)]).unwrap_err();
        assert!(matches!(
            err,
            TrajectoryError::InconsistentDimension { quantity: "state", index: 1, .. }
        ));
    }

    #[test]
    fn test_times() {
        let traj = Trajectory::constant(&DVector::zeros(2), 1, 3);
        let times = traj.times(0.05);
        assert_eq!(times.len(), 4);
        assert_relative_eq!(times[3], 0.15, epsilon = 1e-12);
    }

    #[test]
    fn test_json_round_trip_rejects_bad_shape() {
        let traj = Trajectory::constant(&dvector![1.0, 2.0], 1, 2);
        let json = serde_json::to_string(&traj).unwrap();
        assert_eq!(json, r#"{"states":[[1.0,2.0],[1.0,2.0],[1.0,2.0]],"controls":[[0.0],[0.0]]}"#);

        let parsed: Trajectory = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, traj);

        let bad = r#"{"states":[[1.0]],"controls":[[0.0]]}"#;
        assert!(serde_json::from_str::<Trajectory>(bad).is_err());
    }
}
