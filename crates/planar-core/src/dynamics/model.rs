//! Dynamics model interface
//!
//! A model supplies its continuous vector field once, generically over
//! dual-number scalars. Everything else (the discrete one-step map,
//! continuous and discrete Jacobians, second derivatives for the NLP
//! Hessian and open-loop playback) is derived from it here.
//!
//! ```text
//! ẋ       = f(x, u)
//! x_{k+1} = F(x_k, u_k)   (one RK4 step over the sampling time)
//! ```

use nalgebra::{DMatrix, DVector};
use num_dual::DualNum;
use thiserror::Error;

use crate::math::{jacobian, rk4, weighted_hessian, DifferentiableMap};

/// Dynamics evaluation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DynamicsError {
    #[error("Invalid {quantity} dimension: expected {expected}, got {got}")]
    DimensionMismatch {
        quantity: &'static str,
        expected: usize,
        got: usize,
    },
}

/// Physical model of a planar vehicle
///
/// Implementations are pure: every method is a function of its
/// arguments and the model's immutable parameters, so a single model can be
/// shared read-only between any number of optimizers and threads.
pub trait DynamicsModel: Send + Sync + Sized {
    /// Human-readable model name
    fn name(&self) -> &str;

    /// State dimension
    fn nx(&self) -> usize;

    /// Control dimension
    fn nu(&self) -> usize;

    /// Sampling period of the discrete map [s]
    fn sampling_time(&self) -> f64;

    /// Continuous vector field ẋ = f(x, u)
    ///
    /// `x` and `u` always have lengths `nx()` and `nu()`.
    fn vector_field<D: DualNum<f64> + Copy>(&self, x: &[D], u: &[D]) -> Vec<D>;

    /// Discrete map x_{k+1} = F(x_k, u_k): a single RK4 step spanning the
    /// sampling period with the control held constant
    fn step<D: DualNum<f64> + Copy>(&self, x: &[D], u: &[D]) -> Vec<D> {
        rk4(x, self.sampling_time(), |xs| self.vector_field(xs, u))
    }

    /// Fail fast on wrongly sized state/control vectors
    fn check_dimensions(&self, x: &[f64], u: &[f64]) -> Result<(), DynamicsError> {
        if x.len() != self.nx() {
            return Err(DynamicsError::DimensionMismatch {
                quantity: "state",
                expected: self.nx(),
                got: x.len(),
            });
        }
        if u.len() != self.nu() {
            return Err(DynamicsError::DimensionMismatch {
                quantity: "control",
                expected: self.nu(),
                got: u.len(),
            });
        }
        Ok(())
    }

    /// Evaluate ẋ = f(x, u)
    fn continuous_dynamics(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<DVector<f64>, DynamicsError> {
        self.check_dimensions(x.as_slice(), u.as_slice())?;
        Ok(DVector::from_vec(self.vector_field(x.as_slice(), u.as_slice())))
    }

    /// Advance the state by exactly one sampling period
    fn discrete_step(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<DVector<f64>, DynamicsError> {
        self.check_dimensions(x.as_slice(), u.as_slice())?;
        Ok(DVector::from_vec(self.step(x.as_slice(), u.as_slice())))
    }

    /// ∂f/∂x (nx × nx)
    fn jacobian_wrt_state(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<DMatrix<f64>, DynamicsError> {
        self.check_dimensions(x.as_slice(), u.as_slice())?;
        let jac = jacobian(&ContinuousMap::new(self), &stack(x.as_slice(), u.as_slice()));
        Ok(jac.columns(0, self.nx()).into_owned())
    }

    /// ∂f/∂u (nx × nu)
    fn jacobian_wrt_control(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<DMatrix<f64>, DynamicsError> {
        self.check_dimensions(x.as_slice(), u.as_slice())?;
        let jac = jacobian(&ContinuousMap::new(self), &stack(x.as_slice(), u.as_slice()));
        Ok(jac.columns(self.nx(), self.nu()).into_owned())
    }

    /// ∂F/∂x (nx × nx), the discrete-time A matrix
    fn discrete_jacobian_wrt_state(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<DMatrix<f64>, DynamicsError> {
        self.check_dimensions(x.as_slice(), u.as_slice())?;
        let jac = self.discrete_step_jacobian(x.as_slice(), u.as_slice());
        Ok(jac.columns(0, self.nx()).into_owned())
    }

    /// ∂F/∂u (nx × nu), the discrete-time B matrix
    fn discrete_jacobian_wrt_control(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<DMatrix<f64>, DynamicsError> {
        self.check_dimensions(x.as_slice(), u.as_slice())?;
        let jac = self.discrete_step_jacobian(x.as_slice(), u.as_slice());
        Ok(jac.columns(self.nx(), self.nu()).into_owned())
    }

    /// Continuous linearization (A, B) around (x, u)
    fn linearize(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<(DMatrix<f64>, DMatrix<f64>), DynamicsError> {
        self.check_dimensions(x.as_slice(), u.as_slice())?;
        let jac = jacobian(&ContinuousMap::new(self), &stack(x.as_slice(), u.as_slice()));
        Ok((
            jac.columns(0, self.nx()).into_owned(),
            jac.columns(self.nx(), self.nu()).into_owned(),
        ))
    }

    /// [∂F/∂x | ∂F/∂u] (nx × (nx + nu)) on raw slices
    ///
    /// Unchecked hot path for the optimizer; slices must be sized `nx`/`nu`.
    fn discrete_step_jacobian(&self, x: &[f64], u: &[f64]) -> DMatrix<f64> {
        debug_assert_eq!(x.len(), self.nx());
        debug_assert_eq!(u.len(), self.nu());
        jacobian(&DiscreteMap::new(self), &stack(x, u))
    }

    /// ∇²(wᵀF) with respect to (x, u), ((nx + nu) × (nx + nu))
    ///
    /// Unchecked hot path for the optimizer; `w` has length `nx`.
    fn discrete_step_weighted_hessian(&self, x: &[f64], u: &[f64], w: &[f64]) -> DMatrix<f64> {
        debug_assert_eq!(x.len(), self.nx());
        debug_assert_eq!(u.len(), self.nu());
        debug_assert_eq!(w.len(), self.nx());
        weighted_hessian(&DiscreteMap::new(self), &stack(x, u), w)
    }

    /// Play a control sequence back from `x0`
    ///
    /// Returns `controls.len() + 1` states, the first being `x0`. No
    /// constraint checking is performed.
    fn simulate_open_loop(
        &self,
        x0: &DVector<f64>,
        controls: &[DVector<f64>],
    ) -> Result<Vec<DVector<f64>>, DynamicsError> {
        if x0.len() != self.nx() {
            return Err(DynamicsError::DimensionMismatch {
                quantity: "state",
                expected: self.nx(),
                got: x0.len(),
            });
        }

        let mut states = Vec::with_capacity(controls.len() + 1);
        states.push(x0.clone());

        let mut x = x0.clone();
        for u in controls {
            x = self.discrete_step(&x, u)?;
            states.push(x.clone());
        }

        Ok(states)
    }
}

/// z = [x; u]
fn stack(x: &[f64], u: &[f64]) -> Vec<f64> {
    x.iter().chain(u).copied().collect()
}

/// f(x, u) viewed as a map of the stacked input z = [x; u]
pub(crate) struct ContinuousMap<'a, M> {
    model: &'a M,
}

impl<'a, M: DynamicsModel> ContinuousMap<'a, M> {
    fn new(model: &'a M) -> Self {
        Self { model }
    }
}

impl<M: DynamicsModel> DifferentiableMap for ContinuousMap<'_, M> {
    fn input_dim(&self) -> usize {
        self.model.nx() + self.model.nu()
    }

    fn output_dim(&self) -> usize {
        self.model.nx()
    }

    fn eval<D: DualNum<f64> + Copy>(&self, z: &[D]) -> Vec<D> {
        let (x, u) = z.split_at(self.model.nx());
        self.model.vector_field(x, u)
    }
}

/// F(x, u) viewed as a map of the stacked input z = [x; u]
pub(crate) struct DiscreteMap<'a, M> {
    model: &'a M,
}

impl<'a, M: DynamicsModel> DiscreteMap<'a, M> {
    fn new(model: &'a M) -> Self {
        Self { model }
    }
}

impl<M: DynamicsModel> DifferentiableMap for DiscreteMap<'_, M> {
    fn input_dim(&self) -> usize {
        self.model.nx() + self.model.nu()
    }

    fn output_dim(&self) -> usize {
        self.model.nx()
    }

    fn eval<D: DualNum<f64> + Copy>(&self, z: &[D]) -> Vec<D> {
        let (x, u) = z.split_at(self.model.nx());
        self.model.step(x, u)
    }
}
