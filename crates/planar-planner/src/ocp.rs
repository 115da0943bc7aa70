//! Optimal Control Problem (OCP) transcription
//!
//! Multiple shooting over N stages:
//!
//! ```text
//! minimize    J = Σₖ ‖xₖ - x_goal‖²_Q + ‖uₖ‖²_R + ‖x_N - x_goal‖²_{Q_e}
//! subject to  min_c ≤ uₖ[c] ≤ max_c           (per stage and channel)
//!             x₀ = x_init
//!             xₖ₊₁ = F(xₖ, uₖ)                 (one RK4 step)
//! ```
//!
//! Decision vector: all states in stage order, then all controls in stage
//! order. Parameter vector: `p = [x_init; x_goal]`.

use std::ops::Range;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use planar_core::DynamicsModel;

use crate::config::OcpConfig;
use crate::constraints::{ConstraintKind, ConstraintSet, ConstraintSetBuilder};
use crate::nlp::NlpProblem;
use crate::trajectory::Trajectory;

/// Placement of stage states and controls in the flat decision vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionLayout {
    horizon: usize,
    nx: usize,
    nu: usize,
}

impl DecisionLayout {
    pub fn new(horizon: usize, nx: usize, nu: usize) -> Self {
        Self { horizon, nx, nu }
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn nu(&self) -> usize {
        self.nu
    }

    /// (N+1)·nx + N·nu
    pub fn num_variables(&self) -> usize {
        (self.horizon + 1) * self.nx + self.horizon * self.nu
    }

    /// First slot of x_k, k in 0..=N
    pub fn state_offset(&self, k: usize) -> usize {
        debug_assert!(k <= self.horizon);
        k * self.nx
    }

    /// First slot of u_k, k in 0..N
    pub fn control_offset(&self, k: usize) -> usize {
        debug_assert!(k < self.horizon);
        (self.horizon + 1) * self.nx + k * self.nu
    }

    pub fn state_range(&self, k: usize) -> Range<usize> {
        let start = self.state_offset(k);
        start..start + self.nx
    }

    pub fn control_range(&self, k: usize) -> Range<usize> {
        let start = self.control_offset(k);
        start..start + self.nu
    }

    pub fn state<'a>(&self, z: &'a [f64], k: usize) -> &'a [f64] {
        &z[self.state_range(k)]
    }

    pub fn control<'a>(&self, z: &'a [f64], k: usize) -> &'a [f64] {
        &z[self.control_range(k)]
    }

    /// Slot of entry `i` of the stacked stage vector [x_k; u_k]
    fn stage_slot(&self, k: usize, i: usize) -> usize {
        if i < self.nx {
            self.state_offset(k) + i
        } else {
            self.control_offset(k) + i - self.nx
        }
    }

    /// Flatten a trajectory with this layout's shape
    pub fn pack(&self, trajectory: &Trajectory) -> Vec<f64> {
        debug_assert_eq!(trajectory.horizon(), self.horizon);
        let mut z = Vec::with_capacity(self.num_variables());
        for x in trajectory.states() {
            z.extend_from_slice(x.as_slice());
        }
        for u in trajectory.controls() {
            z.extend_from_slice(u.as_slice());
        }
        z
    }

    /// Split a decision vector back into stage states and controls
    pub fn unpack(&self, z: &[f64]) -> Trajectory {
        debug_assert_eq!(z.len(), self.num_variables());
        let states = (0..=self.horizon)
            .map(|k| DVector::from_column_slice(self.state(z, k)))
            .collect();
        let controls = (0..self.horizon)
            .map(|k| DVector::from_column_slice(self.control(z, k)))
            .collect();
        Trajectory::from_parts(states, controls)
    }
}

/// Placement of the initial state and goal in the parameter vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterLayout {
    nx: usize,
}

impl ParameterLayout {
    pub fn new(nx: usize) -> Self {
        Self { nx }
    }

    pub fn len(&self) -> usize {
        2 * self.nx
    }

    pub fn is_empty(&self) -> bool {
        self.nx == 0
    }

    pub fn initial_state<'a>(&self, p: &'a [f64]) -> &'a [f64] {
        &p[..self.nx]
    }

    pub fn goal<'a>(&self, p: &'a [f64]) -> &'a [f64] {
        &p[self.nx..2 * self.nx]
    }

    /// p = [x0; goal]
    pub fn pack(&self, x0: &DVector<f64>, goal: &DVector<f64>) -> Vec<f64> {
        x0.iter().chain(goal.iter()).copied().collect()
    }
}

/// The transcribed OCP as a parametric NLP
pub struct OcpProblem<M> {
    model: Arc<M>,
    config: Arc<OcpConfig>,
    layout: DecisionLayout,
    parameters: ParameterLayout,
    constraints: ConstraintSet,
}

impl<M: DynamicsModel> OcpProblem<M> {
    /// Allocate the layouts and assemble the constraint set
    pub fn new(model: Arc<M>, config: Arc<OcpConfig>) -> Self {
        let (nx, nu) = (model.nx(), model.nu());
        let horizon = config.horizon();
        let layout = DecisionLayout::new(horizon, nx, nu);
        let parameters = ParameterLayout::new(nx);

        let mut builder = ConstraintSetBuilder::new();
        for stage in 0..horizon {
            for (channel, bounds) in config.actuator_bounds().iter().enumerate() {
                builder = builder.bound(
                    ConstraintKind::ControlBound { stage, channel },
                    bounds.min,
                    bounds.max,
                );
            }
        }
        builder = builder.equality(ConstraintKind::InitialCondition, nx);
        for stage in 0..horizon {
            builder = builder.equality(ConstraintKind::Dynamics { stage }, nx);
        }

        Self {
            model,
            config,
            layout,
            parameters,
            constraints: builder.build(),
        }
    }

    pub fn layout(&self) -> &DecisionLayout {
        &self.layout
    }

    pub fn parameters(&self) -> &ParameterLayout {
        &self.parameters
    }

    pub fn constraint_set(&self) -> &ConstraintSet {
        &self.constraints
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn config(&self) -> &OcpConfig {
        &self.config
    }

    /// Weight matrices in stage order: Q for k < N, Q_e for k = N
    fn state_weight(&self, k: usize) -> &DMatrix<f64> {
        if k < self.layout.horizon {
            self.config.state_weight()
        } else {
            self.config.terminal_weight()
        }
    }

    /// Lower-triangle entries (a ≥ b) of a dim × dim block
    fn lower_triangle(dim: usize) -> impl Iterator<Item = (usize, usize)> {
        (0..dim).flat_map(|a| (0..=a).map(move |b| (a, b)))
    }
}

impl<M: DynamicsModel> NlpProblem for OcpProblem<M> {
    fn num_variables(&self) -> usize {
        self.layout.num_variables()
    }

    fn num_constraints(&self) -> usize {
        self.constraints.num_rows()
    }

    fn num_parameters(&self) -> usize {
        self.parameters.len()
    }

    fn objective(&self, z: &[f64], p: &[f64]) -> f64 {
        let goal = DVector::from_column_slice(self.parameters.goal(p));
        let mut cost = 0.0;

        for k in 0..=self.layout.horizon {
            let error = DVector::from_column_slice(self.layout.state(z, k)) - &goal;
            cost += error.dot(&(self.state_weight(k) * &error));
        }
        for k in 0..self.layout.horizon {
            let u = DVector::from_column_slice(self.layout.control(z, k));
            cost += u.dot(&(self.config.control_weight() * &u));
        }

        cost
    }

    fn objective_gradient(&self, z: &[f64], p: &[f64], grad: &mut [f64]) {
        let goal = DVector::from_column_slice(self.parameters.goal(p));

        for k in 0..=self.layout.horizon {
            let q = self.state_weight(k);
            let error = DVector::from_column_slice(self.layout.state(z, k)) - &goal;
            let g = q * &error + q.transpose() * &error;
            grad[self.layout.state_range(k)].copy_from_slice(g.as_slice());
        }
        let r = self.config.control_weight();
        for k in 0..self.layout.horizon {
            let u = DVector::from_column_slice(self.layout.control(z, k));
            let g = r * &u + r.transpose() * &u;
            grad[self.layout.control_range(k)].copy_from_slice(g.as_slice());
        }
    }

    fn constraints(&self, z: &[f64], p: &[f64], g: &mut [f64]) {
        let nx = self.layout.nx;

        for (row, record) in self.constraints.iter() {
            match record.kind {
                ConstraintKind::ControlBound { stage, channel } => {
                    g[row] = self.layout.control(z, stage)[channel];
                }
                ConstraintKind::InitialCondition => {
                    let x0 = self.layout.state(z, 0);
                    let x_init = self.parameters.initial_state(p);
                    for i in 0..nx {
                        g[row + i] = x0[i] - x_init[i];
                    }
                }
                ConstraintKind::Dynamics { stage } => {
                    let predicted = self.model.step(
                        self.layout.state(z, stage),
                        self.layout.control(z, stage),
                    );
                    let next = self.layout.state(z, stage + 1);
                    for i in 0..nx {
                        g[row + i] = next[i] - predicted[i];
                    }
                }
            }
        }
    }

    fn jacobian_structure(&self) -> Vec<(usize, usize)> {
        let (nx, nu) = (self.layout.nx, self.layout.nu);
        let mut entries = Vec::new();

        for (row, record) in self.constraints.iter() {
            match record.kind {
                ConstraintKind::ControlBound { stage, channel } => {
                    entries.push((row, self.layout.control_offset(stage) + channel));
                }
                ConstraintKind::InitialCondition => {
                    entries.extend((0..nx).map(|i| (row + i, self.layout.state_offset(0) + i)));
                }
                ConstraintKind::Dynamics { stage } => {
                    for i in 0..nx {
                        entries.push((row + i, self.layout.state_offset(stage + 1) + i));
                        for j in 0..nx + nu {
                            entries.push((row + i, self.layout.stage_slot(stage, j)));
                        }
                    }
                }
            }
        }

        entries
    }

    fn jacobian_values(&self, z: &[f64], _p: &[f64], values: &mut [f64]) {
        let (nx, nu) = (self.layout.nx, self.layout.nu);
        let mut idx = 0;

        for (_, record) in self.constraints.iter() {
            match record.kind {
                ConstraintKind::ControlBound { .. } => {
                    values[idx] = 1.0;
                    idx += 1;
                }
                ConstraintKind::InitialCondition => {
                    values[idx..idx + nx].fill(1.0);
                    idx += nx;
                }
                ConstraintKind::Dynamics { stage } => {
                    let jac = self.model.discrete_step_jacobian(
                        self.layout.state(z, stage),
                        self.layout.control(z, stage),
                    );
                    for i in 0..nx {
                        values[idx] = 1.0;
                        idx += 1;
                        for j in 0..nx + nu {
                            values[idx] = -jac[(i, j)];
                            idx += 1;
                        }
                    }
                }
            }
        }
    }

    fn hessian_structure(&self) -> Vec<(usize, usize)> {
        let (nx, nu) = (self.layout.nx, self.layout.nu);
        let mut entries = Vec::new();

        for k in 0..self.layout.horizon {
            entries.extend(
                Self::lower_triangle(nx + nu)
                    .map(|(a, b)| (self.layout.stage_slot(k, a), self.layout.stage_slot(k, b))),
            );
        }
        let terminal = self.layout.state_offset(self.layout.horizon);
        entries.extend(Self::lower_triangle(nx).map(|(a, b)| (terminal + a, terminal + b)));

        entries
    }

    fn hessian_values(
        &self,
        z: &[f64],
        _p: &[f64],
        obj_factor: f64,
        lambda: &[f64],
        values: &mut [f64],
    ) {
        let (nx, nu) = (self.layout.nx, self.layout.nu);
        let q = self.config.state_weight();
        let r = self.config.control_weight();

        let mut dynamics_rows = vec![0; self.layout.horizon];
        for (row, record) in self.constraints.iter() {
            if let ConstraintKind::Dynamics { stage } = record.kind {
                dynamics_rows[stage] = row;
            }
        }

        let mut idx = 0;
        for (k, &row) in dynamics_rows.iter().enumerate() {
            // g = x_{k+1} - F(x_k, u_k), so the constraint curvature is -∇²(λᵀF)
            let weighted = self.model.discrete_step_weighted_hessian(
                self.layout.state(z, k),
                self.layout.control(z, k),
                &lambda[row..row + nx],
            );
            for (a, b) in Self::lower_triangle(nx + nu) {
                let cost = match (a < nx, b < nx) {
                    (true, true) => q[(a, b)] + q[(b, a)],
                    (false, false) => r[(a - nx, b - nx)] + r[(b - nx, a - nx)],
                    _ => 0.0,
                };
                values[idx] = obj_factor * cost - weighted[(a, b)];
                idx += 1;
            }
        }

        let q_e = self.config.terminal_weight();
        for (a, b) in Self::lower_triangle(nx) {
            values[idx] = obj_factor * (q_e[(a, b)] + q_e[(b, a)]);
            idx += 1;
        }
    }
}
