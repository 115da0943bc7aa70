//! Parametric nonlinear program interface
//!
//! ```text
//! minimize    f(x; p)
//! subject to  lbg ≤ g(x; p) ≤ ubg
//! ```
//!
//! Rows with `lbg == ubg` are equalities. Derivatives are supplied in
//! coordinate (triplet) form: the structure is fixed for the lifetime of the
//! problem, values are refreshed at every iterate.

/// A nonlinear program with a fixed sparsity structure
pub trait NlpProblem {
    /// Number of decision variables
    fn num_variables(&self) -> usize;

    /// Number of constraint rows
    fn num_constraints(&self) -> usize;

    /// Length of the parameter vector `p`
    fn num_parameters(&self) -> usize;

    /// f(x; p)
    fn objective(&self, x: &[f64], p: &[f64]) -> f64;

    /// ∇f(x; p), written into `grad` (length `num_variables`)
    fn objective_gradient(&self, x: &[f64], p: &[f64], grad: &mut [f64]);

    /// g(x; p), written into `g` (length `num_constraints`)
    fn constraints(&self, x: &[f64], p: &[f64], g: &mut [f64]);

    /// (row, column) of every structurally nonzero Jacobian entry
    fn jacobian_structure(&self) -> Vec<(usize, usize)>;

    /// Jacobian values in the order of [`jacobian_structure`](Self::jacobian_structure)
    fn jacobian_values(&self, x: &[f64], p: &[f64], values: &mut [f64]);

    /// (row, column) entries of the lower triangle (row ≥ column) of the
    /// Hessian of the Lagrangian
    fn hessian_structure(&self) -> Vec<(usize, usize)>;

    /// Values of ∇²(σ·f + Σᵢ λᵢ gᵢ) in the order of
    /// [`hessian_structure`](Self::hessian_structure)
    ///
    /// Duplicate coordinates are summed.
    fn hessian_values(
        &self,
        x: &[f64],
        p: &[f64],
        obj_factor: f64,
        lambda: &[f64],
        values: &mut [f64],
    );
}
