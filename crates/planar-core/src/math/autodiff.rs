//! Forward-mode automatic differentiation
//!
//! Any map written generically over [`DualNum`] can be differentiated
//! exactly: seeding one input with a unit dual part yields one Jacobian
//! column, seeding two inputs of a hyper-dual number yields one entry of
//! the Hessian.

use nalgebra::DMatrix;
use num_dual::{Dual64, DualNum, HyperDual64};

/// A vector-valued map ℝⁿ → ℝᵐ that can be evaluated over dual numbers
pub trait DifferentiableMap {
    /// Input dimension n
    fn input_dim(&self) -> usize;

    /// Output dimension m
    fn output_dim(&self) -> usize;

    /// Evaluate the map at `z` (length n), returning m values
    fn eval<D: DualNum<f64> + Copy>(&self, z: &[D]) -> Vec<D>;
}

/// Evaluate the map on plain floats
pub fn evaluate<F: DifferentiableMap>(map: &F, z: &[f64]) -> Vec<f64> {
    map.eval(z)
}

/// Jacobian ∂F/∂z (m × n) by one dual-number pass per input
pub fn jacobian<F: DifferentiableMap>(map: &F, z: &[f64]) -> DMatrix<f64> {
    let n = map.input_dim();
    let m = map.output_dim();
    let mut jac = DMatrix::zeros(m, n);

    let mut seeded: Vec<Dual64> = z.iter().map(|&v| Dual64::from(v)).collect();
    for j in 0..n {
        seeded[j].eps = 1.0;
        let out = map.eval(&seeded);
        for (i, value) in out.iter().enumerate() {
            jac[(i, j)] = value.eps;
        }
        seeded[j].eps = 0.0;
    }

    jac
}

/// Hessian of the weighted sum ∇²(wᵀF)(z) (n × n, symmetric)
///
/// Uses one hyper-dual pass per entry of the lower triangle.
pub fn weighted_hessian<F: DifferentiableMap>(
    map: &F,
    z: &[f64],
    weights: &[f64],
) -> DMatrix<f64> {
    let n = map.input_dim();
    let mut hess = DMatrix::zeros(n, n);

    let mut seeded: Vec<HyperDual64> = z.iter().map(|&v| HyperDual64::from(v)).collect();
    for a in 0..n {
        for b in 0..=a {
            seeded[a].eps1 = 1.0;
            seeded[b].eps2 = 1.0;

            let out = map.eval(&seeded);
            let value: f64 = out
                .iter()
                .zip(weights)
                .map(|(f, w)| f.eps1eps2 * w)
                .sum();
            hess[(a, b)] = value;
            hess[(b, a)] = value;

            seeded[a].eps1 = 0.0;
            seeded[b].eps2 = 0.0;
        }
    }

    hess
}
