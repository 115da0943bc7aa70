//! Numerical integration methods
//!
//! Fixed-step explicit Runge-Kutta schemes written over any
//! [`DualNum`] scalar, so the same code path produces plain values,
//! first derivatives ([`num_dual::Dual64`]) and second derivatives
//! ([`num_dual::HyperDual64`]).

use num_dual::DualNum;

/// Classic 4th-order Runge-Kutta step for an autonomous system
///
/// Solves dx/dt = f(x) over a single interval of length `dt`. Inputs that
/// the vector field depends on (e.g. controls) are captured by `f` and held
/// constant over the step.
///
/// # Arguments
/// * `x` - Current state
/// * `dt` - Step length
/// * `f` - Derivative function f(x) -> dx/dt
///
/// # Returns
/// State after one step
pub fn rk4<D, F>(x: &[D], dt: f64, f: F) -> Vec<D>
where
    D: DualNum<f64> + Copy,
    F: Fn(&[D]) -> Vec<D>,
{
    let k1 = f(x);
    let k2 = f(&offset(x, &k1, dt / 2.0));
    let k3 = f(&offset(x, &k2, dt / 2.0));
    let k4 = f(&offset(x, &k3, dt));

    x.iter()
        .enumerate()
        .map(|(i, &xi)| xi + (k1[i] + k2[i] * 2.0 + k3[i] * 2.0 + k4[i]) * (dt / 6.0))
        .collect()
}

/// x + h·k
fn offset<D>(x: &[D], k: &[D], h: f64) -> Vec<D>
where
    D: DualNum<f64> + Copy,
{
    x.iter().zip(k).map(|(&xi, &ki)| xi + ki * h).collect()
}
