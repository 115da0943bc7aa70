//! Mathematical utilities
//!
//! Explicit Runge-Kutta integration and forward-mode automatic
//! differentiation over dual and hyper-dual numbers.

pub mod integrator;
pub mod autodiff;

pub use integrator::*;
pub use autodiff::*;
