//! Caller-supplied callables: residual, root functions and Jacobian.
//!
//! Each trait has a blanket implementation for plain closures so callers can
//! pass `|t, y, yp, out| { ...; 0 }` directly.

use std::sync::Arc;

use nalgebra::DMatrix;

/// Residual G(t, y, y') of the DAE system.
///
/// Writes G into `residual` and returns a status: `0` on success, a positive
/// value for a recoverable failure (the step is retried with a smaller size)
/// and a negative value for an unrecoverable one. Backends are not required
/// to honour the status.
pub trait ResidualFunction: Send + Sync {
    fn evaluate(&self, t: f64, y: &[f64], yp: &[f64], residual: &mut [f64]) -> i32;
}

impl<F> ResidualFunction for F
where
    F: Fn(f64, &[f64], &[f64], &mut [f64]) -> i32 + Send + Sync,
{
    fn evaluate(&self, t: f64, y: &[f64], yp: &[f64], residual: &mut [f64]) -> i32 {
        self(t, y, yp, residual)
    }
}

/// Shared handle to a residual function.
pub type Residual = Arc<dyn ResidualFunction>;

/// Event functions g(t, y, y') whose zero crossings stop the integration.
pub trait RootFunction: Send + Sync {
    fn evaluate(&self, t: f64, y: &[f64], yp: &[f64], g: &mut [f64]) -> i32;
}

impl<F> RootFunction for F
where
    F: Fn(f64, &[f64], &[f64], &mut [f64]) -> i32 + Send + Sync,
{
    fn evaluate(&self, t: f64, y: &[f64], yp: &[f64], g: &mut [f64]) -> i32 {
        self(t, y, yp, g)
    }
}

/// Iteration matrix dG/dy + cj * dG/dy'.
///
/// `residual` holds G at (t, y, yp). The matrix arrives zeroed.
pub trait JacobianFunction: Send + Sync {
    fn evaluate(
        &self,
        t: f64,
        y: &[f64],
        yp: &[f64],
        residual: &[f64],
        cj: f64,
        jac: &mut DMatrix<f64>,
    ) -> i32;
}

impl<F> JacobianFunction for F
where
    F: Fn(f64, &[f64], &[f64], &[f64], f64, &mut DMatrix<f64>) -> i32 + Send + Sync,
{
    fn evaluate(
        &self,
        t: f64,
        y: &[f64],
        yp: &[f64],
        residual: &[f64],
        cj: f64,
        jac: &mut DMatrix<f64>,
    ) -> i32 {
        self(t, y, yp, residual, cj, jac)
    }
}
