//! Backend trait definitions for DAE integrators.
//!
//! These traits abstract over the concrete integrator that advances
//! G(t, y, y') = 0. The facade only ever sees `Box<dyn DaeIntegrator>`;
//! concrete backend types stay private to their modules.

use serde::Serialize;

use crate::error::{DaeError, Result};
use crate::options::Options;
use crate::residual::Residual;
use crate::result::SolverOutput;

/// Reason a backend could not be loaded during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError(pub String);

impl BackendError {
    /// The native library behind a backend is absent from this build.
    pub fn library_not_linked(library: &str) -> Self {
        BackendError(format!("{library} library not linked into this build"))
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "backend unavailable: {}", self.0)
    }
}

impl std::error::Error for BackendError {}

impl From<&str> for BackendError {
    fn from(s: &str) -> Self {
        BackendError(s.to_string())
    }
}

/// Run counters of an integrator instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntegratorStats {
    /// Accepted internal steps
    pub steps: usize,
    /// Residual evaluations (including finite-difference Jacobians)
    pub residual_evals: usize,
    /// Iteration matrix evaluations
    pub jacobian_evals: usize,
    /// Newton iterations
    pub nonlinear_iters: usize,
    /// Rejected steps due to the local error test
    pub error_test_fails: usize,
    /// Rejected steps due to Newton non-convergence
    pub convergence_fails: usize,
    /// Root function evaluations
    pub root_evals: usize,
    /// Order used on the last accepted step
    pub last_order: usize,
    /// Size of the last accepted step
    pub last_step: f64,
    /// Current internal time
    pub current_time: f64,
}

/// The operation set every DAE backend implements.
///
/// Lifecycle: construct (through an [`IntegratorFactory`]) → optional
/// `set_options` → `init_step` → any number of `step` calls. `solve` runs a
/// whole output grid by itself. Calling `step` before `init_step` is a
/// [`DaeError::SequenceError`].
pub trait DaeIntegrator: Send {
    /// Canonical backend name.
    fn name(&self) -> &'static str;

    /// Merge `options` into the configuration and reset all solver state.
    fn set_options(&mut self, options: &Options) -> Result<()>;

    /// Allocate workspace for `y0.len()` unknowns and, if configured, compute
    /// consistent initial conditions. Corrected values are written into the
    /// optional buffers.
    fn init_step<'a>(
        &mut self,
        t0: f64,
        y0: &[f64],
        yp0: &[f64],
        y_ic0: Option<&'a mut [f64]>,
        yp_ic0: Option<&'a mut [f64]>,
    ) -> Result<SolverOutput<'a>>;

    /// Advance toward `t` with the configured step policy. Results are
    /// written into the optional buffers.
    fn step<'a>(
        &mut self,
        t: f64,
        y_out: Option<&'a mut [f64]>,
        yp_out: Option<&'a mut [f64]>,
    ) -> Result<SolverOutput<'a>>;

    /// Integrate over `tspan` (first entry is the start time) and report the
    /// solution at every entry.
    fn solve(&mut self, tspan: &[f64], y0: &[f64], yp0: &[f64]) -> Result<SolverOutput<'static>>;

    /// Counters of the current run.
    fn statistics(&self) -> Result<IntegratorStats> {
        Err(DaeError::UnimplementedOperation {
            backend: self.name().to_string(),
            operation: "statistics",
        })
    }
}

/// Builds a backend instance from a residual and options.
pub type IntegratorFactory = fn(Residual, &Options) -> Result<Box<dyn DaeIntegrator>>;

/// A successfully loaded backend.
#[derive(Debug, Clone, Copy)]
pub struct IntegratorDescriptor {
    /// Canonical name, matched case-insensitively
    pub name: &'static str,
    /// Optional second name, matched case-insensitively
    pub alias: Option<&'static str>,
    /// One-line description
    pub summary: &'static str,
    pub factory: IntegratorFactory,
}

impl IntegratorDescriptor {
    pub fn instantiate(&self, residual: Residual, options: &Options) -> Result<Box<dyn DaeIntegrator>> {
        (self.factory)(residual, options)
    }
}

/// One entry of the discovery priority list.
#[derive(Debug, Clone, Copy)]
pub struct BackendProbe {
    pub name: &'static str,
    /// Attempts to load the backend; may touch native libraries.
    pub load: fn() -> std::result::Result<IntegratorDescriptor, BackendError>,
}
