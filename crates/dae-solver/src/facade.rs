//! The caller-facing solver object.

use log::debug;

use crate::backend::{DaeIntegrator, IntegratorStats};
use crate::error::{DaeError, Result};
use crate::options::Options;
use crate::registry::Registry;
use crate::residual::{Residual, ResidualFunction};
use crate::result::{IntegrationResult, ResultFormat};

/// A DAE solver bound to one backend.
///
/// Every operation is forwarded to the backend unchanged; results are
/// rendered in the [`ResultFormat`] chosen by `old_api` when the solver was
/// created.
///
/// # Example
///
/// ```
/// use dae_solver::{Dae, Options, StatusFlag};
///
/// // y' + y = 0
/// let residual = |_t: f64, y: &[f64], yp: &[f64], r: &mut [f64]| {
///     r[0] = yp[0] + y[0];
///     0
/// };
/// let mut solver = Dae::new("ida", residual, &Options::new().set("old_api", false))?;
/// let result = solver.solve(&[0.0, 1.0], &[1.0], &[-1.0])?;
/// assert_eq!(result.flag(), StatusFlag::Success);
/// # Ok::<(), dae_solver::DaeError>(())
/// ```
pub struct Dae {
    integrator: Option<Box<dyn DaeIntegrator>>,
    format: ResultFormat,
    backend: &'static str,
}

impl Dae {
    /// Create a solver on the process-wide registry.
    ///
    /// # Errors
    ///
    /// [`DaeError::NameNotFound`] if no available backend is called `name`
    /// (case-insensitive), or the backend's option validation error.
    pub fn new<R>(name: &str, residual: R, options: &Options) -> Result<Self>
    where
        R: ResidualFunction + 'static,
    {
        Self::with_registry(Registry::global(), name, std::sync::Arc::new(residual), options)
    }

    /// Create a solver on an explicit registry.
    pub fn with_registry(
        registry: &Registry,
        name: &str,
        residual: Residual,
        options: &Options,
    ) -> Result<Self> {
        let format = ResultFormat::from_options(options)?;
        let integrator = registry.create(name, residual, options)?;
        debug!("created {:?} solver ({format:?} results)", integrator.name());
        Ok(Self::from_integrator(integrator, format))
    }

    /// Wrap an already constructed backend.
    pub fn from_integrator(integrator: Box<dyn DaeIntegrator>, format: ResultFormat) -> Self {
        Self {
            backend: integrator.name(),
            integrator: Some(integrator),
            format,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend
    }

    pub fn format(&self) -> ResultFormat {
        self.format
    }

    fn integrator(&mut self) -> Result<&mut (dyn DaeIntegrator + 'static)> {
        self.integrator.as_deref_mut().ok_or(DaeError::Disposed)
    }

    /// Merge `options` into the backend configuration and reset its state.
    ///
    /// # Errors
    ///
    /// [`DaeError::InvalidOption`] if `options` would switch the result
    /// format, or if the backend rejects them.
    pub fn set_options(&mut self, options: &Options) -> Result<()> {
        if options.contains("old_api") && ResultFormat::from_options(options)? != self.format {
            return Err(DaeError::invalid_option(
                self.backend,
                "old_api",
                "the result format is fixed when the solver is created",
            ));
        }
        self.integrator()?.set_options(options)
    }

    /// Integrate over `tspan` and report every entry.
    pub fn solve(
        &mut self,
        tspan: &[f64],
        y0: &[f64],
        yp0: &[f64],
    ) -> Result<IntegrationResult<'static>> {
        let format = self.format;
        let output = self.integrator()?.solve(tspan, y0, yp0)?;
        Ok(format.render(output))
    }

    /// Prepare for stepping from `t0`. Corrected initial values are written
    /// into `y_ic0` / `yp_ic0` when given.
    pub fn init_step<'a>(
        &mut self,
        t0: f64,
        y0: &[f64],
        yp0: &[f64],
        y_ic0: Option<&'a mut [f64]>,
        yp_ic0: Option<&'a mut [f64]>,
    ) -> Result<IntegrationResult<'a>> {
        let format = self.format;
        let output = self.integrator()?.init_step(t0, y0, yp0, y_ic0, yp_ic0)?;
        Ok(format.render(output))
    }

    /// Advance toward `t`. Results are written into `y_out` / `yp_out` when
    /// given, and the returned rows borrow them.
    pub fn step<'a>(
        &mut self,
        t: f64,
        y_out: Option<&'a mut [f64]>,
        yp_out: Option<&'a mut [f64]>,
    ) -> Result<IntegrationResult<'a>> {
        let format = self.format;
        let output = self.integrator()?.step(t, y_out, yp_out)?;
        Ok(format.render(output))
    }

    pub fn statistics(&self) -> Result<IntegratorStats> {
        self.integrator
            .as_deref()
            .ok_or(DaeError::Disposed)?
            .statistics()
    }

    /// Release the backend. Further calls are no-ops.
    pub fn dispose(&mut self) {
        if let Some(integrator) = self.integrator.take() {
            debug!("disposing {:?} solver", integrator.name());
            drop(integrator);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.integrator.is_none()
    }
}

impl Drop for Dae {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Dae {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dae")
            .field("backend", &self.backend)
            .field("format", &self.format)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
