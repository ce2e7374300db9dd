//! Lifecycle shared by the native backends.
//!
//! [`BdfDriver`] implements [`DaeIntegrator`] on top of [`BdfEngine`]. The
//! backends differ only in how they read their options, so each one hands
//! the driver a [`SettingsParser`].

use std::borrow::Cow;

use log::{debug, warn};
use nalgebra::DVector;

use super::bdf::{Advance, BdfEngine, BdfSettings, Tolerance};
use super::initcond::consistent_initial_conditions;
use super::traits::{DaeIntegrator, IntegratorStats};
use crate::error::{DaeError, Result};
use crate::options::Options;
use crate::residual::Residual;
use crate::result::{SolverOutput, StatusFlag};

/// Turns accumulated options into engine settings, rejecting unknown keys.
pub(crate) type SettingsParser = fn(&Options) -> Result<BdfSettings>;

enum Phase {
    Configured,
    Stepping(BdfEngine),
}

pub(crate) struct BdfDriver {
    name: &'static str,
    residual: Residual,
    options: Options,
    settings: BdfSettings,
    parse: SettingsParser,
    phase: Phase,
}

impl BdfDriver {
    pub fn new(
        name: &'static str,
        residual: Residual,
        options: &Options,
        parse: SettingsParser,
    ) -> Result<Self> {
        let settings = parse(options)?;
        Ok(Self {
            name,
            residual,
            options: options.clone(),
            settings,
            parse,
            phase: Phase::Configured,
        })
    }

    /// Validate per-component settings against `n` unknowns and return the
    /// algebraic mask, if any.
    fn check_sizes(&self, n: usize) -> Result<Option<Vec<bool>>> {
        if n == 0 {
            return Err(DaeError::InvalidInput(
                "the system needs at least one unknown".to_string(),
            ));
        }
        if let Tolerance::PerComponent(atol) = &self.settings.atol
            && atol.len() != n
        {
            return Err(DaeError::DimensionMismatch {
                what: "atol",
                expected: n,
                found: atol.len(),
            });
        }
        self.settings
            .algebraic
            .as_ref()
            .map(|vars| vars.mask(n))
            .transpose()
    }
}

fn check_len(what: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(DaeError::DimensionMismatch {
            what,
            expected,
            found,
        })
    }
}

fn check_buffer(what: &'static str, expected: usize, buffer: Option<&[f64]>) -> Result<()> {
    match buffer {
        Some(buffer) => check_len(what, expected, buffer.len()),
        None => Ok(()),
    }
}

/// Write `data` into the caller buffer and borrow it, or return an owned copy.
fn emit<'a>(buffer: Option<&'a mut [f64]>, data: &DVector<f64>) -> Cow<'a, [f64]> {
    match buffer {
        Some(buffer) => {
            buffer.copy_from_slice(data.as_slice());
            Cow::Borrowed(buffer)
        }
        None => Cow::Owned(data.as_slice().to_vec()),
    }
}

fn owned(data: &DVector<f64>) -> Cow<'static, [f64]> {
    Cow::Owned(data.as_slice().to_vec())
}

fn root_message(t: f64, directions: &[i32]) -> String {
    format!("root found at t = {t}, directions {directions:?}")
}

impl DaeIntegrator for BdfDriver {
    fn name(&self) -> &'static str {
        self.name
    }

    fn set_options(&mut self, options: &Options) -> Result<()> {
        let mut merged = self.options.clone();
        merged.merge(options);
        self.settings = (self.parse)(&merged)?;
        self.options = merged;
        self.phase = Phase::Configured;
        debug!("{}: options updated, solver state reset", self.name);
        Ok(())
    }

    fn init_step<'a>(
        &mut self,
        t0: f64,
        y0: &[f64],
        yp0: &[f64],
        y_ic0: Option<&'a mut [f64]>,
        yp_ic0: Option<&'a mut [f64]>,
    ) -> Result<SolverOutput<'a>> {
        self.phase = Phase::Configured;
        let n = y0.len();
        check_len("yp0", n, yp0.len())?;
        check_buffer("y_ic0", n, y_ic0.as_deref())?;
        check_buffer("yp_ic0", n, yp_ic0.as_deref())?;
        let mask = self.check_sizes(n)?;

        let mut y = DVector::from_column_slice(y0);
        let mut yp = DVector::from_column_slice(yp0);

        if let Some(mode) = self.settings.initial_condition {
            let settings = &self.settings;
            match consistent_initial_conditions(
                self.residual.as_ref(),
                t0,
                &y,
                &yp,
                mode,
                mask.as_deref(),
                |y: &DVector<f64>| settings.error_weights(y),
            ) {
                Ok(start) => {
                    debug!(
                        "{}: consistent initial conditions after {} iteration(s), {} residual evaluation(s)",
                        self.name, start.iterations, start.residual_evals
                    );
                    y = start.y;
                    yp = start.yp;
                }
                Err(reason) => {
                    warn!("{}: consistent initial conditions failed: {reason}", self.name);
                    let mut out = SolverOutput::new(StatusFlag::InitialConditionFailure)
                        .with_message(reason);
                    out.errors.push(t0, emit(y_ic0, &y), emit(yp_ic0, &yp));
                    return Ok(out);
                }
            }
        }

        let mut engine = BdfEngine::new(
            self.residual.clone(),
            self.settings.clone(),
            t0,
            y.clone(),
            yp.clone(),
        );
        if let Err(flag) = engine.prime_roots() {
            let mut out = SolverOutput::new(flag).with_message("root function failed at t0");
            out.errors.push(t0, emit(y_ic0, &y), emit(yp_ic0, &yp));
            return Ok(out);
        }
        self.phase = Phase::Stepping(engine);
        debug!("{}: initialised {n} unknown(s) at t0 = {t0}", self.name);

        let mut out = SolverOutput::new(StatusFlag::Success);
        out.values.push(t0, emit(y_ic0, &y), emit(yp_ic0, &yp));
        Ok(out)
    }

    fn step<'a>(
        &mut self,
        t: f64,
        y_out: Option<&'a mut [f64]>,
        yp_out: Option<&'a mut [f64]>,
    ) -> Result<SolverOutput<'a>> {
        let Phase::Stepping(engine) = &mut self.phase else {
            return Err(DaeError::SequenceError {
                backend: self.name.to_string(),
            });
        };
        let n = engine.y().len();
        check_buffer("y_out", n, y_out.as_deref())?;
        check_buffer("yp_out", n, yp_out.as_deref())?;

        // Legacy callers request a single internal step with a negative time.
        let (tout, one_step) = if self.settings.legacy_time_sign && t < 0.0 {
            (-t, true)
        } else {
            (t, self.settings.one_step)
        };

        let out = match engine.advance(tout, one_step) {
            Advance::Reached { t, y, yp } => {
                let mut out = SolverOutput::new(StatusFlag::Success);
                out.values.push(t, emit(y_out, &y), emit(yp_out, &yp));
                out
            }
            Advance::Root(hit) => {
                let mut out = SolverOutput::new(StatusFlag::RootReturn)
                    .with_message(root_message(hit.t, &hit.directions));
                out.roots.push(hit.t, owned(&hit.y), owned(&hit.yp));
                out.values.push(hit.t, emit(y_out, &hit.y), emit(yp_out, &hit.yp));
                out
            }
            Advance::Tstop { t, y, yp } => {
                let mut out = SolverOutput::new(StatusFlag::TstopReturn)
                    .with_message(format!("reached tstop = {t}"));
                out.tstop.push(t, owned(&y), owned(&yp));
                out.values.push(t, emit(y_out, &y), emit(yp_out, &yp));
                out
            }
            Advance::Failed {
                flag,
                t,
                y,
                yp,
                message,
            } => {
                warn!("{}: step failed with {flag:?}: {message}", self.name);
                let mut out = SolverOutput::new(flag).with_message(message);
                out.errors.push(t, emit(y_out, &y), emit(yp_out, &yp));
                out
            }
        };
        Ok(out)
    }

    fn solve(&mut self, tspan: &[f64], y0: &[f64], yp0: &[f64]) -> Result<SolverOutput<'static>> {
        let Some((&t0, rest)) = tspan.split_first() else {
            return Err(DaeError::InvalidInput("tspan must not be empty".to_string()));
        };
        let increasing = rest.first().is_none_or(|&t1| t1 > t0);
        let monotone = tspan
            .windows(2)
            .all(|w| if increasing { w[1] > w[0] } else { w[1] < w[0] });
        if !monotone {
            return Err(DaeError::InvalidInput(
                "tspan must be strictly increasing or strictly decreasing".to_string(),
            ));
        }

        let mut out = self.init_step(t0, y0, yp0, None, None)?.into_owned();
        if !out.flag.is_full_success() {
            return Ok(out);
        }
        let Phase::Stepping(engine) = &mut self.phase else {
            return Err(DaeError::SequenceError {
                backend: self.name.to_string(),
            });
        };

        for &t in rest {
            match engine.advance(t, false) {
                Advance::Reached { t, y, yp } => out.values.push(t, owned(&y), owned(&yp)),
                Advance::Root(hit) => {
                    out.flag = StatusFlag::RootReturn;
                    out.message = Some(root_message(hit.t, &hit.directions));
                    out.roots.push(hit.t, owned(&hit.y), owned(&hit.yp));
                    break;
                }
                Advance::Tstop { t, y, yp } => {
                    out.flag = StatusFlag::TstopReturn;
                    out.message = Some(format!("reached tstop = {t}"));
                    out.tstop.push(t, owned(&y), owned(&yp));
                    break;
                }
                Advance::Failed {
                    flag,
                    t,
                    y,
                    yp,
                    message,
                } => {
                    warn!("{}: solve stopped with {flag:?}: {message}", self.name);
                    out.flag = flag;
                    out.message = Some(message);
                    out.errors.push(t, owned(&y), owned(&yp));
                    break;
                }
            }
        }
        debug!(
            "{}: solve returned {} point(s) with {:?}",
            self.name,
            out.values.len(),
            out.flag
        );
        Ok(out)
    }

    fn statistics(&self) -> Result<IntegratorStats> {
        Ok(match &self.phase {
            Phase::Stepping(engine) => engine.stats().clone(),
            Phase::Configured => IntegratorStats::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn parse(options: &Options) -> Result<BdfSettings> {
        options.check_keys("test", &["one_step_compute", "old_api"])?;
        Ok(BdfSettings {
            one_step: options.bool_value("test", "one_step_compute")?.unwrap_or(false),
            legacy_time_sign: options.bool_value("test", "old_api")?.unwrap_or(true),
            ..Default::default()
        })
    }

    fn decay(_t: f64, y: &[f64], yp: &[f64], r: &mut [f64]) -> i32 {
        r[0] = yp[0] + y[0];
        0
    }

    fn driver(options: Options) -> BdfDriver {
        BdfDriver::new("test", Arc::new(decay), &options, parse).unwrap()
    }

    #[test]
    fn test_step_requires_init() {
        let mut d = driver(Options::new());
        let err = d.step(1.0, None, None).unwrap_err();
        assert!(matches!(err, DaeError::SequenceError { ref backend } if backend == "test"));
    }

    #[test]
    fn test_negative_time_is_one_step_in_legacy_mode() {
        let mut d = driver(Options::new());
        d.init_step(0.0, &[1.0], &[-1.0], None, None).unwrap();
        let out = d.step(-1.0, None, None).unwrap();
        assert_eq!(out.flag, StatusFlag::Success);
        assert!(out.values.t[0] > 0.0 && out.values.t[0] < 1.0);
        assert_eq!(d.statistics().unwrap().steps, 1);
    }

    #[test]
    fn test_negative_time_is_not_reinterpreted_in_structured_mode() {
        let mut d = driver(Options::new().set("old_api", false));
        d.init_step(0.0, &[1.0], &[-1.0], None, None).unwrap();
        let out = d.step(-1.0, None, None).unwrap();
        assert_eq!(out.values.t, vec![-1.0]);
        assert!((out.values.y[0][0] - 1.0f64.exp()).abs() < 1e-3);
    }

    #[test]
    fn test_wrong_buffer_length_is_rejected() {
        let mut d = driver(Options::new());
        let mut short = [0.0; 2];
        let err = d
            .init_step(0.0, &[1.0], &[-1.0], Some(&mut short[..]), None)
            .unwrap_err();
        assert!(matches!(err, DaeError::DimensionMismatch { what: "y_ic0", .. }));
    }

    #[test]
    fn test_set_options_returns_to_configured() {
        let mut d = driver(Options::new());
        d.init_step(0.0, &[1.0], &[-1.0], None, None).unwrap();
        d.step(0.5, None, None).unwrap();
        d.set_options(&Options::new().set("one_step_compute", true)).unwrap();
        assert_eq!(d.statistics().unwrap(), IntegratorStats::default());
        assert!(matches!(
            d.step(1.0, None, None),
            Err(DaeError::SequenceError { .. })
        ));
    }

    #[test]
    fn test_solve_rejects_non_monotone_tspan() {
        let mut d = driver(Options::new());
        assert!(matches!(
            d.solve(&[0.0, 1.0, 1.0], &[1.0], &[-1.0]),
            Err(DaeError::InvalidInput(_))
        ));
        assert!(matches!(
            d.solve(&[], &[1.0], &[-1.0]),
            Err(DaeError::InvalidInput(_))
        ));
    }
}
