//! Variable-step, variable-order BDF engine for G(t, y, y') = 0.
//!
//! Shared by the native backends. Each internal step solves
//!
//! ```text
//! G(t_{n+1}, y_{n+1}, alpha * y_{n+1} + beta) = 0
//! ```
//!
//! where `alpha`/`beta` come from differentiating the Lagrange polynomial
//! through `y_{n+1}` and the last `k` accepted points. The nonlinear system is
//! solved by modified Newton with a dense LU of `dG/dy + alpha * dG/dy'`
//! (finite differences unless a Jacobian function is supplied).
//!
//! # Step control
//!
//! - Predictor: extrapolation through the last `k + 1` points
//!   (explicit Euler with y'_n on the very first step)
//! - Local error estimate: `||y_corr - y_pred|| / (k + 1)` in the weighted
//!   RMS norm with weights `1 / (rtol * |y_i| + atol_i)`
//! - Step ratio limited to [0.5, 2] after accepted steps, [0.1, 0.9] after
//!   error test failures, 0.25 after Newton failures
//! - Order raised by one after `k + 1` steps at order `k`, up to `max_order`

use std::collections::VecDeque;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use super::traits::IntegratorStats;
use crate::error::{DaeError, Result as DaeResult};
use crate::residual::{JacobianFunction, Residual, RootFunction};
use crate::result::StatusFlag;

const NEWTON_TOL: f64 = 0.33;
const MAX_RATIO: f64 = 2.0;
const MIN_RATIO: f64 = 0.5;
const ROOT_BISECTIONS: usize = 80;

/// Absolute tolerance, scalar or per component.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tolerance {
    Scalar(f64),
    PerComponent(Vec<f64>),
}

impl Tolerance {
    fn at(&self, i: usize) -> f64 {
        match self {
            Tolerance::Scalar(v) => *v,
            Tolerance::PerComponent(v) => v[i],
        }
    }
}

/// Classification of algebraic components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AlgebraicVars {
    /// Indices of the algebraic components
    Indices(Vec<usize>),
    /// One entry per component, `true` for algebraic
    Mask(Vec<bool>),
}

impl AlgebraicVars {
    /// Expand to a per-component mask for `n` unknowns.
    pub fn mask(&self, n: usize) -> DaeResult<Vec<bool>> {
        match self {
            AlgebraicVars::Indices(indices) => {
                let mut mask = vec![false; n];
                for &i in indices {
                    if i >= n {
                        return Err(DaeError::InvalidInput(format!(
                            "algebraic variable index {i} out of range for {n} unknowns"
                        )));
                    }
                    mask[i] = true;
                }
                Ok(mask)
            }
            AlgebraicVars::Mask(mask) if mask.len() == n => Ok(mask.clone()),
            AlgebraicVars::Mask(mask) => Err(DaeError::DimensionMismatch {
                what: "algebraic variable classification",
                expected: n,
                found: mask.len(),
            }),
        }
    }
}

/// Which unknowns the consistent initial condition solver adjusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InitialCondition {
    /// Keep differential y fixed; solve for algebraic y and all y'.
    AlgebraicAndDerivatives,
    /// Keep y' fixed; solve for all of y.
    States,
}

/// Event functions attached to a run.
#[derive(Clone)]
pub(crate) struct RootSettings {
    pub count: usize,
    pub function: Arc<dyn RootFunction>,
}

/// Engine configuration parsed by each backend from its options.
#[derive(Clone)]
pub(crate) struct BdfSettings {
    pub rtol: f64,
    pub atol: Tolerance,
    pub max_order: usize,
    pub max_steps: usize,
    pub first_step: Option<f64>,
    pub max_step: Option<f64>,
    pub max_nonlinear_iters: usize,
    pub max_convergence_fails: usize,
    pub max_error_test_fails: usize,
    pub algebraic: Option<AlgebraicVars>,
    pub exclude_algebraic_from_error: bool,
    pub initial_condition: Option<InitialCondition>,
    pub tstop: Option<f64>,
    pub one_step: bool,
    pub legacy_time_sign: bool,
    pub enforce_nonnegative: bool,
    pub roots: Option<RootSettings>,
    pub jacobian: Option<Arc<dyn JacobianFunction>>,
}

impl std::fmt::Debug for BdfSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BdfSettings")
            .field("rtol", &self.rtol)
            .field("atol", &self.atol)
            .field("max_order", &self.max_order)
            .field("max_steps", &self.max_steps)
            .field("first_step", &self.first_step)
            .field("max_step", &self.max_step)
            .field("max_nonlinear_iters", &self.max_nonlinear_iters)
            .field("max_convergence_fails", &self.max_convergence_fails)
            .field("max_error_test_fails", &self.max_error_test_fails)
            .field("algebraic", &self.algebraic)
            .field("exclude_algebraic_from_error", &self.exclude_algebraic_from_error)
            .field("initial_condition", &self.initial_condition)
            .field("tstop", &self.tstop)
            .field("one_step", &self.one_step)
            .field("legacy_time_sign", &self.legacy_time_sign)
            .field("enforce_nonnegative", &self.enforce_nonnegative)
            .field("roots", &self.roots.as_ref().map(|r| r.count))
            .field("jacobian", &self.jacobian.is_some())
            .finish()
    }
}

impl Default for BdfSettings {
    fn default() -> Self {
        Self {
            rtol: 1e-6,
            atol: Tolerance::Scalar(1e-12),
            max_order: 5,
            max_steps: 500,
            first_step: None,
            max_step: None,
            max_nonlinear_iters: 4,
            max_convergence_fails: 10,
            max_error_test_fails: 10,
            algebraic: None,
            exclude_algebraic_from_error: false,
            initial_condition: None,
            tstop: None,
            one_step: false,
            legacy_time_sign: true,
            enforce_nonnegative: false,
            roots: None,
            jacobian: None,
        }
    }
}

impl BdfSettings {
    /// Weights `1 / (rtol * |y_i| + atol_i)` of the RMS error norm.
    pub fn error_weights(&self, y: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            y.len(),
            (0..y.len()).map(|i| 1.0 / (self.rtol * y[i].abs() + self.atol.at(i))),
        )
    }
}

/// A located zero crossing.
#[derive(Debug, Clone)]
pub(crate) struct RootHit {
    pub t: f64,
    pub y: DVector<f64>,
    pub yp: DVector<f64>,
    /// +1 rising, -1 falling, 0 no crossing, per root function
    pub directions: Vec<i32>,
}

/// Outcome of [`BdfEngine::advance`].
#[derive(Debug, Clone)]
pub(crate) enum Advance {
    Reached {
        t: f64,
        y: DVector<f64>,
        yp: DVector<f64>,
    },
    Root(RootHit),
    Tstop {
        t: f64,
        y: DVector<f64>,
        yp: DVector<f64>,
    },
    Failed {
        flag: StatusFlag,
        t: f64,
        y: DVector<f64>,
        yp: DVector<f64>,
        message: String,
    },
}

enum Attempt {
    Accepted {
        y: DVector<f64>,
        yp: DVector<f64>,
        error: f64,
    },
    ErrorTest(f64),
    NonConvergence,
    SingularMatrix,
    RecoverableResidual,
    Failed(StatusFlag),
}

/// Integration state of one run.
pub(crate) struct BdfEngine {
    residual: Residual,
    settings: BdfSettings,
    n: usize,
    algebraic_mask: Option<Vec<bool>>,
    /// Accepted times, most recent first
    hist_t: VecDeque<f64>,
    /// Accepted states, most recent first
    hist_y: VecDeque<DVector<f64>>,
    /// Derivative at `hist_t[0]`
    yp: DVector<f64>,
    h: f64,
    order: usize,
    steps_at_order: usize,
    direction: f64,
    g_last: Option<(f64, Vec<f64>)>,
    stats: IntegratorStats,
}

impl BdfEngine {
    pub fn new(
        residual: Residual,
        settings: BdfSettings,
        t0: f64,
        y0: DVector<f64>,
        yp0: DVector<f64>,
    ) -> Self {
        let n = y0.len();
        let algebraic_mask = settings.algebraic.as_ref().and_then(|a| a.mask(n).ok());
        let mut hist_t = VecDeque::with_capacity(settings.max_order + 2);
        let mut hist_y = VecDeque::with_capacity(settings.max_order + 2);
        hist_t.push_front(t0);
        hist_y.push_front(y0);
        Self {
            residual,
            settings,
            n,
            algebraic_mask,
            hist_t,
            hist_y,
            yp: yp0,
            h: 0.0,
            order: 1,
            steps_at_order: 0,
            direction: 0.0,
            g_last: None,
            stats: IntegratorStats {
                current_time: t0,
                ..Default::default()
            },
        }
    }

    pub fn t(&self) -> f64 {
        self.hist_t[0]
    }

    pub fn y(&self) -> &DVector<f64> {
        &self.hist_y[0]
    }

    pub fn stats(&self) -> &IntegratorStats {
        &self.stats
    }

    /// Record g(t0) so the first crossing can be detected.
    pub fn prime_roots(&mut self) -> Result<(), StatusFlag> {
        if self.settings.roots.is_none() {
            return Ok(());
        }
        let t = self.t();
        let y = self.y().clone();
        let yp = self.yp.clone();
        let g = self.eval_roots(t, &y, &yp)?;
        self.g_last = Some((t, g));
        Ok(())
    }

    /// Advance toward `tout`.
    ///
    /// Full-advance mode interpolates the solution at `tout` once an internal
    /// step passes it. One-step mode returns after a single internal step.
    pub fn advance(&mut self, tout: f64, one_step: bool) -> Advance {
        if !tout.is_finite() {
            return self.failed(
                StatusFlag::IllegalInput,
                format!("output time {tout} is not finite"),
            );
        }
        if self.direction == 0.0 {
            self.direction = if tout < self.t() { -1.0 } else { 1.0 };
        }
        let dir = self.direction;

        if let Some(tstop) = self.settings.tstop
            && (!tstop.is_finite() || (tstop - self.t()) * dir < 0.0)
        {
            return self.failed(
                StatusFlag::IllegalInput,
                format!("tstop = {tstop} is behind t = {} in the direction of integration", self.t()),
            );
        }

        if !one_step
            && (tout - self.t()) * dir < 0.0
            && self.hist_t.back().is_some_and(|&oldest| (tout - oldest) * dir < 0.0)
        {
            return self.failed(
                StatusFlag::BadTime,
                format!("tout = {tout} is behind the current interpolation interval"),
            );
        }

        let mut steps_taken = 0usize;
        loop {
            let horizon = if one_step || (self.t() - tout) * dir < 0.0 {
                self.t()
            } else {
                tout
            };
            match self.check_roots(horizon) {
                Ok(Some(hit)) => return Advance::Root(hit),
                Ok(None) => {}
                Err(flag) => return self.failed(flag, "root function returned a failure status"),
            }

            if let Some(tstop) = self.settings.tstop
                && self.t() == tstop
                && (one_step || (tout - tstop) * dir >= 0.0)
            {
                self.settings.tstop = None;
                return Advance::Tstop {
                    t: tstop,
                    y: self.y().clone(),
                    yp: self.yp.clone(),
                };
            }

            if one_step && steps_taken > 0 {
                return Advance::Reached {
                    t: self.t(),
                    y: self.y().clone(),
                    yp: self.yp.clone(),
                };
            }
            if !one_step && (self.t() - tout) * dir >= 0.0 {
                let (y, yp) = self.interpolate(tout);
                return Advance::Reached { t: tout, y, yp };
            }

            if steps_taken >= self.settings.max_steps {
                return self.failed(
                    StatusFlag::TooMuchWork,
                    format!(
                        "reached max_steps = {} before t = {tout}",
                        self.settings.max_steps
                    ),
                );
            }

            let tolsf = f64::EPSILON * self.wrms(self.y(), &self.error_weights(self.y()));
            if tolsf > 1.0 {
                return self.failed(
                    StatusFlag::TooMuchAccuracy,
                    format!("tolerances too small at t = {}; scale them up by {tolsf:.1e}", self.t()),
                );
            }

            if self.h == 0.0 {
                self.h = self.initial_step(tout);
            }
            if let Err(flag) = self.internal_step() {
                return self.failed(flag, format!("at t = {}: {}", self.t(), flag.describe()));
            }
            steps_taken += 1;
        }
    }

    fn failed(&self, flag: StatusFlag, message: impl Into<String>) -> Advance {
        Advance::Failed {
            flag,
            t: self.t(),
            y: self.y().clone(),
            yp: self.yp.clone(),
            message: message.into(),
        }
    }

    /// Value and derivative of the interpolating polynomial at `t`.
    pub fn interpolate(&self, t: f64) -> (DVector<f64>, DVector<f64>) {
        if self.hist_t.len() == 1 {
            let dt = t - self.t();
            return (self.y() + &self.yp * dt, self.yp.clone());
        }
        let k = (self.order + 1).min(self.hist_t.len());
        let nodes: Vec<f64> = self.hist_t.iter().take(k).copied().collect();
        let (lw, dw) = lagrange_weights(&nodes, t);
        let mut y = DVector::zeros(self.n);
        let mut yp = DVector::zeros(self.n);
        for j in 0..k {
            y.axpy(lw[j], &self.hist_y[j], 1.0);
            yp.axpy(dw[j], &self.hist_y[j], 1.0);
        }
        (y, yp)
    }

    fn predict(&self, t_new: f64) -> DVector<f64> {
        if self.hist_t.len() == 1 {
            return self.y() + &self.yp * (t_new - self.t());
        }
        let k = (self.order + 1).min(self.hist_t.len());
        let nodes: Vec<f64> = self.hist_t.iter().take(k).copied().collect();
        let (lw, _) = lagrange_weights(&nodes, t_new);
        let mut y = DVector::zeros(self.n);
        for j in 0..k {
            y.axpy(lw[j], &self.hist_y[j], 1.0);
        }
        y
    }

    pub fn error_weights(&self, y: &DVector<f64>) -> DVector<f64> {
        self.settings.error_weights(y)
    }

    pub fn wrms(&self, v: &DVector<f64>, weights: &DVector<f64>) -> f64 {
        let skip = |i: usize| {
            self.settings.exclude_algebraic_from_error
                && self.algebraic_mask.as_ref().is_some_and(|mask| mask[i])
        };
        let mut sum = 0.0;
        let mut count = 0usize;
        for i in (0..self.n).filter(|&i| !skip(i)) {
            let w = v[i] * weights[i];
            sum += w * w;
            count += 1;
        }
        if count == 0 { 0.0 } else { (sum / count as f64).sqrt() }
    }

    fn initial_step(&self, tout: f64) -> f64 {
        if let Some(h0) = self.settings.first_step {
            return h0.abs() * self.direction;
        }
        let span = (tout - self.t()).abs();
        let mut h = if span > 0.0 { 1e-3 * span } else { 1e-6 * self.t().abs().max(1.0) };
        let weights = self.error_weights(self.y());
        let yp_norm = self.wrms(&self.yp, &weights);
        if yp_norm * h > 0.5 {
            h = 0.5 / yp_norm;
        }
        if let Some(max) = self.settings.max_step {
            h = h.min(max.abs());
        }
        h * self.direction
    }

    fn min_step(&self) -> f64 {
        100.0 * f64::EPSILON * self.t().abs().max(1.0)
    }

    /// Take one accepted internal step, retrying with smaller sizes on failure.
    fn internal_step(&mut self) -> Result<(), StatusFlag> {
        let mut error_fails = 0usize;
        let mut convergence_fails = 0usize;
        let mut residual_fails = 0usize;
        let mut singular_fails = 0usize;

        loop {
            let mut h = self.h;
            if let Some(max) = self.settings.max_step
                && h.abs() > max.abs()
            {
                h = max.abs() * self.direction;
            }
            if let Some(tstop) = self.settings.tstop
                && (self.t() + h - tstop) * self.direction > 0.0
                && (tstop - self.t()) * self.direction > 0.0
            {
                h = tstop - self.t();
            }
            if h.abs() < self.min_step() {
                return Err(if error_fails > 0 {
                    StatusFlag::ErrorTestFailure
                } else if residual_fails > 0 {
                    StatusFlag::RepeatedResidualError
                } else if singular_fails > 0 {
                    StatusFlag::LinearSolveFailure
                } else {
                    StatusFlag::ConvergenceFailure
                });
            }

            let k = self.order.min(self.hist_t.len());
            match self.attempt(h, k) {
                Attempt::Accepted { y, yp, error } => {
                    let t_new = if self
                        .settings
                        .tstop
                        .is_some_and(|tstop| (self.t() + h - tstop).abs() <= self.min_step())
                    {
                        self.settings.tstop.unwrap_or(self.t() + h)
                    } else {
                        self.t() + h
                    };
                    self.accept(t_new, y, yp, h, k, error);
                    return Ok(());
                }
                Attempt::ErrorTest(error) => {
                    self.stats.error_test_fails += 1;
                    error_fails += 1;
                    if error_fails >= self.settings.max_error_test_fails {
                        return Err(StatusFlag::ErrorTestFailure);
                    }
                    let ratio = if error_fails > 1 {
                        0.25
                    } else {
                        (0.9 * error.powf(-1.0 / (k as f64 + 1.0))).clamp(0.1, 0.9)
                    };
                    if error_fails > 1 && self.order > 1 {
                        self.order -= 1;
                        self.steps_at_order = 0;
                    }
                    self.h = h * ratio;
                }
                Attempt::NonConvergence => {
                    self.stats.convergence_fails += 1;
                    convergence_fails += 1;
                    if convergence_fails >= self.settings.max_convergence_fails {
                        return Err(StatusFlag::ConvergenceFailure);
                    }
                    self.h = h * 0.25;
                }
                Attempt::SingularMatrix => {
                    singular_fails += 1;
                    if singular_fails >= self.settings.max_convergence_fails {
                        return Err(StatusFlag::LinearSolveFailure);
                    }
                    self.h = h * 0.25;
                }
                Attempt::RecoverableResidual => {
                    residual_fails += 1;
                    if residual_fails >= self.settings.max_convergence_fails {
                        return Err(StatusFlag::RepeatedResidualError);
                    }
                    self.h = h * 0.25;
                }
                Attempt::Failed(flag) => return Err(flag),
            }
        }
    }

    fn accept(&mut self, t_new: f64, y: DVector<f64>, yp: DVector<f64>, h: f64, k: usize, error: f64) {
        self.hist_t.push_front(t_new);
        self.hist_y.push_front(y);
        self.hist_t.truncate(self.settings.max_order + 2);
        self.hist_y.truncate(self.settings.max_order + 2);
        self.yp = yp;

        self.stats.steps += 1;
        self.stats.last_order = k;
        self.stats.last_step = h;
        self.stats.current_time = t_new;

        self.steps_at_order += 1;
        if self.steps_at_order > self.order
            && self.order < self.settings.max_order
            && self.hist_t.len() > self.order + 1
        {
            self.order += 1;
            self.steps_at_order = 0;
        }

        let ratio = if error <= f64::MIN_POSITIVE {
            MAX_RATIO
        } else {
            (0.9 * error.powf(-1.0 / (k as f64 + 1.0))).clamp(MIN_RATIO, MAX_RATIO)
        };
        // Small increases are not worth disturbing the history spacing.
        self.h = if (1.0..1.5).contains(&ratio) { h } else { h * ratio };
    }

    fn attempt(&mut self, h: f64, k: usize) -> Attempt {
        let t_new = self.t() + h;

        let mut nodes = Vec::with_capacity(k + 1);
        nodes.push(t_new);
        nodes.extend(self.hist_t.iter().take(k).copied());
        let (_, dw) = lagrange_weights(&nodes, t_new);
        let alpha = dw[0];
        let mut beta = DVector::zeros(self.n);
        for j in 1..=k {
            beta.axpy(dw[j], &self.hist_y[j - 1], 1.0);
        }

        let y_pred = self.predict(t_new);
        let weights = self.error_weights(self.y());

        let mut y = y_pred.clone();
        let mut yp = &y * alpha + &beta;
        let mut res = DVector::zeros(self.n);

        match self.eval_residual(t_new, &y, &yp, &mut res) {
            0 => {}
            s if s > 0 => return Attempt::RecoverableResidual,
            _ => return Attempt::Failed(StatusFlag::ResidualFailure),
        }
        let jac = match self.iteration_matrix(t_new, &y, &yp, &res, alpha) {
            Ok(jac) => jac,
            Err(flag) => return Attempt::Failed(flag),
        };
        let lu = jac.lu();
        if !lu.is_invertible() {
            return Attempt::SingularMatrix;
        }

        let mut first_norm = 0.0;
        let mut converged = false;
        for m in 0..self.settings.max_nonlinear_iters {
            if m > 0 {
                match self.eval_residual(t_new, &y, &yp, &mut res) {
                    0 => {}
                    s if s > 0 => return Attempt::RecoverableResidual,
                    _ => return Attempt::Failed(StatusFlag::ResidualFailure),
                }
            }
            self.stats.nonlinear_iters += 1;
            let Some(delta) = lu.solve(&(-&res)) else {
                return Attempt::SingularMatrix;
            };
            y += &delta;
            yp = &y * alpha + &beta;

            let norm = self.wrms(&delta, &weights);
            if !norm.is_finite() {
                return Attempt::NonConvergence;
            }
            if m == 0 {
                first_norm = norm;
                if norm <= NEWTON_TOL * 1e-2 {
                    converged = true;
                    break;
                }
            } else {
                let rate = (norm / first_norm).powf(1.0 / m as f64);
                if rate > 0.9 {
                    return Attempt::NonConvergence;
                }
                if rate / (1.0 - rate) * norm <= NEWTON_TOL {
                    converged = true;
                    break;
                }
            }
        }
        if !converged {
            return Attempt::NonConvergence;
        }

        if self.settings.enforce_nonnegative && y.iter().any(|&v| v < 0.0) {
            return Attempt::ErrorTest(2.0);
        }

        let error = self.wrms(&(&y - &y_pred), &weights) / (k as f64 + 1.0);
        if error > 1.0 {
            return Attempt::ErrorTest(error);
        }
        Attempt::Accepted { y, yp, error }
    }

    fn eval_residual(&mut self, t: f64, y: &DVector<f64>, yp: &DVector<f64>, out: &mut DVector<f64>) -> i32 {
        self.stats.residual_evals += 1;
        self.residual
            .evaluate(t, y.as_slice(), yp.as_slice(), out.as_mut_slice())
    }

    /// dG/dy + alpha * dG/dy', analytic or by forward differences.
    fn iteration_matrix(
        &mut self,
        t: f64,
        y: &DVector<f64>,
        yp: &DVector<f64>,
        res: &DVector<f64>,
        alpha: f64,
    ) -> Result<DMatrix<f64>, StatusFlag> {
        self.stats.jacobian_evals += 1;
        let mut jac = DMatrix::zeros(self.n, self.n);

        if let Some(jacfn) = self.settings.jacobian.clone() {
            let status = jacfn.evaluate(t, y.as_slice(), yp.as_slice(), res.as_slice(), alpha, &mut jac);
            return if status == 0 {
                Ok(jac)
            } else {
                Err(StatusFlag::LinearSetupFailure)
            };
        }

        let sqrt_eps = f64::EPSILON.sqrt();
        let mut y_pert = y.clone();
        let mut yp_pert = yp.clone();
        let mut res_pert = DVector::zeros(self.n);
        for i in 0..self.n {
            let delta = sqrt_eps * y[i].abs().max(1.0);
            y_pert[i] = y[i] + delta;
            yp_pert[i] = yp[i] + alpha * delta;
            if self.eval_residual(t, &y_pert, &yp_pert, &mut res_pert) < 0 {
                return Err(StatusFlag::LinearSetupFailure);
            }
            for r in 0..self.n {
                jac[(r, i)] = (res_pert[r] - res[r]) / delta;
            }
            y_pert[i] = y[i];
            yp_pert[i] = yp[i];
        }
        Ok(jac)
    }

    fn eval_roots(&mut self, t: f64, y: &DVector<f64>, yp: &DVector<f64>) -> Result<Vec<f64>, StatusFlag> {
        let Some(roots) = self.settings.roots.clone() else {
            return Ok(Vec::new());
        };
        self.stats.root_evals += 1;
        let mut g = vec![0.0; roots.count];
        if roots.function.evaluate(t, y.as_slice(), yp.as_slice(), &mut g) != 0 {
            return Err(StatusFlag::RootFunctionFailure);
        }
        Ok(g)
    }

    /// Look for a sign change of g between the last checked time and `upto`.
    fn check_roots(&mut self, upto: f64) -> Result<Option<RootHit>, StatusFlag> {
        let Some((t_lo, g_lo)) = self.g_last.clone() else {
            return Ok(None);
        };
        if (upto - t_lo) * self.direction <= 0.0 {
            return Ok(None);
        }

        let (y_hi, yp_hi) = self.interpolate(upto);
        let g_hi = self.eval_roots(upto, &y_hi, &yp_hi)?;
        if !sign_change(&g_lo, &g_hi) {
            self.g_last = Some((upto, g_hi));
            return Ok(None);
        }

        // Bisect on the interpolant for the earliest crossing.
        let (mut lo, mut hi) = (t_lo, upto);
        let mut g_lo_b = g_lo.clone();
        let mut g_hi_b = g_hi;
        let tol = 4.0 * f64::EPSILON * hi.abs().max(1.0);
        for _ in 0..ROOT_BISECTIONS {
            if (hi - lo).abs() <= tol {
                break;
            }
            let mid = 0.5 * (lo + hi);
            let (y_mid, yp_mid) = self.interpolate(mid);
            let g_mid = self.eval_roots(mid, &y_mid, &yp_mid)?;
            if sign_change(&g_lo_b, &g_mid) {
                hi = mid;
                g_hi_b = g_mid;
            } else {
                lo = mid;
                g_lo_b = g_mid;
            }
        }

        let directions = g_lo
            .iter()
            .zip(&g_hi_b)
            .map(|(&a, &b)| {
                if a * b < 0.0 || (b == 0.0 && a != 0.0) {
                    if b > a { 1 } else { -1 }
                } else {
                    0
                }
            })
            .collect();
        let (y, yp) = self.interpolate(hi);
        self.g_last = Some((hi, g_hi_b));
        Ok(Some(RootHit {
            t: hi,
            y,
            yp,
            directions,
        }))
    }
}

fn sign_change(before: &[f64], after: &[f64]) -> bool {
    before
        .iter()
        .zip(after)
        .any(|(&a, &b)| a * b < 0.0 || (b == 0.0 && a != 0.0))
}

/// Lagrange basis values and derivatives at `t` over `nodes`.
pub(crate) fn lagrange_weights(nodes: &[f64], t: f64) -> (Vec<f64>, Vec<f64>) {
    let k = nodes.len();
    let mut values = vec![0.0; k];
    let mut derivs = vec![0.0; k];
    for j in 0..k {
        let mut l = 1.0;
        for m in (0..k).filter(|&m| m != j) {
            l *= (t - nodes[m]) / (nodes[j] - nodes[m]);
        }
        values[j] = l;

        let mut d = 0.0;
        for m in (0..k).filter(|&m| m != j) {
            let mut p = 1.0 / (nodes[j] - nodes[m]);
            for q in (0..k).filter(|&q| q != j && q != m) {
                p *= (t - nodes[q]) / (nodes[j] - nodes[q]);
            }
            d += p;
        }
        derivs[j] = d;
    }
    (values, derivs)
}
