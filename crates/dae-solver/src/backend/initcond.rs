//! Consistent initial conditions.
//!
//! Given a guess (y0, y'0) that does not satisfy G(t0, y0, y'0) = 0, adjust a
//! subset of the unknowns with Newton's method until it does:
//!
//! - [`InitialCondition::AlgebraicAndDerivatives`]: differential components
//!   of y are held fixed; algebraic y and every y' are solved for. Without a
//!   classification all components are treated as differential.
//! - [`InitialCondition::States`]: y' is held fixed and y is solved for.

use nalgebra::{DMatrix, DVector};

use super::bdf::InitialCondition;
use crate::residual::ResidualFunction;

const MAX_ITERS: usize = 10;
const CONVERGENCE_TOL: f64 = 0.0033;

/// Corrected initial values.
#[derive(Debug, Clone)]
pub(crate) struct ConsistentStart {
    pub y: DVector<f64>,
    pub yp: DVector<f64>,
    pub iterations: usize,
    pub residual_evals: usize,
}

#[derive(Clone, Copy)]
enum Unknown {
    State(usize),
    Derivative(usize),
}

/// Solve for consistent (y0, y'0).
///
/// `weights` maps a state to the integrator's error weights; convergence is
/// declared when the weighted RMS norm of the Newton update drops below
/// 0.0033.
///
/// # Errors
///
/// Returns a description of the failure when the residual reports an error,
/// the iteration matrix is singular or Newton does not converge.
pub(crate) fn consistent_initial_conditions(
    residual: &dyn ResidualFunction,
    t0: f64,
    y0: &DVector<f64>,
    yp0: &DVector<f64>,
    mode: InitialCondition,
    algebraic: Option<&[bool]>,
    weights: impl Fn(&DVector<f64>) -> DVector<f64>,
) -> Result<ConsistentStart, String> {
    let n = y0.len();
    let unknowns: Vec<Unknown> = (0..n)
        .map(|i| match mode {
            InitialCondition::States => Unknown::State(i),
            InitialCondition::AlgebraicAndDerivatives => {
                if algebraic.is_some_and(|mask| mask[i]) {
                    Unknown::State(i)
                } else {
                    Unknown::Derivative(i)
                }
            }
        })
        .collect();

    let mut y = y0.clone();
    let mut yp = yp0.clone();
    let mut res = DVector::zeros(n);
    let mut evals = 0usize;

    for iteration in 1..=MAX_ITERS {
        if evaluate(residual, t0, &y, &yp, &mut res, &mut evals) != 0 {
            return Err(format!("residual failed at t = {t0} during iteration {iteration}"));
        }

        let mut jac = DMatrix::zeros(n, n);
        let mut res_pert = DVector::zeros(n);
        let sqrt_eps = f64::EPSILON.sqrt();
        for (col, unknown) in unknowns.iter().enumerate() {
            let (base, delta) = match *unknown {
                Unknown::State(i) => (y[i], sqrt_eps * y[i].abs().max(1.0)),
                Unknown::Derivative(i) => (yp[i], sqrt_eps * yp[i].abs().max(1.0)),
            };
            set(&mut y, &mut yp, *unknown, base + delta);
            let status = evaluate(residual, t0, &y, &yp, &mut res_pert, &mut evals);
            set(&mut y, &mut yp, *unknown, base);
            if status != 0 {
                return Err(format!("residual failed while building the Jacobian at t = {t0}"));
            }
            for row in 0..n {
                jac[(row, col)] = (res_pert[row] - res[row]) / delta;
            }
        }

        let Some(delta) = jac.lu().solve(&(-&res)) else {
            return Err("singular iteration matrix; check the algebraic variable classification".to_string());
        };

        let w = weights(&y);
        let mut scaled = 0.0;
        for (col, unknown) in unknowns.iter().enumerate() {
            let i = match *unknown {
                Unknown::State(i) | Unknown::Derivative(i) => i,
            };
            match *unknown {
                Unknown::State(_) => y[i] += delta[col],
                Unknown::Derivative(_) => yp[i] += delta[col],
            }
            let d = delta[col] * w[i];
            scaled += d * d;
        }
        let norm = (scaled / n.max(1) as f64).sqrt();
        if !norm.is_finite() {
            return Err("Newton update is not finite".to_string());
        }
        if norm <= CONVERGENCE_TOL {
            return Ok(ConsistentStart {
                y,
                yp,
                iterations: iteration,
                residual_evals: evals,
            });
        }
    }

    Err(format!("no convergence after {MAX_ITERS} Newton iterations"))
}

fn evaluate(
    residual: &dyn ResidualFunction,
    t: f64,
    y: &DVector<f64>,
    yp: &DVector<f64>,
    out: &mut DVector<f64>,
    evals: &mut usize,
) -> i32 {
    *evals += 1;
    residual.evaluate(t, y.as_slice(), yp.as_slice(), out.as_mut_slice())
}

fn set(y: &mut DVector<f64>, yp: &mut DVector<f64>, unknown: Unknown, value: f64) {
    match unknown {
        Unknown::State(i) => y[i] = value,
        Unknown::Derivative(i) => yp[i] = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // y0' = -y0 + y1, 0 = y1 - 2 y0
    fn semi_explicit(_t: f64, y: &[f64], yp: &[f64], r: &mut [f64]) -> i32 {
        r[0] = yp[0] + y[0] - y[1];
        r[1] = y[1] - 2.0 * y[0];
        0
    }

    fn weights(y: &DVector<f64>) -> DVector<f64> {
        y.map(|v| 1.0 / (1e-6 * v.abs() + 1e-12))
    }

    #[test]
    fn test_recovers_algebraic_state_and_derivative() {
        let y0 = DVector::from_vec(vec![1.0, 0.0]);
        let yp0 = DVector::zeros(2);
        let start = consistent_initial_conditions(
            &semi_explicit,
            0.0,
            &y0,
            &yp0,
            InitialCondition::AlgebraicAndDerivatives,
            Some(&[false, true][..]),
            weights,
        )
        .unwrap();
        assert_eq!(start.y[0], 1.0);
        assert!((start.y[1] - 2.0).abs() < 1e-8);
        assert!((start.yp[0] - 1.0).abs() < 1e-8);
    }

    #[test]
    fn test_states_mode_keeps_derivatives() {
        let decay = |_t: f64, y: &[f64], yp: &[f64], r: &mut [f64]| {
            r[0] = yp[0] + y[0];
            0
        };
        let start = consistent_initial_conditions(
            &decay,
            0.0,
            &DVector::from_vec(vec![0.0]),
            &DVector::from_vec(vec![-3.0]),
            InitialCondition::States,
            None,
            weights,
        )
        .unwrap();
        assert!((start.y[0] - 3.0).abs() < 1e-8);
        assert_eq!(start.yp[0], -3.0);
    }

    #[test]
    fn test_singular_system_is_reported() {
        // algebraic component treated as differential: dG/dy' has a zero row
        let err = consistent_initial_conditions(
            &semi_explicit,
            0.0,
            &DVector::from_vec(vec![1.0, 0.0]),
            &DVector::zeros(2),
            InitialCondition::AlgebraicAndDerivatives,
            None,
            weights,
        )
        .unwrap_err();
        assert!(err.contains("singular"));
    }
}
