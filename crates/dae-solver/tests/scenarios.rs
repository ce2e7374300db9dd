//! End-to-end integration tests on the built-in backends
//!
//! The oscillator x0' = x1, x1' = -4 x0 with x(0) = [1, 0.1] has the exact
//! solution x0 = cos 2t + 0.05 sin 2t, x1 = -2 sin 2t + 0.1 cos 2t.
use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};

use dae_solver::{Dae, DaeError, Options, StatusFlag};
use nalgebra::DMatrix;

fn oscillator(_t: f64, x: &[f64], xp: &[f64], r: &mut [f64]) -> i32 {
    r[0] = xp[1] + 4.0 * x[0];
    r[1] = xp[0] - x[1];
    0
}

fn exact(t: f64) -> [f64; 2] {
    let (s, c) = (2.0 * t).sin_cos();
    [c + 0.05 * s, -2.0 * s + 0.1 * c]
}

// y0' = y1 - y0, 0 = y1 - 2 y0  =>  y0 = e^t
fn semi_explicit(_t: f64, y: &[f64], yp: &[f64], r: &mut [f64]) -> i32 {
    r[0] = yp[0] + y[0] - y[1];
    r[1] = y[1] - 2.0 * y[0];
    0
}

fn structured() -> Options {
    Options::new().set("old_api", false)
}

const Y0: [f64; 2] = [1.0, 0.1];
const YP0: [f64; 2] = [0.1, -4.0];

#[test]
fn test_scenario_oscillator_solve_on_ida() {
    let mut dae = Dae::new("ida", oscillator, &Options::new()).unwrap();
    let result = dae.solve(&[0.0, 1.0, 2.0], &Y0, &YP0).unwrap();
    let legacy = result.legacy().expect("legacy result by default");

    assert_eq!(legacy.flag(), StatusFlag::Success);
    assert_eq!(legacy.t(), &[0.0, 1.0, 2.0]);
    assert_eq!(legacy.t_err(), None);
    assert!(legacy.y_err().is_none());
    assert!(legacy.yp_err().is_none());

    for (t, y) in legacy.t().iter().zip(legacy.y()) {
        let x = exact(*t);
        assert!((y[0] - x[0]).abs() < 1e-3, "x0({t}) = {} expected {}", y[0], x[0]);
        assert!((y[1] - x[1]).abs() < 1e-3, "x1({t}) = {} expected {}", y[1], x[1]);
    }
}

#[test]
fn test_scenario_name_lookup_ignores_case() {
    let lower = Dae::new("ida", oscillator, &Options::new()).unwrap();
    let upper = Dae::new("IDA", oscillator, &Options::new()).unwrap();
    assert_eq!(lower.backend_name(), upper.backend_name());
    assert_eq!(upper.backend_name(), "ida");

    let alias = Dae::new("Sundials_Ida", oscillator, &Options::new()).unwrap();
    assert_eq!(alias.backend_name(), "ida");
}

#[test]
fn test_scenario_unknown_backend() {
    let err = Dae::new("nonexistent", oscillator, &Options::new()).unwrap_err();
    assert!(matches!(err, DaeError::NameNotFound(ref name) if name == "nonexistent"));
    assert!(err.to_string().contains("nonexistent"));
}

#[test]
fn test_scenario_caller_buffers_are_written_in_place() {
    let mut dae = Dae::new("ida", oscillator, &Options::new()).unwrap();
    let mut y = [0.0; 2];
    let mut yp = [0.0; 2];
    let (y_ptr, yp_ptr) = (y.as_ptr(), yp.as_ptr());

    {
        let init = dae
            .init_step(0.0, &Y0, &YP0, Some(&mut y[..]), Some(&mut yp[..]))
            .unwrap();
        let init = init.legacy().unwrap();
        assert!(matches!(init.y()[0], Cow::Borrowed(_)));
        assert_eq!(init.y()[0].as_ptr(), y_ptr);
    }
    assert_eq!(y, Y0);

    for t in [0.5, 1.0] {
        {
            let result = dae.step(t, Some(&mut y[..]), Some(&mut yp[..])).unwrap();
            let legacy = result.legacy().unwrap();
            assert_eq!(legacy.flag(), StatusFlag::Success);
            assert_eq!(legacy.t(), &[t]);
            assert_eq!(legacy.y()[0].as_ptr(), y_ptr);
            assert_eq!(legacy.yp()[0].as_ptr(), yp_ptr);
        }
        let x = exact(t);
        assert!((y[0] - x[0]).abs() < 1e-3);
        assert!((y[1] - x[1]).abs() < 1e-3);
    }
}

#[test]
fn test_structured_result_keeps_empty_records() {
    let mut dae = Dae::new("ida", oscillator, &structured()).unwrap();
    let result = dae.solve(&[0.0, 0.5], &Y0, &YP0).unwrap();
    let s = result.structured().expect("old_api = false gives structured results");
    assert_eq!(s.flag, StatusFlag::Success);
    assert_eq!(s.values.t, vec![0.0, 0.5]);
    assert!(s.errors.is_empty());
    assert!(s.roots.is_empty());
    assert!(s.tstop.is_empty());
}

#[test]
fn test_backward_tspan() {
    let mut dae = Dae::new("ida", oscillator, &structured()).unwrap();
    let x1 = exact(1.0);
    let xp1 = [x1[1], -4.0 * x1[0]];
    let result = dae.solve(&[1.0, 0.5, 0.0], &x1, &xp1).unwrap();
    let s = result.structured().unwrap();
    assert_eq!(s.flag, StatusFlag::Success);
    assert_eq!(s.values.t, vec![1.0, 0.5, 0.0]);
    assert!((s.values.y[2][0] - 1.0).abs() < 1e-3);
}

#[test]
fn test_consistent_initial_conditions_on_ida() {
    let opts = Options::new()
        .set("compute_initcond", "yp0")
        .set("algebraic_vars_idx", vec![1usize])
        .set("exclude_algvar_from_error", true);
    let mut dae = Dae::new("ida", semi_explicit, &opts).unwrap();

    let mut y = [0.0; 2];
    let mut yp = [0.0; 2];
    let flag = dae
        .init_step(0.0, &[1.0, 0.0], &[0.0, 0.0], Some(&mut y[..]), Some(&mut yp[..]))
        .unwrap()
        .flag();
    assert_eq!(flag, StatusFlag::Success);
    assert_eq!(y[0], 1.0);
    assert!((y[1] - 2.0).abs() < 1e-6);
    assert!((yp[0] - 1.0).abs() < 1e-6);

    let result = dae.step(1.0, Some(&mut y[..]), None).unwrap();
    assert_eq!(result.flag(), StatusFlag::Success);
    drop(result);
    let e = 1.0f64.exp();
    assert!((y[0] - e).abs() < 1e-3 * e);
    assert!((y[1] - 2.0 * e).abs() < 2e-3 * e);
}

#[test]
fn test_consistent_initial_conditions_on_ddaspk() {
    let opts = Options::new()
        .set("compute_initcond", "yode0")
        .set("algebraic_var", vec![1i64, -1]);
    let mut dae = Dae::new("daspk", semi_explicit, &opts).unwrap();
    let result = dae.solve(&[0.0, 1.0], &[1.0, 0.0], &[0.0, 0.0]).unwrap();
    let legacy = result.legacy().unwrap();
    assert_eq!(legacy.flag(), StatusFlag::Success);
    assert!((legacy.y()[0][1] - 2.0).abs() < 1e-6);
    assert!((legacy.yp()[0][0] - 1.0).abs() < 1e-6);
    assert!((legacy.y()[1][0] - 1.0f64.exp()).abs() < 3e-3);
}

#[test]
fn test_root_stops_integration() {
    // x0 = cos 2t + 0.05 sin 2t vanishes at t = (pi - atan 20) / 2
    let expected = (std::f64::consts::PI - 20.0f64.atan()) / 2.0;
    let opts = structured().with_rootfn(1, |_t: f64, x: &[f64], _xp: &[f64], g: &mut [f64]| {
        g[0] = x[0];
        0
    });
    let mut dae = Dae::new("ida", oscillator, &opts).unwrap();
    dae.init_step(0.0, &Y0, &YP0, None, None).unwrap();

    let result = dae.step(2.0, None, None).unwrap();
    let s = result.structured().unwrap();
    assert_eq!(s.flag, StatusFlag::RootReturn);
    assert_eq!(s.roots.len(), 1);
    assert!((s.roots.t[0] - expected).abs() < 1e-3, "root at {}", s.roots.t[0]);
    assert!(s.roots.y[0][0].abs() < 1e-3);
    assert!(s.message.contains("-1"));

    // continuing runs to the requested time
    let result = dae.step(1.0, None, None).unwrap();
    assert_eq!(result.flag(), StatusFlag::Success);
}

#[test]
fn test_solve_reports_root_in_legacy_error_triple() {
    let opts = Options::new().with_rootfn(1, |_t: f64, x: &[f64], _xp: &[f64], g: &mut [f64]| {
        g[0] = x[0];
        0
    });
    let mut dae = Dae::new("ida", oscillator, &opts).unwrap();
    let result = dae.solve(&[0.0, 0.5, 1.0, 2.0], &Y0, &YP0).unwrap();
    let legacy = result.legacy().unwrap();
    assert_eq!(legacy.flag(), StatusFlag::RootReturn);
    assert_eq!(legacy.t(), &[0.0, 0.5]);
    let t_root = legacy.t_err().expect("root time");
    assert!(t_root > 0.5 && t_root < 1.0);
}

#[test]
fn test_tstop_interrupts_step() {
    let mut dae = Dae::new("ida", oscillator, &structured().set("tstop", 0.3)).unwrap();
    dae.init_step(0.0, &Y0, &YP0, None, None).unwrap();

    let result = dae.step(1.0, None, None).unwrap();
    let s = result.structured().unwrap();
    assert_eq!(s.flag, StatusFlag::TstopReturn);
    assert_eq!(s.tstop.t, vec![0.3]);
    assert_eq!(s.values.t, vec![0.3]);

    let result = dae.step(1.0, None, None).unwrap();
    assert_eq!(result.flag(), StatusFlag::Success);
}

#[test]
fn test_tcrit_on_ddaspk_stops_solve() {
    let mut dae = Dae::new("ddaspk", oscillator, &structured().set("tcrit", 0.75)).unwrap();
    let result = dae.solve(&[0.0, 0.5, 1.0], &Y0, &YP0).unwrap();
    let s = result.structured().unwrap();
    assert_eq!(s.flag, StatusFlag::TstopReturn);
    assert_eq!(s.values.t, vec![0.0, 0.5]);
    assert_eq!(s.tstop.t, vec![0.75]);
}

#[test]
fn test_one_step_compute_takes_single_internal_step() {
    let mut dae = Dae::new("ida", oscillator, &structured().set("one_step_compute", true)).unwrap();
    dae.init_step(0.0, &Y0, &YP0, None, None).unwrap();
    let mut last = 0.0;
    for expected_steps in 1..=3 {
        let result = dae.step(1.0, None, None).unwrap();
        let t = result.structured().unwrap().values.t[0];
        assert!(t > last && t < 1.0);
        last = t;
        assert_eq!(dae.statistics().unwrap().steps, expected_steps);
    }
}

#[test]
fn test_negative_time_means_one_step_in_legacy_mode() {
    let mut dae = Dae::new("ida", oscillator, &Options::new()).unwrap();
    dae.init_step(0.0, &Y0, &YP0, None, None).unwrap();
    let result = dae.step(-1.0, None, None).unwrap();
    let t = result.legacy().unwrap().t()[0];
    assert!(t > 0.0 && t < 1.0);
    assert_eq!(dae.statistics().unwrap().steps, 1);
}

#[test]
fn test_max_steps_keeps_earlier_points() {
    let mut dae = Dae::new("ida", oscillator, &Options::new().set("max_steps", 50)).unwrap();
    let result = dae.solve(&[0.0, 1e-5, 100.0], &Y0, &YP0).unwrap();
    let legacy = result.legacy().unwrap();
    assert_eq!(legacy.flag(), StatusFlag::TooMuchWork);
    assert_eq!(legacy.t(), &[0.0, 1e-5]);
    let t_err = legacy.t_err().expect("failure point");
    assert!(t_err > 1e-5 && t_err < 100.0);
    assert_eq!(legacy.y_err().map(<[f64]>::len), Some(2));
}

#[test]
fn test_nonnegativity_on_ddaspk() {
    let decay = |_t: f64, y: &[f64], yp: &[f64], r: &mut [f64]| {
        r[0] = yp[0] + y[0];
        0
    };
    let opts = Options::new()
        .set("rtol", 1e-4)
        .set("atol", 1e-8)
        .set("enforce_nonnegativity", true);
    let mut dae = Dae::new("ddaspk", decay, &opts).unwrap();
    let result = dae.solve(&[0.0, 1.0, 5.0, 20.0], &[1.0], &[-1.0]).unwrap();
    let legacy = result.legacy().unwrap();
    assert_eq!(legacy.flag(), StatusFlag::Success);
    assert!(legacy.y().iter().all(|y| y[0] >= 0.0));
}

#[test]
fn test_set_options_resets_solver_state() {
    let mut dae = Dae::new("ida", oscillator, &Options::new()).unwrap();
    dae.init_step(0.0, &Y0, &YP0, None, None).unwrap();
    dae.step(0.5, None, None).unwrap();
    assert!(dae.statistics().unwrap().steps > 0);

    dae.set_options(&Options::new().set("rtol", 1e-8)).unwrap();
    assert_eq!(dae.statistics().unwrap().steps, 0);
    assert!(matches!(dae.step(1.0, None, None), Err(DaeError::SequenceError { .. })));

    dae.init_step(0.0, &Y0, &YP0, None, None).unwrap();
    assert_eq!(dae.step(1.0, None, None).unwrap().flag(), StatusFlag::Success);
}

#[test]
fn test_recoverable_residual_error_is_retried() {
    // Rejects any trial point beyond y = 0.9 once, forcing a smaller step.
    use std::sync::atomic::{AtomicBool, Ordering};
    static REFUSED: AtomicBool = AtomicBool::new(false);
    let residual = |_t: f64, y: &[f64], yp: &[f64], r: &mut [f64]| {
        r[0] = yp[0] + y[0];
        if y[0] < 0.9 && !REFUSED.swap(true, Ordering::SeqCst) {
            return 1;
        }
        0
    };
    let mut dae = Dae::new("ida", residual, &structured()).unwrap();
    let result = dae.solve(&[0.0, 1.0], &[1.0], &[-1.0]).unwrap();
    assert_eq!(result.flag(), StatusFlag::Success);
    assert!(REFUSED.load(Ordering::SeqCst));
}

#[test]
fn test_unrecoverable_residual_error_stops_run() {
    let residual = |t: f64, y: &[f64], yp: &[f64], r: &mut [f64]| {
        r[0] = yp[0] + y[0];
        if t > 0.6 { -1 } else { 0 }
    };
    let mut dae = Dae::new("ida", residual, &structured()).unwrap();
    let result = dae.solve(&[0.0, 0.25, 1.0], &[1.0], &[-1.0]).unwrap();
    let s = result.structured().unwrap();
    assert_eq!(s.flag, StatusFlag::ResidualFailure);
    assert_eq!(s.values.t, vec![0.0, 0.25]);
    assert_eq!(s.errors.len(), 1);
    assert!(!s.message.is_empty());
}

#[test]
fn test_options_reject_unknown_key() {
    let err = Dae::new("ida", oscillator, &Options::new().set("nsteps", 10)).unwrap_err();
    assert!(matches!(err, DaeError::InvalidOption { ref key, .. } if key == "nsteps"));

    let err = Dae::new("ddaspk", oscillator, &Options::new().set("max_steps", 10)).unwrap_err();
    assert!(matches!(err, DaeError::InvalidOption { ref key, .. } if key == "max_steps"));
}

#[test]
fn test_atol_length_must_match_system_size() {
    let mut dae = Dae::new("ida", oscillator, &Options::new().set("atol", vec![1e-8])).unwrap();
    let err = dae.init_step(0.0, &Y0, &YP0, None, None).unwrap_err();
    assert!(matches!(
        err,
        DaeError::DimensionMismatch { what: "atol", expected: 2, found: 1 }
    ));
}

#[test]
fn test_non_finite_step_target_leaves_state_untouched() {
    let mut dae = Dae::new("ida", oscillator, &Options::new()).unwrap();
    dae.init_step(0.0, &Y0, &YP0, None, None).unwrap();

    for t in [f64::NAN, f64::NEG_INFINITY] {
        let out = dae.step(t, None, None).unwrap();
        let failed = out.legacy().unwrap();
        assert_eq!(failed.flag(), StatusFlag::IllegalInput);
        assert!(failed.t().is_empty());
        assert_eq!(failed.t_err(), Some(0.0));
        assert_eq!(failed.y_err(), Some(&Y0[..]));
    }
    assert_eq!(dae.statistics().unwrap().steps, 0);

    let out = dae.step(1.0, None, None).unwrap();
    let ok = out.legacy().unwrap();
    assert_eq!(ok.flag(), StatusFlag::Success);
    assert_eq!(ok.t(), &[1.0]);
}

#[test]
fn test_tcrit_behind_start_is_illegal_input() {
    let mut dae = Dae::new("ddaspk", oscillator, &structured().set("tcrit", -1.0)).unwrap();
    let result = dae.solve(&[0.0, 1.0, 2.0], &Y0, &YP0).unwrap();
    let s = result.structured().unwrap();
    assert_eq!(s.flag, StatusFlag::IllegalInput);
    assert_eq!(s.values.t, vec![0.0]);
    assert_eq!(s.errors.t, vec![0.0]);
    assert!(s.message.contains("tstop"));
}

static JACOBIAN_CALLS: AtomicUsize = AtomicUsize::new(0);

#[test]
fn test_user_jacobian_replaces_finite_differences() {
    let jacobian = |_t: f64, _x: &[f64], _xp: &[f64], _r: &[f64], cj: f64, jac: &mut DMatrix<f64>| {
        JACOBIAN_CALLS.fetch_add(1, Ordering::SeqCst);
        jac[(0, 0)] = 4.0;
        jac[(0, 1)] = cj;
        jac[(1, 0)] = cj;
        jac[(1, 1)] = -1.0;
        0
    };
    let options = structured().with_jacfn(jacobian);
    let mut dae = Dae::new("ida", oscillator, &options).unwrap();
    let result = dae.solve(&[0.0, 1.0, 2.0], &Y0, &YP0).unwrap();
    let s = result.structured().unwrap();
    assert_eq!(s.flag, StatusFlag::Success);
    for (t, y) in s.values.t.iter().zip(&s.values.y) {
        let x = exact(*t);
        assert!((y[0] - x[0]).abs() < 1e-3, "x0({t}) = {} expected {}", y[0], x[0]);
    }

    let stats = dae.statistics().unwrap();
    assert!(stats.jacobian_evals > 0);
    assert_eq!(JACOBIAN_CALLS.load(Ordering::SeqCst), stats.jacobian_evals);
}
