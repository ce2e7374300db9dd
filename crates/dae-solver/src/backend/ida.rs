//! `ida` backend (alias `sundials_ida`).
//!
//! Variable-order BDF with IDA's option vocabulary: consistent initial
//! conditions, root finding, `tstop` and an optional user Jacobian.
//!
//! # Options
//!
//! | key | type | default |
//! |-----|------|---------|
//! | `rtol` | float | `1e-6` |
//! | `atol` | float or float list | `1e-12` |
//! | `max_steps` | int, per call | `500` |
//! | `first_step_size` | float | estimated |
//! | `max_step_size` | float | unbounded |
//! | `max_order` | int in 1..=5 | `5` |
//! | `compute_initcond` | `"yp0"`, `"y0"` or `""` | none |
//! | `algebraic_vars_idx` | int list | none |
//! | `exclude_algvar_from_error` | bool | `false` |
//! | `one_step_compute` | bool | `false` |
//! | `old_api` | bool | `true` |
//! | `tstop` | float | none |
//! | `nr_rootfns` | int | `0` |
//! | `max_nonlin_iters` | int | `4` |
//! | `max_conv_fails` | int | `10` |
//! | `linsolver` | `"dense"` | `"dense"` |

use super::bdf::{AlgebraicVars, BdfSettings, InitialCondition, RootSettings};
use super::driver::BdfDriver;
use super::traits::{BackendError, DaeIntegrator, IntegratorDescriptor};
use super::{parse_tolerances, positive};
use crate::error::{DaeError, Result};
use crate::options::Options;
use crate::residual::Residual;

pub const NAME: &str = "ida";

const KEYS: &[&str] = &[
    "rtol",
    "atol",
    "max_steps",
    "first_step_size",
    "max_step_size",
    "max_order",
    "compute_initcond",
    "algebraic_vars_idx",
    "exclude_algvar_from_error",
    "one_step_compute",
    "old_api",
    "tstop",
    "nr_rootfns",
    "max_nonlin_iters",
    "max_conv_fails",
    "linsolver",
];

/// Discovery probe. The native engine is always linked in.
pub fn probe() -> std::result::Result<IntegratorDescriptor, BackendError> {
    Ok(IntegratorDescriptor {
        name: NAME,
        alias: Some("sundials_ida"),
        summary: "variable-order BDF with consistent IC, root finding and tstop",
        factory: create,
    })
}

fn create(residual: Residual, options: &Options) -> Result<Box<dyn DaeIntegrator>> {
    Ok(Box::new(BdfDriver::new(NAME, residual, options, settings)?))
}

/// Parse IDA-style options into engine settings.
pub(crate) fn settings(options: &Options) -> Result<BdfSettings> {
    options.check_keys(NAME, KEYS)?;
    let defaults = BdfSettings::default();

    let (rtol, atol) = parse_tolerances(NAME, options, defaults.rtol, defaults.atol.clone())?;

    let max_order = options.usize_value(NAME, "max_order")?.unwrap_or(5);
    if !(1..=5).contains(&max_order) {
        return Err(DaeError::invalid_option(NAME, "max_order", "must be between 1 and 5"));
    }

    let initial_condition = match options.text_value(NAME, "compute_initcond")? {
        None | Some("") => None,
        Some("yp0") => Some(InitialCondition::AlgebraicAndDerivatives),
        Some("y0") => Some(InitialCondition::States),
        Some(other) => {
            return Err(DaeError::invalid_option(
                NAME,
                "compute_initcond",
                format!("expected \"yp0\", \"y0\" or \"\", found {other:?}"),
            ));
        }
    };

    let algebraic = match options.int_list(NAME, "algebraic_vars_idx")? {
        None => None,
        Some(indices) => {
            let mut parsed = Vec::with_capacity(indices.len());
            for i in indices {
                let i = usize::try_from(i).map_err(|_| {
                    DaeError::invalid_option(NAME, "algebraic_vars_idx", "indices must be non-negative")
                })?;
                parsed.push(i);
            }
            Some(AlgebraicVars::Indices(parsed))
        }
    };

    let exclude_algebraic_from_error = options
        .bool_value(NAME, "exclude_algvar_from_error")?
        .unwrap_or(false);
    if exclude_algebraic_from_error && algebraic.is_none() {
        return Err(DaeError::invalid_option(
            NAME,
            "exclude_algvar_from_error",
            "requires algebraic_vars_idx",
        ));
    }

    if let Some(solver) = options.text_value(NAME, "linsolver")?
        && solver != "dense"
    {
        return Err(DaeError::invalid_option(
            NAME,
            "linsolver",
            format!("only \"dense\" is available, found {solver:?}"),
        ));
    }

    let nr_rootfns = options.usize_value(NAME, "nr_rootfns")?.unwrap_or(0);
    let roots = match (nr_rootfns, options.rootfn()) {
        (0, None) => None,
        (0, Some(_)) => {
            return Err(DaeError::invalid_option(
                NAME,
                "nr_rootfns",
                "a root function is set but nr_rootfns is 0",
            ));
        }
        (_, None) => {
            return Err(DaeError::invalid_option(
                NAME,
                "nr_rootfns",
                "nr_rootfns is set but no root function was supplied",
            ));
        }
        (count, Some(function)) => Some(RootSettings {
            count,
            function: function.clone(),
        }),
    };

    let max_steps = match options.usize_value(NAME, "max_steps")? {
        None | Some(0) => defaults.max_steps,
        Some(n) => n,
    };

    Ok(BdfSettings {
        rtol,
        atol,
        max_order,
        max_steps,
        first_step: positive(NAME, options, "first_step_size")?,
        max_step: positive(NAME, options, "max_step_size")?,
        max_nonlinear_iters: options
            .usize_value(NAME, "max_nonlin_iters")?
            .filter(|&n| n > 0)
            .unwrap_or(defaults.max_nonlinear_iters),
        max_convergence_fails: options
            .usize_value(NAME, "max_conv_fails")?
            .filter(|&n| n > 0)
            .unwrap_or(defaults.max_convergence_fails),
        algebraic,
        exclude_algebraic_from_error,
        initial_condition,
        tstop: options.f64_value(NAME, "tstop")?,
        one_step: options.bool_value(NAME, "one_step_compute")?.unwrap_or(false),
        legacy_time_sign: options.bool_value(NAME, "old_api")?.unwrap_or(true),
        roots,
        jacobian: options.jacfn().cloned(),
        ..defaults
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::bdf::Tolerance;

    #[test]
    fn test_defaults_without_options() {
        let s = settings(&Options::new()).unwrap();
        assert_eq!(s.rtol, 1e-6);
        assert_eq!(s.max_order, 5);
        assert_eq!(s.max_steps, 500);
        assert!(s.legacy_time_sign);
        assert!(s.roots.is_none());
    }

    #[test]
    fn test_parses_ida_vocabulary() {
        let opts = Options::new()
            .set("atol", vec![1e-8, 1e-6])
            .set("max_order", 3)
            .set("compute_initcond", "yp0")
            .set("algebraic_vars_idx", vec![1usize])
            .set("exclude_algvar_from_error", true)
            .set("tstop", 2.5);
        let s = settings(&opts).unwrap();
        assert_eq!(s.atol, Tolerance::PerComponent(vec![1e-8, 1e-6]));
        assert_eq!(s.max_order, 3);
        assert_eq!(s.initial_condition, Some(InitialCondition::AlgebraicAndDerivatives));
        assert_eq!(s.algebraic, Some(AlgebraicVars::Indices(vec![1])));
        assert_eq!(s.tstop, Some(2.5));
    }

    #[test]
    fn test_rejects_unknown_and_out_of_range_options() {
        for opts in [
            Options::new().set("nsteps", 10),
            Options::new().set("max_order", 6),
            Options::new().set("compute_initcond", "yode0"),
            Options::new().set("linsolver", "spgmr"),
            Options::new().set("nr_rootfns", 2),
        ] {
            assert!(
                matches!(settings(&opts), Err(DaeError::InvalidOption { .. })),
                "accepted {opts:?}"
            );
        }
    }

    #[test]
    fn test_root_function_needs_a_count() {
        let opts = Options::new().with_rootfn(1, |_t: f64, y: &[f64], _yp: &[f64], g: &mut [f64]| {
            g[0] = y[0];
            0
        });
        let s = settings(&opts).unwrap();
        assert_eq!(s.roots.map(|r| r.count), Some(1));
    }
}
