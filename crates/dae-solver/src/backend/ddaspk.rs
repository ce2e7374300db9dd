//! `ddaspk` backend (alias `daspk`).
//!
//! Runs the native BDF engine with DASPK's option names. Differences from
//! `ida`: components are classified with a `+1` / `-1` list instead of an
//! index list, a negative component can be rejected with
//! `enforce_nonnegativity`, and there is no root finding.

use super::bdf::{AlgebraicVars, BdfSettings, InitialCondition};
use super::driver::BdfDriver;
use super::traits::{BackendError, DaeIntegrator, IntegratorDescriptor};
use super::{parse_tolerances, positive};
use crate::error::{DaeError, Result};
use crate::options::Options;
use crate::residual::Residual;

pub const NAME: &str = "ddaspk";

const KEYS: &[&str] = &[
    "rtol",
    "atol",
    "order",
    "nsteps",
    "max_step",
    "first_step",
    "tcrit",
    "compute_initcond",
    "algebraic_var",
    "exclalg_err",
    "enforce_nonnegativity",
    "one_step_compute",
    "old_api",
];

/// Discovery probe.
pub fn probe() -> std::result::Result<IntegratorDescriptor, BackendError> {
    Ok(IntegratorDescriptor {
        name: NAME,
        alias: Some("daspk"),
        summary: "variable-order BDF with DASPK options and non-negativity constraints",
        factory: create,
    })
}

fn create(residual: Residual, options: &Options) -> Result<Box<dyn DaeIntegrator>> {
    Ok(Box::new(BdfDriver::new(NAME, residual, options, settings)?))
}

pub(crate) fn settings(options: &Options) -> Result<BdfSettings> {
    if options.rootfn().is_some() {
        return Err(DaeError::invalid_option(
            NAME,
            "rootfn",
            "ddaspk has no root finding; use ida",
        ));
    }
    options.check_keys(NAME, KEYS)?;
    let defaults = BdfSettings::default();

    let (rtol, atol) = parse_tolerances(NAME, options, defaults.rtol, defaults.atol.clone())?;

    let max_order = options.usize_value(NAME, "order")?.unwrap_or(5);
    if !(1..=5).contains(&max_order) {
        return Err(DaeError::invalid_option(NAME, "order", "must be between 1 and 5"));
    }

    let algebraic = match options.int_list(NAME, "algebraic_var")? {
        None => None,
        Some(kinds) => {
            let mut mask = Vec::with_capacity(kinds.len());
            for kind in kinds {
                match kind {
                    1 => mask.push(false),
                    -1 => mask.push(true),
                    other => {
                        return Err(DaeError::invalid_option(
                            NAME,
                            "algebraic_var",
                            format!("entries must be +1 (differential) or -1 (algebraic), found {other}"),
                        ));
                    }
                }
            }
            Some(AlgebraicVars::Mask(mask))
        }
    };

    let initial_condition = match options.text_value(NAME, "compute_initcond")? {
        None | Some("") => None,
        Some("yode0") if algebraic.is_none() => {
            return Err(DaeError::invalid_option(
                NAME,
                "compute_initcond",
                "\"yode0\" requires algebraic_var",
            ));
        }
        Some("yode0") => Some(InitialCondition::AlgebraicAndDerivatives),
        Some("yp0") => Some(InitialCondition::States),
        Some(other) => {
            return Err(DaeError::invalid_option(
                NAME,
                "compute_initcond",
                format!("expected \"yode0\", \"yp0\" or \"\", found {other:?}"),
            ));
        }
    };

    let exclude_algebraic_from_error = options.bool_value(NAME, "exclalg_err")?.unwrap_or(false);
    if exclude_algebraic_from_error && algebraic.is_none() {
        return Err(DaeError::invalid_option(NAME, "exclalg_err", "requires algebraic_var"));
    }

    let max_steps = match options.usize_value(NAME, "nsteps")? {
        None | Some(0) => defaults.max_steps,
        Some(n) => n,
    };

    Ok(BdfSettings {
        rtol,
        atol,
        max_order,
        max_steps,
        first_step: positive(NAME, options, "first_step")?,
        max_step: positive(NAME, options, "max_step")?,
        algebraic,
        exclude_algebraic_from_error,
        initial_condition,
        tstop: options.f64_value(NAME, "tcrit")?,
        one_step: options.bool_value(NAME, "one_step_compute")?.unwrap_or(false),
        legacy_time_sign: options.bool_value(NAME, "old_api")?.unwrap_or(true),
        enforce_nonnegative: options
            .bool_value(NAME, "enforce_nonnegativity")?
            .unwrap_or(false),
        roots: None,
        jacobian: options.jacfn().cloned(),
        ..defaults
    })
}
