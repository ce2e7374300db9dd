//! Integrator backends.
//!
//! Every backend implements [`DaeIntegrator`] and is made known to the
//! registry through a [`BackendProbe`]. Probes run once, lazily, in the order
//! of [`BUILTIN_PROBES`]; a probe that fails only removes its own backend.
//!
//! # Backends
//!
//! - **ida** (alias `sundials_ida`): native BDF engine with IDA option names,
//!   root finding and `tstop`.
//! - **ddaspk** (alias `daspk`): the same engine with DASPK option names and
//!   non-negativity enforcement. No root finding.
//! - **lsodi**: needs the ODEPACK LSODI library, which this build does not
//!   link. Its probe always fails.
//!
//! # Architecture
//!
//! ```text
//! Registry ──probe──▶ IntegratorDescriptor ──factory──▶ Box<dyn DaeIntegrator>
//!                                                          │
//!                                               ┌──────────┴──────────┐
//!                                               ▼                     ▼
//!                                         BdfDriver (ida)      BdfDriver (ddaspk)
//!                                               └──────────┬──────────┘
//!                                                          ▼
//!                                             BdfEngine + initcond
//! ```

pub(crate) mod bdf;
pub mod ddaspk;
pub(crate) mod driver;
pub mod ida;
pub(crate) mod initcond;
pub mod lsodi;
pub mod traits;

pub use traits::*;

use crate::error::{DaeError, Result};
use crate::options::{OptionValue, Options};
use bdf::Tolerance;

/// Discovery priority list.
pub static BUILTIN_PROBES: [BackendProbe; 3] = [
    BackendProbe {
        name: ida::NAME,
        load: ida::probe,
    },
    BackendProbe {
        name: ddaspk::NAME,
        load: ddaspk::probe,
    },
    BackendProbe {
        name: lsodi::NAME,
        load: lsodi::probe,
    },
];

/// Read `rtol` and `atol` (scalar or one value per component).
pub(crate) fn parse_tolerances(
    backend: &str,
    options: &Options,
    default_rtol: f64,
    default_atol: Tolerance,
) -> Result<(f64, Tolerance)> {
    let rtol = options.f64_value(backend, "rtol")?.unwrap_or(default_rtol);
    if !(rtol.is_finite() && rtol >= 0.0) {
        return Err(DaeError::invalid_option(backend, "rtol", "must be finite and non-negative"));
    }

    let atol = match options.get("atol") {
        None => default_atol,
        Some(OptionValue::FloatList(_) | OptionValue::IntList(_)) => {
            Tolerance::PerComponent(options.f64_list(backend, "atol")?.unwrap_or_default())
        }
        Some(_) => Tolerance::Scalar(options.f64_value(backend, "atol")?.unwrap_or(0.0)),
    };
    let valid = match &atol {
        Tolerance::Scalar(v) => v.is_finite() && *v > 0.0,
        Tolerance::PerComponent(v) => !v.is_empty() && v.iter().all(|a| a.is_finite() && *a > 0.0),
    };
    if !valid {
        return Err(DaeError::invalid_option(backend, "atol", "must be finite and positive"));
    }
    Ok((rtol, atol))
}

/// Optional positive float; `0` means "use the default".
pub(crate) fn positive(backend: &str, options: &Options, key: &str) -> Result<Option<f64>> {
    match options.f64_value(backend, key)? {
        None => Ok(None),
        Some(v) if v == 0.0 => Ok(None),
        Some(v) if v.is_finite() && v > 0.0 => Ok(Some(v)),
        Some(_) => Err(DaeError::invalid_option(backend, key, "must be positive")),
    }
}
