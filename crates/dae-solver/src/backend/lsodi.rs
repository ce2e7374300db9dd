//! `lsodi` backend (unavailable).
//!
//! LSODI lives in the Fortran ODEPACK library, which this build does not
//! link. The probe reports that so discovery records a diagnostic and the
//! remaining backends stay usable.
//!
//! # Requirements
//!
//! - ODEPACK compiled with the same Fortran ABI as the host
//! - a binding crate exposing `lsodi` / `dlsodi`

use super::traits::{BackendError, IntegratorDescriptor};

pub const NAME: &str = "lsodi";

/// Discovery probe.
pub fn probe() -> Result<IntegratorDescriptor, BackendError> {
    Err(BackendError::library_not_linked("ODEPACK LSODI"))
}
