//! Backend-agnostic solver for differential-algebraic equations
//! G(t, y, y') = 0.
//!
//! The crate separates four concerns:
//!
//! - [`backend`]: the [`DaeIntegrator`] contract and the built-in backends
//!   (`ida`, `ddaspk`; `lsodi` is probed but not linked).
//! - [`registry`]: one-time, failure-tolerant discovery of backends and
//!   case-insensitive name lookup.
//! - [`facade`]: [`Dae`], which owns one backend instance and forwards every
//!   operation to it.
//! - [`result`]: the canonical [`SolverOutput`] and its two renderings,
//!   the legacy 7-tuple and the structured record.
//!
//! Numerical failures are reported through [`StatusFlag`] in the result;
//! [`DaeError`] is reserved for usage errors (unknown backend, bad options,
//! calling `step` before `init_step`, ...).

pub mod backend;
pub mod error;
pub mod facade;
pub mod options;
pub mod registry;
pub mod residual;
pub mod result;

pub use backend::{
    BackendError, BackendProbe, DaeIntegrator, IntegratorDescriptor, IntegratorFactory,
    IntegratorStats,
};
pub use error::{DaeError, Result};
pub use facade::Dae;
pub use options::{OptionValue, Options};
pub use registry::{DiscoveryDiagnostic, Registry};
pub use residual::{JacobianFunction, Residual, ResidualFunction, RootFunction};
pub use result::{
    IntegrationResult, LegacyResult, ResultFormat, SolutionPoints, SolverOutput, StatusFlag,
    StructuredResult,
};
