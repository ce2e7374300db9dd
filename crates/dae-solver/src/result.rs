//! Canonical integration output and its two external renderings.
//!
//! Every backend operation produces one [`SolverOutput`]. The facade turns it
//! into either a [`LegacyResult`] (flat 7-tuple) or a [`StructuredResult`]
//! (named records) depending on the [`ResultFormat`] fixed at construction.
//!
//! Rows are `Cow<'a, [f64]>`: when the caller hands in output buffers the
//! result borrows them instead of copying.

use std::borrow::Cow;

use serde::Serialize;

use crate::error::Result;
use crate::options::Options;

/// Return status of an integration call (IDA return codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusFlag {
    Success,
    TstopReturn,
    RootReturn,
    TooMuchWork,
    TooMuchAccuracy,
    ErrorTestFailure,
    ConvergenceFailure,
    LinearSetupFailure,
    LinearSolveFailure,
    ResidualFailure,
    RepeatedResidualError,
    RootFunctionFailure,
    InitialConditionFailure,
    IllegalInput,
    BadTime,
}

impl StatusFlag {
    pub fn code(self) -> i32 {
        match self {
            StatusFlag::Success => 0,
            StatusFlag::TstopReturn => 1,
            StatusFlag::RootReturn => 2,
            StatusFlag::TooMuchWork => -1,
            StatusFlag::TooMuchAccuracy => -2,
            StatusFlag::ErrorTestFailure => -3,
            StatusFlag::ConvergenceFailure => -4,
            StatusFlag::LinearSetupFailure => -6,
            StatusFlag::LinearSolveFailure => -7,
            StatusFlag::ResidualFailure => -8,
            StatusFlag::RepeatedResidualError => -9,
            StatusFlag::RootFunctionFailure => -10,
            StatusFlag::InitialConditionFailure => -14,
            StatusFlag::IllegalInput => -22,
            StatusFlag::BadTime => -26,
        }
    }

    /// Non-negative codes: the call returned normally (possibly interrupted
    /// by a root or tstop).
    pub fn is_success(self) -> bool {
        self.code() >= 0
    }

    /// The call did everything it was asked to do.
    pub fn is_full_success(self) -> bool {
        self == StatusFlag::Success
    }

    pub fn describe(self) -> &'static str {
        match self {
            StatusFlag::Success => "successful return",
            StatusFlag::TstopReturn => "reached the stop time tstop",
            StatusFlag::RootReturn => "found a root of the event functions",
            StatusFlag::TooMuchWork => "took the maximum number of internal steps",
            StatusFlag::TooMuchAccuracy => "could not satisfy the requested accuracy",
            StatusFlag::ErrorTestFailure => "error test failed repeatedly or with minimum step",
            StatusFlag::ConvergenceFailure => "nonlinear solver failed to converge repeatedly",
            StatusFlag::LinearSetupFailure => "Jacobian setup failed",
            StatusFlag::LinearSolveFailure => "linear solve failed (singular iteration matrix)",
            StatusFlag::ResidualFailure => "residual function failed unrecoverably",
            StatusFlag::RepeatedResidualError => "residual function reported repeated recoverable errors",
            StatusFlag::RootFunctionFailure => "root function failed",
            StatusFlag::InitialConditionFailure => "consistent initial condition computation failed",
            StatusFlag::IllegalInput => "illegal input",
            StatusFlag::BadTime => "requested time is outside the interpolation interval",
        }
    }
}

/// Parallel arrays of times, values and derivatives.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SolutionPoints<'a> {
    pub t: Vec<f64>,
    pub y: Vec<Cow<'a, [f64]>>,
    pub ydot: Vec<Cow<'a, [f64]>>,
}

impl<'a> SolutionPoints<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, t: f64, y: Cow<'a, [f64]>, ydot: Cow<'a, [f64]>) {
        self.t.push(t);
        self.y.push(y);
        self.ydot.push(ydot);
    }

    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    pub fn into_owned(self) -> SolutionPoints<'static> {
        SolutionPoints {
            t: self.t,
            y: self.y.into_iter().map(|r| Cow::Owned(r.into_owned())).collect(),
            ydot: self.ydot.into_iter().map(|r| Cow::Owned(r.into_owned())).collect(),
        }
    }
}

/// Canonical result produced by every backend operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolverOutput<'a> {
    pub flag: StatusFlag,
    pub values: SolutionPoints<'a>,
    pub errors: SolutionPoints<'a>,
    pub roots: SolutionPoints<'a>,
    pub tstop: SolutionPoints<'a>,
    pub message: Option<String>,
}

impl<'a> SolverOutput<'a> {
    pub fn new(flag: StatusFlag) -> Self {
        Self {
            flag,
            values: SolutionPoints::new(),
            errors: SolutionPoints::new(),
            roots: SolutionPoints::new(),
            tstop: SolutionPoints::new(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn into_owned(self) -> SolverOutput<'static> {
        SolverOutput {
            flag: self.flag,
            values: self.values.into_owned(),
            errors: self.errors.into_owned(),
            roots: self.roots.into_owned(),
            tstop: self.tstop.into_owned(),
            message: self.message,
        }
    }
}

/// Which external shape results are rendered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResultFormat {
    Legacy,
    Structured,
}

impl ResultFormat {
    /// Reads `old_api` (default `true`).
    pub fn from_options(options: &Options) -> Result<Self> {
        Ok(match options.bool_value("dae", "old_api")? {
            Some(false) => ResultFormat::Structured,
            _ => ResultFormat::Legacy,
        })
    }

    pub fn render(self, output: SolverOutput<'_>) -> IntegrationResult<'_> {
        match self {
            ResultFormat::Legacy => IntegrationResult::Legacy(render_legacy(output)),
            ResultFormat::Structured => IntegrationResult::Structured(render_structured(output)),
        }
    }
}

/// `(flag, t, y, yp, t_err, y_err, yp_err)`.
///
/// The error triple is `None` unless the call was interrupted: it then holds
/// the failure point, or the root / tstop point for those interruptions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegacyResult<'a>(
    pub StatusFlag,
    pub Vec<f64>,
    pub Vec<Cow<'a, [f64]>>,
    pub Vec<Cow<'a, [f64]>>,
    pub Option<f64>,
    pub Option<Cow<'a, [f64]>>,
    pub Option<Cow<'a, [f64]>>,
);

impl<'a> LegacyResult<'a> {
    pub fn flag(&self) -> StatusFlag {
        self.0
    }

    pub fn t(&self) -> &[f64] {
        &self.1
    }

    pub fn y(&self) -> &[Cow<'a, [f64]>] {
        &self.2
    }

    pub fn yp(&self) -> &[Cow<'a, [f64]>] {
        &self.3
    }

    pub fn t_err(&self) -> Option<f64> {
        self.4
    }

    pub fn y_err(&self) -> Option<&[f64]> {
        self.5.as_deref()
    }

    pub fn yp_err(&self) -> Option<&[f64]> {
        self.6.as_deref()
    }
}

/// Tagged result; every record is present, empty when unused.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredResult<'a> {
    pub flag: StatusFlag,
    pub values: SolutionPoints<'a>,
    pub errors: SolutionPoints<'a>,
    pub roots: SolutionPoints<'a>,
    pub tstop: SolutionPoints<'a>,
    pub message: String,
}

/// The rendered result handed back by the facade.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IntegrationResult<'a> {
    Legacy(LegacyResult<'a>),
    Structured(StructuredResult<'a>),
}

impl<'a> IntegrationResult<'a> {
    pub fn flag(&self) -> StatusFlag {
        match self {
            IntegrationResult::Legacy(r) => r.0,
            IntegrationResult::Structured(r) => r.flag,
        }
    }

    pub fn legacy(&self) -> Option<&LegacyResult<'a>> {
        match self {
            IntegrationResult::Legacy(r) => Some(r),
            IntegrationResult::Structured(_) => None,
        }
    }

    pub fn structured(&self) -> Option<&StructuredResult<'a>> {
        match self {
            IntegrationResult::Structured(r) => Some(r),
            IntegrationResult::Legacy(_) => None,
        }
    }

    pub fn into_legacy(self) -> Option<LegacyResult<'a>> {
        match self {
            IntegrationResult::Legacy(r) => Some(r),
            IntegrationResult::Structured(_) => None,
        }
    }

    pub fn into_structured(self) -> Option<StructuredResult<'a>> {
        match self {
            IntegrationResult::Structured(r) => Some(r),
            IntegrationResult::Legacy(_) => None,
        }
    }
}

pub fn render_legacy(output: SolverOutput<'_>) -> LegacyResult<'_> {
    let SolverOutput {
        flag,
        values,
        errors,
        roots,
        tstop,
        ..
    } = output;

    let interruption = if !errors.is_empty() {
        Some(errors)
    } else {
        match flag {
            StatusFlag::RootReturn if !roots.is_empty() => Some(roots),
            StatusFlag::TstopReturn if !tstop.is_empty() => Some(tstop),
            _ => None,
        }
    };

    let (t_err, y_err, yp_err) = match interruption.and_then(last_point) {
        Some((t, y, yp)) => (Some(t), Some(y), Some(yp)),
        None => (None, None, None),
    };

    LegacyResult(flag, values.t, values.y, values.ydot, t_err, y_err, yp_err)
}

pub fn render_structured(output: SolverOutput<'_>) -> StructuredResult<'_> {
    StructuredResult {
        flag: output.flag,
        values: output.values,
        errors: output.errors,
        roots: output.roots,
        tstop: output.tstop,
        message: output.message.unwrap_or_default(),
    }
}

fn last_point(mut points: SolutionPoints<'_>) -> Option<(f64, Cow<'_, [f64]>, Cow<'_, [f64]>)> {
    Some((points.t.pop()?, points.y.pop()?, points.ydot.pop()?))
}
