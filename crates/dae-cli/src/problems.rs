//! Built-in demonstration problems.

use dae_solver::Options;

pub type ResidualFn = fn(f64, &[f64], &[f64], &mut [f64]) -> i32;

pub struct Problem {
    pub name: &'static str,
    pub summary: &'static str,
    pub residual: ResidualFn,
    pub y0: &'static [f64],
    pub yp0: &'static [f64],
    pub tspan: &'static [f64],
    pub rtol: f64,
    /// One entry: scalar tolerance; otherwise one per component
    pub atol: &'static [f64],
}

impl Problem {
    /// Tolerances shared by every backend's option vocabulary.
    pub fn options(&self) -> Options {
        let options = Options::new().set("rtol", self.rtol);
        match self.atol {
            [atol] => options.set("atol", *atol),
            atol => options.set("atol", atol.to_vec()),
        }
    }
}

/// x0' = x1, x1' = -4 x0
fn oscillator(_t: f64, x: &[f64], xp: &[f64], r: &mut [f64]) -> i32 {
    r[0] = xp[1] + 4.0 * x[0];
    r[1] = xp[0] - x[1];
    0
}

/// Robertson's chemical kinetics written as an index-1 DAE.
fn robertson(_t: f64, y: &[f64], yp: &[f64], r: &mut [f64]) -> i32 {
    r[0] = yp[0] + 0.04 * y[0] - 1.0e4 * y[1] * y[2];
    r[1] = yp[1] - 0.04 * y[0] + 1.0e4 * y[1] * y[2] + 3.0e7 * y[1] * y[1];
    r[2] = y[0] + y[1] + y[2] - 1.0;
    0
}

pub static PROBLEMS: [Problem; 2] = [
    Problem {
        name: "oscillator",
        summary: "harmonic oscillator, x0 = cos 2t + 0.05 sin 2t",
        residual: oscillator,
        y0: &[1.0, 0.1],
        yp0: &[0.1, -4.0],
        tspan: &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
        rtol: 1e-6,
        atol: &[1e-10],
    },
    Problem {
        name: "robertson",
        summary: "stiff chemical kinetics with a conservation constraint",
        residual: robertson,
        y0: &[1.0, 0.0, 0.0],
        yp0: &[-0.04, 0.04, 0.0],
        tspan: &[0.0, 0.4, 4.0, 40.0, 400.0, 4.0e3, 4.0e4],
        rtol: 1e-4,
        atol: &[1e-8, 1e-14, 1e-6],
    },
];

pub fn find(name: &str) -> Option<&'static Problem> {
    PROBLEMS.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}
