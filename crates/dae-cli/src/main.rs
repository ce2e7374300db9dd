use std::path::PathBuf;
use std::process::ExitCode;

use dae_solver::{Dae, Options, Registry};

mod logger;
mod problems;

fn usage() {
    eprintln!("usage: dae-cli backends");
    eprintln!("       dae-cli problems");
    eprintln!(
        "       dae-cli solve <problem> [--backend NAME] [--options FILE] [--structured] [--log LEVEL]"
    );
}

#[derive(Debug, PartialEq)]
struct SolveArgs {
    problem: String,
    backend: String,
    options: Option<PathBuf>,
    structured: bool,
    log: Option<String>,
}

fn parse_solve_args(args: &[String]) -> Result<SolveArgs, String> {
    let mut iter = args.iter();
    let problem = iter.next().ok_or("missing problem name")?.clone();
    let mut parsed = SolveArgs {
        problem,
        backend: "ida".to_string(),
        options: None,
        structured: false,
        log: None,
    };
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("{flag} needs a value"))
        };
        match arg.as_str() {
            "--backend" => parsed.backend = value("--backend")?,
            "--options" => parsed.options = Some(PathBuf::from(value("--options")?)),
            "--log" => parsed.log = Some(value("--log")?),
            "--structured" => parsed.structured = true,
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(parsed)
}

fn list_backends() {
    let registry = Registry::global();
    for descriptor in registry.descriptors() {
        let alias = descriptor.alias.unwrap_or("-");
        println!("{:<10} {:<14} {}", descriptor.name, alias, descriptor.summary);
    }
    for diagnostic in registry.diagnostics() {
        println!("{:<10} unavailable    {}", diagnostic.backend, diagnostic.reason);
    }
}

fn list_problems() {
    for problem in &problems::PROBLEMS {
        println!("{:<12} {}", problem.name, problem.summary);
    }
}

fn run_solve(args: SolveArgs) -> ExitCode {
    logger::init_logging(args.log.as_deref());

    let Some(problem) = problems::find(&args.problem) else {
        eprintln!("unknown problem: {} (see `dae-cli problems`)", args.problem);
        return ExitCode::from(2);
    };

    let mut options = problem.options();
    if let Some(path) = &args.options {
        match Options::from_json_file(path) {
            Ok(extra) => options.merge(&extra),
            Err(err) => {
                eprintln!("cannot read options from {}: {err}", path.display());
                return ExitCode::from(1);
            }
        }
    }
    if args.structured {
        options.insert("old_api", false);
    }

    let mut solver = match Dae::new(&args.backend, problem.residual, &options) {
        Ok(solver) => solver,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(1);
        }
    };
    let result = match solver.solve(problem.tspan, problem.y0, problem.yp0) {
        Ok(result) => result,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(1);
        }
    };
    if let Ok(stats) = solver.statistics() {
        log::info!(
            "{}: {} steps, {} residual evaluations, {} error test failures",
            solver.backend_name(),
            stats.steps,
            stats.residual_evals,
            stats.error_test_fails
        );
    }

    match serde_json::to_string_pretty(&result) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            eprintln!("cannot serialise result: {err}");
            return ExitCode::from(1);
        }
    }
    if result.flag().is_success() {
        ExitCode::SUCCESS
    } else {
        eprintln!("integration stopped: {}", result.flag().describe());
        ExitCode::from(1)
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("backends") if args.len() == 2 => {
            logger::init_logging(None);
            list_backends();
            ExitCode::SUCCESS
        }
        Some("problems") if args.len() == 2 => {
            list_problems();
            ExitCode::SUCCESS
        }
        Some("solve") => match parse_solve_args(&args[2..]) {
            Ok(solve) => run_solve(solve),
            Err(msg) => {
                eprintln!("{msg}");
                usage();
                ExitCode::from(2)
            }
        },
        _ => {
            usage();
            ExitCode::from(2)
        }
    }
}
