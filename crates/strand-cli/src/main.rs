use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use strand_solver::{ProblemDefinition, StepReport};

#[derive(Parser)]
#[command(name = "strand", version, about = "Nonlinear incremental structural analysis")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the analysis described by a JSON problem file
    Run {
        problem: PathBuf,
        /// Number of steps (overrides `analysis.steps`)
        #[arg(long)]
        steps: Option<usize>,
        /// Compute element contributions in parallel
        #[arg(long)]
        parallel: bool,
        /// Print step reports as JSON lines instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Build the model and analysis without running any step
    Check { problem: PathBuf },
}

fn load(path: &Path) -> Result<ProblemDefinition> {
    ProblemDefinition::from_file(path)
        .with_context(|| format!("failed to read problem {}", path.display()))
}

fn print_row(report: &StepReport, json: bool) {
    if json {
        let row = serde_json::json!({
            "step": report.step,
            "load_factor": report.load_factor,
            "increment": report.increment,
            "iterations": report.iterations,
            "retries": report.retries,
            "unbalance_norm": report.unbalance_norm,
        });
        println!("{row}");
    } else {
        println!(
            "{:>6} {:>14.6e} {:>12.4e} {:>6} {:>7} {:>12.3e}",
            report.step,
            report.load_factor,
            report.increment,
            report.iterations,
            report.retries,
            report.unbalance_norm
        );
    }
}

fn run(path: &Path, steps: Option<usize>, parallel: bool, json: bool) -> Result<()> {
    let mut definition = load(path)?;
    definition.analysis.parallel |= parallel;
    let steps = steps.or(definition.analysis.steps).unwrap_or(1);

    let mut analysis = definition
        .build_analysis()
        .context("failed to set up analysis")?;
    info!(
        "{} equations, {} elements, {} steps",
        analysis.model().num_equations(),
        analysis.model().num_elements(),
        steps
    );

    if !json {
        println!(
            "{:>6} {:>14} {:>12} {:>6} {:>7} {:>12}",
            "step", "lambda", "increment", "iter", "retries", "|R|"
        );
    }
    analysis.set_step_observer(move |report, _| print_row(report, json));

    analysis.analyze(steps).with_context(|| {
        format!(
            "analysis stopped after {} converged steps",
            analysis.history().len()
        )
    })?;
    Ok(())
}

fn check(path: &Path) -> Result<()> {
    let definition = load(path)?;
    let analysis = definition
        .build_analysis()
        .context("failed to set up analysis")?;
    let model = analysis.model();
    println!("equations: {}", model.num_equations());
    println!("elements: {}", model.num_elements());
    if let Some(integrator) = analysis.integrator() {
        println!("integrator: {}", integrator.name());
    }
    println!("algorithm: {}", analysis.algorithm().name());
    println!("solver: {}", analysis.context().solver.name());
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match &cli.command {
        Command::Run {
            problem,
            steps,
            parallel,
            json,
        } => run(problem, *steps, *parallel, *json),
        Command::Check { problem } => check(problem),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}
