//! POMDP SIM: a scenario driver for the pomdp-filter particle filter.
//!
//! Runs a number of independent, seeded car/pedestrian tracking trials in parallel. Each trial
//! feeds the filter a commanded action and a noisy displacement observation per step, then
//! records the true state next to the belief estimate. Results can be written to CSV.
//!
//! The filter itself can be configured from a TOML/JSON/YAML file:
//!
//! ```text
//! pomdp-sim --config filter.toml --trials 8 --output results/run.csv
//! pomdp-sim --write-config filter.toml
//! ```

mod common;
mod scenario;

use clap::Parser;
use common::{ensure_parent_dir, init_logger};
use log::{error, info};
use pomdp_filter::config::{ConfigFile, ParticleFilterConfig};
use pomdp_filter::estimate::AveragingStrategy;
use pomdp_filter::filter::ParticleFilter;
use rayon::prelude::*;
use scenario::{ScenarioParams, StepRecord, TrialOptions, run_trial, write_records};
use std::error::Error;
use std::path::PathBuf;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Runs seeded car/pedestrian tracking trials through the POMDP particle filter."
)]
struct Cli {
    /// Filter configuration file (TOML/JSON/YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the default filter configuration to this path and exit
    #[arg(long)]
    write_config: Option<PathBuf>,

    /// Number of particles in the belief
    #[arg(short, long, default_value_t = 500)]
    num_particles: usize,

    /// Number of filter steps per trial
    #[arg(short, long, default_value_t = 50)]
    steps: usize,

    /// Number of independent trials
    #[arg(short, long, default_value_t = 4)]
    trials: usize,

    /// Base RNG seed; trial `i` uses `seed + i`
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Keep hypotheses in which the car and pedestrian collide
    #[arg(long)]
    allow_collisions: bool,

    /// Keep colliding hypotheses as terminal states
    #[arg(long)]
    allow_terminal_states: bool,

    /// Report the highest-weight particle instead of the belief mean
    #[arg(long)]
    highest_weight: bool,

    /// CSV output file for per-step records
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> Result<ParticleFilterConfig, Box<dyn Error>> {
    match &cli.config {
        Some(path) => {
            info!("Loading filter configuration from {}", path.display());
            Ok(ParticleFilterConfig::from_file(path)?)
        }
        None => Ok(ParticleFilterConfig::default()),
    }
}

fn summarize(records: &[StepRecord], trials: usize) {
    for trial in 0..trials {
        let trial_records: Vec<&StepRecord> =
            records.iter().filter(|r| r.trial == trial).collect();
        let Some(last) = trial_records.last() else {
            continue;
        };
        let mean_error = trial_records.iter().map(|r| r.car_error).sum::<f64>()
            / trial_records.len() as f64;
        let replenished = trial_records.iter().filter(|r| r.replenished).count();
        let ess: Vec<f64> = trial_records
            .iter()
            .filter_map(|r| r.effective_sample_size)
            .collect();
        let mean_ess = if ess.is_empty() {
            0.0
        } else {
            ess.iter().sum::<f64>() / ess.len() as f64
        };
        info!(
            "Trial {}: mean car error {:.3} m, final car error {:.3} m, final pedestrian error {:.3} m, mean ESS {:.1}, {} replenished steps",
            trial, mean_error, last.car_error, last.pedestrian_error, mean_ess, replenished
        );
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    if let Some(path) = &cli.write_config {
        ensure_parent_dir(path)?;
        ParticleFilterConfig::default().to_file(path)?;
        info!("Wrote default filter configuration to {}", path.display());
        return Ok(());
    }

    let config = load_config(&cli)?;
    let filter = ParticleFilter::new(config)?;
    let params = ScenarioParams::default();
    let options = TrialOptions {
        num_particles: cli.num_particles,
        steps: cli.steps,
        allow_collisions: cli.allow_collisions,
        allow_terminal_states: cli.allow_terminal_states,
        averaging: if cli.highest_weight {
            AveragingStrategy::HighestWeight
        } else {
            AveragingStrategy::WeightedAverage
        },
    };
    info!(
        "Running {} trials of {} steps with {} particles ({:?} resampling)",
        cli.trials,
        cli.steps,
        cli.num_particles,
        filter.config().resampling_strategy
    );

    let outcomes: Vec<_> = (0..cli.trials)
        .into_par_iter()
        .map(|trial| {
            let seed = cli.seed.wrapping_add(trial as u64);
            (trial, run_trial(trial, seed, &filter, &params, &options))
        })
        .collect();

    let mut records = Vec::with_capacity(cli.trials * cli.steps);
    let mut failures = 0usize;
    for (trial, outcome) in outcomes {
        match outcome {
            Ok(trial_records) => records.extend(trial_records),
            Err(e) => {
                failures += 1;
                error!("Trial {} failed: {}", trial, e);
            }
        }
    }
    summarize(&records, cli.trials);

    if let Some(path) = &cli.output {
        ensure_parent_dir(path)?;
        write_records(&records, path)?;
        info!("Wrote {} records to {}", records.len(), path.display());
    }
    if failures > 0 {
        return Err(format!("{} trial(s) failed", failures).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["pomdp-sim"]);
        assert_eq!(cli.num_particles, 500);
        assert_eq!(cli.trials, 4);
        assert!(!cli.allow_collisions);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_summarize_handles_missing_trials() {
        summarize(&[], 3);
    }
}
