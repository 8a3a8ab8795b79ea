//! Command-line interface for the Lagrangian pipeline.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{AverageMode, CenterMethod, MassFractions};
use crate::core::loaders::{load_snapshot_list, load_table, SnapshotEntry};
use crate::core::writers::{write_core_csv, write_lagrangian_csv};
use crate::processors::center::CoreHistory;
use crate::processors::lagrangian::{fractions_from_headers, LagrangianMultiple, POPULATIONS};
use crate::processors::pipeline::{output_paths, outputs_exist, BatchReport, SnapshotProcessor};
use crate::visualization;
use crate::PipelineConfig;

#[derive(Parser)]
#[command(name = "lagrangian-pipeline")]
#[command(about = "Lagrangian radii and core radius of star cluster snapshots", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute Lagrangian and core time series from a list of snapshots
    Process {
        /// File listing one snapshot per line: `path [time]`
        snapshot_list: PathBuf,
        /// Output filename prefix (writes <prefix>.lagr.csv and <prefix>.core.csv)
        #[arg(short = 'p', long)]
        filename_prefix: Option<String>,
        /// Comma separated mass fractions, e.g. 0.1,0.5,0.9
        #[arg(short, long, value_delimiter = ',')]
        mass_fraction: Option<Vec<f64>>,
        /// Averaging of bin statistics: sphere or shell
        #[arg(short, long)]
        average_mode: Option<AverageMode>,
        /// Centre estimator: density or potential
        #[arg(long)]
        center: Option<CenterMethod>,
        /// Worker threads (0 = all cores)
        #[arg(short = 'n', long)]
        threads: Option<usize>,
        /// Append to existing output files instead of starting over
        #[arg(short, long)]
        read_data: bool,
        /// Also plot the Lagrangian radii of all particles
        #[arg(long)]
        plot: bool,
    },

    /// Plot Lagrangian radii against time (PNG)
    Plot {
        /// Lagrangian CSV written by `process`
        lagr_file: PathBuf,
        /// Output PNG file path (defaults to the input name with .png extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Population to plot: single, binary or all
        #[arg(long, default_value = "all")]
        population: String,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Create a progress bar counting processed snapshots
fn create_progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} snapshots ({eta})")
            .unwrap()
            .progress_chars("=>-"),
    );
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            let head: String = value.chars().take(36).collect();
            format!("{}...", head)
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config; an explicit file that fails validation aborts the run
    let config = match load_config(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    // Dispatch to subcommands
    match cli.command {
        Commands::Process {
            snapshot_list,
            filename_prefix,
            mass_fraction,
            average_mode,
            center,
            threads,
            read_data,
            plot,
        } => {
            let overrides = Overrides {
                filename_prefix,
                mass_fraction,
                average_mode,
                center,
                threads,
            };
            cmd_process(&snapshot_list, overrides, read_data, plot, config);
        }
        Commands::Plot {
            lagr_file,
            output,
            population,
        } => {
            cmd_plot(&lagr_file, output, &population);
        }
    }
}

/// Load the YAML config at `path`, or the defaults when no path was given.
fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(path) => {
            let config = PipelineConfig::from_yaml(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?;
            info!("Loaded config from: {}", path.display());
            Ok(config)
        }
        None => Ok(PipelineConfig::default()),
    }
}

/// Command-line values that take precedence over the config file.
struct Overrides {
    filename_prefix: Option<String>,
    mass_fraction: Option<Vec<f64>>,
    average_mode: Option<AverageMode>,
    center: Option<CenterMethod>,
    threads: Option<usize>,
}

impl Overrides {
    fn apply(self, mut config: PipelineConfig) -> anyhow::Result<PipelineConfig> {
        if let Some(prefix) = self.filename_prefix {
            config.processing.filename_prefix = prefix;
        }
        if let Some(values) = self.mass_fraction {
            config.lagrangian.mass_fraction =
                MassFractions::new(values).context("invalid --mass-fraction")?;
        }
        if let Some(mode) = self.average_mode {
            config.lagrangian.average_mode = mode;
        }
        if let Some(method) = self.center {
            config.center.method = method;
        }
        if let Some(threads) = self.threads {
            config.processing.threads = threads;
        }
        config.lagrangian.validate()?;
        Ok(config)
    }
}

/// Existing series to append to, or fresh ones.
fn initial_series(
    config: &PipelineConfig,
    read_data: bool,
) -> anyhow::Result<(LagrangianMultiple, CoreHistory)> {
    let prefix = &config.processing.filename_prefix;
    let mass_fraction = &config.lagrangian.mass_fraction;

    if !read_data {
        return Ok((LagrangianMultiple::new(mass_fraction.clone()), CoreHistory::new()));
    }
    if !outputs_exist(prefix) {
        warn!("No existing output for prefix '{}', starting a new series", prefix);
        return Ok((LagrangianMultiple::new(mass_fraction.clone()), CoreHistory::new()));
    }

    let (lagr_path, core_path) = output_paths(prefix);
    let (headers, table) = load_table(&lagr_path)
        .with_context(|| format!("failed to read {}", lagr_path.display()))?;
    let lagr = LagrangianMultiple::from_table(mass_fraction, &headers, &table)
        .with_context(|| format!("cannot resume from {}", lagr_path.display()))?;

    let (core_headers, core_table) = load_table(&core_path)
        .with_context(|| format!("failed to read {}", core_path.display()))?;
    if core_headers != CoreHistory::COLUMNS {
        bail!("unexpected columns in {}", core_path.display());
    }
    let history = CoreHistory::from_table(&core_table)
        .with_context(|| format!("cannot resume from {}", core_path.display()))?;

    if history.len() != lagr.len() {
        bail!(
            "{} has {} rows but {} has {}",
            lagr_path.display(),
            lagr.len(),
            core_path.display(),
            history.len()
        );
    }
    info!("Resuming from {} stored snapshots", lagr.len());
    Ok((lagr, history))
}

/// Drop entries already present in the stored series.
fn pending_entries(entries: Vec<SnapshotEntry>, lagr: &LagrangianMultiple) -> Vec<SnapshotEntry> {
    let Some(&last) = lagr.time().last() else {
        return entries;
    };
    let (pending, done): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| e.time > last);
    if !done.is_empty() {
        info!("Skipping {} snapshots at or before t = {}", done.len(), last);
    }
    pending
}

struct ProcessOutcome {
    lagr_path: PathBuf,
    core_path: PathBuf,
    plot_path: Option<PathBuf>,
    stored: usize,
    report: BatchReport,
}

fn run_process(
    snapshot_list: &Path,
    config: &PipelineConfig,
    read_data: bool,
    plot: bool,
) -> anyhow::Result<ProcessOutcome> {
    let entries = load_snapshot_list(snapshot_list)
        .with_context(|| format!("failed to read snapshot list {}", snapshot_list.display()))?;

    let (mut lagr, mut history) = initial_series(config, read_data)?;
    let entries = pending_entries(entries, &lagr);
    info!("{} snapshots to process", entries.len());

    let processor = SnapshotProcessor::new(config);
    let pb = create_progress_bar(entries.len());
    let report = processor.process_batch(&entries, &mut lagr, &mut history, |_| pb.inc(1));
    pb.finish_and_clear();
    let report = report?;

    let (lagr_path, core_path) = output_paths(&config.processing.filename_prefix);
    write_lagrangian_csv(&lagr_path, &lagr)
        .with_context(|| format!("failed to write {}", lagr_path.display()))?;
    write_core_csv(&core_path, &history)
        .with_context(|| format!("failed to write {}", core_path.display()))?;

    let plot_path = if plot && !lagr.is_empty() {
        let path = lagr_path.with_extension("png");
        visualization::plot_lagrangian_radii(&path, lagr.time(), &lagr.all().r)
            .with_context(|| format!("failed to plot {}", path.display()))?;
        Some(path)
    } else {
        None
    };

    Ok(ProcessOutcome {
        lagr_path,
        core_path,
        plot_path,
        stored: lagr.len(),
        report,
    })
}

fn cmd_process(
    snapshot_list: &PathBuf,
    overrides: Overrides,
    read_data: bool,
    plot: bool,
    config: PipelineConfig,
) {
    let start = Instant::now();

    let config = match overrides.apply(config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    println!("Processing snapshots...");
    println!("Input: {}", snapshot_list.display());
    println!("Parameters:");
    println!("  mass_fraction: {:?}", config.lagrangian.mass_fraction.as_slice());
    println!("  average_mode: {}", config.lagrangian.average_mode);
    println!("  center: {}", config.center.method);
    println!("  neighbor_count: {}", config.lagrangian.neighbor_count);

    match run_process(snapshot_list, &config, read_data, plot) {
        Ok(outcome) => {
            let failed = outcome.report.failures.len();
            let mut items = vec![
                ("Snapshot list", snapshot_list.display().to_string()),
                ("Processed", outcome.report.processed.to_string()),
                ("Failed", failed.to_string()),
                ("Rows stored", outcome.stored.to_string()),
                ("Lagrangian CSV", outcome.lagr_path.display().to_string()),
                ("Core CSV", outcome.core_path.display().to_string()),
            ];
            if let Some(path) = &outcome.plot_path {
                items.push(("Plot", path.display().to_string()));
            }
            items.push(("Duration", format!("{:.2?}", start.elapsed())));
            print_summary("Lagrangian Processing Complete", &items);

            if failed > 0 {
                error!("{} snapshot(s) failed", failed);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("Processing failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run_plot(lagr_file: &Path, output_path: &Path, population: &str) -> anyhow::Result<usize> {
    let (headers, table) = load_table(lagr_file)
        .with_context(|| format!("failed to read {}", lagr_file.display()))?;
    let mass_fraction = fractions_from_headers(&headers)?;
    let lagr = LagrangianMultiple::from_table(&mass_fraction, &headers, &table)?;

    let Some(series) = lagr.population(population) else {
        bail!(
            "unknown population '{}', expected one of {}",
            population,
            POPULATIONS.join(", ")
        );
    };
    visualization::plot_lagrangian_radii(output_path, lagr.time(), &series.r)?;
    Ok(lagr.len())
}

fn cmd_plot(lagr_file: &PathBuf, output: Option<PathBuf>, population: &str) {
    let start = Instant::now();

    // Determine output path (default to same name as input with .png extension)
    let output_path = output.unwrap_or_else(|| {
        let mut path = lagr_file.clone();
        path.set_extension("png");
        path
    });

    let spinner = create_spinner("Plotting Lagrangian radii...");

    match run_plot(lagr_file, &output_path, population) {
        Ok(rows) => {
            spinner.finish_and_clear();

            print_summary(
                "Plot Complete",
                &[
                    ("Input file", lagr_file.display().to_string()),
                    ("Output PNG", output_path.display().to_string()),
                    ("Population", population.to_string()),
                    ("Snapshots", rows.to_string()),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => {
            spinner.finish_and_clear();
            error!("Plot failed: {:#}", e);
            std::process::exit(1);
        }
    }
}
