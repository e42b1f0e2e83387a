use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tariff_sets::config::{self, RunConfig, RunFile};
use tariff_sets::engine::{self, TariffDataset};
use tariff_sets::output::{DelimitedSink, OutputFormat, write_summary};

#[derive(Parser)]
#[command(
    name = "tariff_sets",
    about = "Resolve bilateral tariff sets: PRF rates where available, MFN otherwise"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Input locations shared by every subcommand.
#[derive(Args)]
struct InputArgs {
    /// TOML run file; flags given on the command line override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Bulk archive of MFN applied rates (zip of zipped csv files)
    #[arg(long)]
    mfn: Option<PathBuf>,
    /// Bulk archive of PRF applied rates
    #[arg(long)]
    prf: Option<PathBuf>,
    /// Pipe-delimited numeric3|alpha3|region file with a header row
    #[arg(long)]
    concordance: Option<PathBuf>,
    /// Field delimiter of the csv files inside the archives
    #[arg(long)]
    delimiter: Option<char>,
    /// The csv files have no header row
    #[arg(long)]
    no_header: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve every year window → <output>/prf_union_mfn_target_<target>.txt
    Resolve {
        #[command(flatten)]
        inputs: InputArgs,
        /// Output directory
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Year window, e.g. "1995:2011" (repeatable)
        #[arg(long = "window", short = 'w')]
        windows: Vec<String>,
        /// Keep only rows whose reporter or partner is in this region (repeatable)
        #[arg(long = "region")]
        regions: Vec<String>,
        /// Keep only rows whose reporter is in this region (repeatable)
        #[arg(long = "reporter-region")]
        reporter_regions: Vec<String>,
        /// Keep only rows whose partner is in this region (repeatable)
        #[arg(long = "partner-region")]
        partner_regions: Vec<String>,
        /// Carry on with later windows when one fails to write
        #[arg(long)]
        continue_on_error: bool,
        /// Append to existing output files instead of overwriting them
        #[arg(long)]
        append: bool,
        /// Resolve windows concurrently
        #[arg(long)]
        parallel: bool,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Print row counts and year spans of the inputs
    Inspect {
        #[command(flatten)]
        inputs: InputArgs,
    },
}

impl InputArgs {
    /// The run file (if any) with command-line values laid over it.
    fn run_file(&self, overrides: RunFile) -> anyhow::Result<RunFile> {
        let base = match &self.config {
            Some(path) => RunFile::load(path)?,
            None => RunFile::default(),
        };
        Ok(base.overlay(RunFile {
            mfn: self.mfn.clone(),
            prf: self.prf.clone(),
            concordance: self.concordance.clone(),
            delimiter: self.delimiter,
            header: self.no_header.then_some(false),
            ..overrides
        }))
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Resolve {
            inputs,
            output,
            windows,
            regions,
            reporter_regions,
            partner_regions,
            continue_on_error,
            append,
            parallel,
            format,
        } => {
            let file = inputs.run_file(RunFile {
                output,
                windows,
                regions,
                reporter_regions,
                partner_regions,
                continue_on_error: continue_on_error.then_some(true),
                append: append.then_some(true),
                parallel: parallel.then_some(true),
                format,
                ..RunFile::default()
            })?;
            run_resolve(RunConfig::try_from(file)?)
        }
        Command::Inspect { inputs } => run_inspect(inputs.run_file(RunFile::default())?),
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  RESOLVE MODE: inputs → one tariff file per window + run_summary.json
// ═══════════════════════════════════════════════════════════════════════

fn run_resolve(config: RunConfig) -> anyhow::Result<()> {
    let dataset = TariffDataset::load(&config.inputs, config.archive)
        .context("cannot load tariff inputs")?;

    if !config.filter.is_empty() {
        info!("Restricting output to the configured regions");
    }

    let mut sink = DelimitedSink::new(&config.output_dir, config.write_mode, config.format)?;
    let filter = &config.filter;
    let summary = engine::run(
        &dataset,
        &config.windows,
        config.options,
        |record| filter.matches(record),
        &mut sink,
    )?;
    write_summary(&config.output_dir, &summary)?;

    let failures = summary.failures();
    if failures > 0 {
        bail!(
            "{failures} of {} year windows failed; see {}",
            summary.windows.len(),
            config.output_dir.join(tariff_sets::output::SUMMARY_FILE).display()
        );
    }
    info!("Finished {} year window(s)", summary.windows.len());
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
//  INSPECT MODE: print the shape of the inputs as JSON
// ═══════════════════════════════════════════════════════════════════════

fn run_inspect(file: RunFile) -> anyhow::Result<()> {
    let inputs = config::required_inputs(&file)?;
    let options = config::archive_options(&file)?;
    let dataset = TariffDataset::load(&inputs, options).context("cannot load tariff inputs")?;
    let json = serde_json::to_string_pretty(&dataset.overview())?;
    println!("{json}");
    Ok(())
}
