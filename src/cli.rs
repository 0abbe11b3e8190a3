//! The command line interface for the dispatch optimiser.
use crate::cleaning::{
    CleaningOptions, block_volumes, block_volumes_file_name, clean_reserve_prices,
};
use crate::dispatch::run_dispatch;
use crate::log;
use crate::output::metadata::write_metadata;
use crate::output::{DataWriter, create_output_directory, get_output_dir};
use crate::parameters::DispatchParameters;
use crate::prices::{PriceProvider, check_price_series};
use crate::settings::Settings;
use crate::week::select_week;
use ::log::{info, warn};
use anyhow::{Context, Result};
use chrono::FixedOffset;
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::fs::File;
use std::path::{Path, PathBuf};

pub mod example;
use example::ExampleSubcommands;
pub mod settings;
use settings::SettingsSubcommands;

/// The command line interface for the dispatch optimiser.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// The available commands.
    #[command(subcommand)]
    command: Option<Commands>,
    /// Flag to provide the CLI docs as markdown
    #[arg(long, hide = true)]
    markdown_help: bool,
}

/// Options for the run command
#[derive(Args, Default)]
pub struct RunOpts {
    /// Directory for output files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
    /// Whether to overwrite the output directory if it already exists
    #[arg(long)]
    pub overwrite: bool,
    /// Whether to write every bid lane to a debug CSV file
    #[arg(long)]
    pub debug_model: bool,
}

/// Options for the clean-prices command
#[derive(Args)]
pub struct CleanPricesOpts {
    /// The calendar year the results file covers
    #[arg(long)]
    pub year: i32,
    /// Output file [default: <prefix>_filled_<year>.csv next to the input]
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// UTC offset at which auction blocks start
    #[arg(long, default_value = "+01:00", allow_hyphen_values = true)]
    pub utc_offset: FixedOffset,
    /// Case-insensitive substring of the product description to keep
    #[arg(long, default_value = "Primary control")]
    pub product: String,
    /// Country code to keep
    #[arg(long, default_value = "CH")]
    pub country: String,
    /// Prefix of the auction IDs
    #[arg(long, default_value = "PRL")]
    pub prefix: String,
}

/// Options for the block-volumes command
#[derive(Args)]
pub struct BlockVolumesOpts {
    /// The calendar year the results file covers
    #[arg(long)]
    pub year: i32,
    /// Output file [default: <country>_<prefix>_totalMW_per_block_<year>.csv next to the input]
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Case-insensitive substring of the product description to keep
    #[arg(long, default_value = "Primary control")]
    pub product: String,
    /// Country code to keep
    #[arg(long, default_value = "CH")]
    pub country: String,
    /// Prefix of the auction IDs
    #[arg(long, default_value = "PRL")]
    pub prefix: String,
}

/// The available commands.
#[derive(Subcommand)]
enum Commands {
    /// Optimise the dispatch for a scenario.
    Run {
        /// Path to the scenario directory.
        scenario_dir: PathBuf,
        /// Other run options
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Manage example scenarios.
    Example {
        /// The available subcommands for managing example scenarios.
        #[command(subcommand)]
        subcommand: ExampleSubcommands,
    },
    /// Check a scenario and its price data without solving.
    Validate {
        /// The path to the scenario directory.
        scenario_dir: PathBuf,
    },
    /// Manage program settings.
    Settings {
        /// The subcommands for managing settings.
        #[command(subcommand)]
        subcommand: SettingsSubcommands,
    },
    /// Clean a Swissgrid reserve results file into a price series.
    CleanPrices {
        /// The raw `;`-separated results file.
        input: PathBuf,
        /// Cleaning options
        #[command(flatten)]
        opts: CleanPricesOpts,
    },
    /// Total the volume awarded per auction block in a Swissgrid reserve results file.
    BlockVolumes {
        /// The raw `;`-separated results file.
        input: PathBuf,
        /// Filter and output options
        #[command(flatten)]
        opts: BlockVolumesOpts,
    },
    /// Select one ISO week from a time-indexed CSV file.
    Week {
        /// A CSV file with a `timestamp` column.
        input: PathBuf,
        /// The ISO year
        #[arg(long)]
        year: i32,
        /// The ISO week number
        #[arg(long)]
        week: u32,
        /// Output file [default: <input>_<year>_w<week>.csv next to the input]
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Commands {
    /// Execute the supplied CLI command
    fn execute(self) -> Result<()> {
        match self {
            Self::Run { scenario_dir, opts } => handle_run_command(&scenario_dir, &opts, None),
            Self::Example { subcommand } => subcommand.execute(),
            Self::Validate { scenario_dir } => handle_validate_command(&scenario_dir, None),
            Self::Settings { subcommand } => subcommand.execute(),
            Self::CleanPrices { input, opts } => handle_clean_prices_command(&input, opts, None),
            Self::BlockVolumes { input, opts } => handle_block_volumes_command(&input, opts, None),
            Self::Week {
                input,
                year,
                week,
                output,
            } => handle_week_command(&input, year, week, output.as_deref(), None),
        }
    }
}

/// Parse CLI arguments and run the requested command
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Invoked as: `$ bess-dispatch --markdown-help`
    if cli.markdown_help {
        clap_markdown::print_help_markdown::<Cli>();
        return Ok(());
    }

    let Some(command) = cli.command else {
        let help_str = Cli::command().render_long_help().to_string();
        println!("{help_str}");
        return Ok(());
    };

    command.execute()
}

/// Use the given settings, or load them from the settings file
fn settings_or_load(settings: Option<Settings>) -> Result<Settings> {
    match settings {
        Some(settings) => Ok(settings),
        None => Settings::load().context("Failed to load settings."),
    }
}

/// Handle the `run` command.
pub fn handle_run_command(
    scenario_path: &Path,
    opts: &RunOpts,
    settings: Option<Settings>,
) -> Result<()> {
    let mut settings = settings_or_load(settings)?;

    // These settings can be overridden by command-line arguments
    if opts.debug_model {
        settings.debug_model = true;
    }
    if opts.overwrite {
        settings.overwrite = true;
    }

    // Get path to output folder
    let pathbuf: PathBuf;
    let output_path = if let Some(p) = opts.output_dir.as_deref() {
        p
    } else {
        pathbuf = get_output_dir(scenario_path)?;
        &pathbuf
    };

    let overwrite =
        create_output_directory(output_path, settings.overwrite).with_context(|| {
            format!(
                "Failed to create output directory: {}",
                output_path.display()
            )
        })?;

    log::init(Some(&settings.log_level), Some(output_path))
        .context("Failed to initialise logging.")?;

    // NB: We have to wait until the logger is initialised to display this warning
    if overwrite {
        warn!("Output folder will be overwritten");
    }

    let params = DispatchParameters::from_path(scenario_path).context("Failed to load scenario.")?;
    info!("Loaded scenario from {}", scenario_path.display());
    info!("Output folder: {}", output_path.display());

    let result = run_dispatch(&params)?;
    info!(
        "Dispatch finished ({}) with objective {}",
        result.status, result.objective
    );

    let mut writer = DataWriter::create(output_path, settings.debug_model)?;
    writer.write_result(&result, &params.horizon()?)?;
    writer.flush()?;
    write_metadata(output_path, scenario_path, &result.status.to_string())
        .context("Failed to write metadata.")?;

    Ok(())
}

/// Handle the `validate` command.
pub fn handle_validate_command(scenario_path: &Path, settings: Option<Settings>) -> Result<()> {
    let settings = settings_or_load(settings)?;

    // Initialise program logger (we won't save log files when running the validate command)
    log::init(Some(&settings.log_level), None).context("Failed to initialise logging.")?;

    let params =
        DispatchParameters::from_path(scenario_path).context("Failed to validate scenario.")?;
    let horizon = params.horizon()?;
    let series = params
        .prices
        .price_series(&horizon)
        .context("Failed to load price data.")?;
    check_price_series(&series, &horizon).context("Failed to validate price data.")?;
    info!("Scenario validation successful!");

    Ok(())
}

/// Handle the `clean-prices` command.
pub fn handle_clean_prices_command(
    input_path: &Path,
    opts: CleanPricesOpts,
    settings: Option<Settings>,
) -> Result<()> {
    let settings = settings_or_load(settings)?;
    log::init(Some(&settings.log_level), None).context("Failed to initialise logging.")?;

    let output_path = opts.output.unwrap_or_else(|| {
        input_path.with_file_name(format!("{}_filled_{}.csv", opts.prefix, opts.year))
    });
    let options = CleaningOptions {
        year: opts.year,
        product: opts.product,
        country: opts.country,
        prefix: opts.prefix,
        utc_offset: opts.utc_offset,
    };
    clean_reserve_prices(input_path, &output_path, &options)?;

    Ok(())
}

/// Handle the `block-volumes` command.
pub fn handle_block_volumes_command(
    input_path: &Path,
    opts: BlockVolumesOpts,
    settings: Option<Settings>,
) -> Result<()> {
    let settings = settings_or_load(settings)?;
    log::init(Some(&settings.log_level), None).context("Failed to initialise logging.")?;

    let options = CleaningOptions {
        product: opts.product,
        country: opts.country,
        prefix: opts.prefix,
        ..CleaningOptions::primary_control(opts.year)
    };
    let output_path = opts
        .output
        .unwrap_or_else(|| input_path.with_file_name(block_volumes_file_name(&options)));
    block_volumes(input_path, &output_path, &options)?;

    Ok(())
}

/// Handle the `week` command.
pub fn handle_week_command(
    input_path: &Path,
    year: i32,
    week: u32,
    output_path: Option<&Path>,
    settings: Option<Settings>,
) -> Result<()> {
    let settings = settings_or_load(settings)?;
    log::init(Some(&settings.log_level), None).context("Failed to initialise logging.")?;

    let output_path = output_path.map_or_else(
        || {
            let stem = input_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            input_path.with_file_name(format!("{stem}_{year}_w{week:02}.csv"))
        },
        Path::to_path_buf,
    );
    let file = File::create(&output_path)
        .with_context(|| format!("Could not create {}", output_path.display()))?;
    select_week(input_path, year, week, file)?;
    info!("Wrote selection to {}", output_path.display());

    Ok(())
}
