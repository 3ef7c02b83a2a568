//! The command line interface for the effects engine.
use crate::input::batch_settings::read_batch_settings;
use crate::log;
use crate::model::BatchInputs;
use crate::output::metadata::write_metadata;
use crate::output::{DataWriter, create_output_directory, get_output_dir, run_timestamp};
use crate::settings::Settings;
use crate::simulation;
use ::log::{info, warn};
use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};

pub mod example;
use example::ExampleSubcommands;
pub mod settings;
use settings::SettingsSubcommands;

/// The command line interface for the effects engine.
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
    /// Whether to write the interpolated emission rate tables used by the run
    #[arg(long)]
    pub save_rate_details: bool,
}

/// The available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run the effects calculations for a batch.
    Run {
        /// Path to the batch settings file.
        batch_settings: PathBuf,
        /// Other run options
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Manage demo batches.
    Example {
        /// The available subcommands for managing demo batches.
        #[command(subcommand)]
        subcommand: ExampleSubcommands,
    },
    /// Check every input of a batch without calculating anything.
    Validate {
        /// Path to the batch settings file.
        batch_settings: PathBuf,
    },
    /// Manage the program settings file.
    Settings {
        /// The subcommands for managing the settings file
        #[command(subcommand)]
        subcommand: SettingsSubcommands,
    },
}

impl Commands {
    /// Execute the supplied CLI command
    fn execute(self) -> Result<()> {
        match self {
            Self::Run {
                batch_settings,
                opts,
            } => handle_run_command(&batch_settings, &opts, None),
            Self::Example { subcommand } => subcommand.execute(),
            Self::Validate { batch_settings } => handle_validate_command(&batch_settings, None),
            Self::Settings { subcommand } => subcommand.execute(),
        }
    }
}

/// Parse CLI arguments and run the requested command
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Invoked as: `$ fleet_effects --markdown-help`
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

/// Load program settings, if not provided
fn settings_or_load(settings: Option<Settings>) -> Result<Settings> {
    match settings {
        Some(settings) => Ok(settings),
        None => Settings::load().context("Failed to load settings."),
    }
}

/// Handle the `run` command.
///
/// # Arguments
///
/// * `settings_path` - Path to the batch settings file
/// * `opts` - Options given on the command line
/// * `settings` - Program settings. Read from the settings file if not given.
pub fn handle_run_command(
    settings_path: &Path,
    opts: &RunOpts,
    settings: Option<Settings>,
) -> Result<()> {
    let settings = settings_or_load(settings)?;

    // Command-line flags can only switch these on
    let allow_overwrite = opts.overwrite || settings.overwrite;
    let save_rate_details = opts.save_rate_details || settings.save_rate_details;

    let batch_settings =
        read_batch_settings(settings_path).context("Failed to read batch settings.")?;
    let batch_name = batch_settings.parameters.batch_name.clone();
    let timestamp = run_timestamp();

    let default_path: PathBuf;
    let output_path = if let Some(path) = opts.output_dir.as_deref() {
        path
    } else {
        default_path = get_output_dir(&batch_name, &timestamp);
        &default_path
    };

    let overwrite =
        create_output_directory(output_path, allow_overwrite).with_context(|| {
            format!(
                "Failed to create output directory: {}",
                output_path.display()
            )
        })?;

    log::init(Some(&settings.log_level), Some(output_path))
        .context("Failed to initialise logging.")?;

    info!("Batch: {batch_name}");
    info!("Output folder: {}", output_path.display());

    // NB: We have to wait until the logger is initialised to display this warning
    if overwrite {
        warn!("Output folder will be overwritten");
    }

    let batch = BatchInputs::load(batch_settings).context("Failed to load batch inputs.")?;
    let results = simulation::run(&batch)?;

    let writer = DataWriter::new(output_path, &batch_name, &timestamp);
    writer.write_results(
        &results,
        batch.parameters(),
        &batch.refinery_rates,
        save_rate_details,
    )?;
    write_metadata(output_path, settings_path, &batch_name, &timestamp)
        .context("Failed to save metadata.")?;
    info!("Effects calculations complete!");

    Ok(())
}

/// Handle the `validate` command.
///
/// Every batch and session input is loaded. No output files are written.
pub fn handle_validate_command(settings_path: &Path, settings: Option<Settings>) -> Result<()> {
    let settings = settings_or_load(settings)?;

    // Initialise program logger (we won't save log files when running the validate command)
    log::init(Some(&settings.log_level), None).context("Failed to initialise logging.")?;

    let batch = BatchInputs::from_path(settings_path).context("Failed to validate batch.")?;
    for session in &batch.settings.sessions {
        batch
            .load_session(session)
            .with_context(|| format!("Failed to validate session {}.", session.name))?;
        info!("Session {} ({}) is valid", session.name, session.policy);
    }
    info!("Batch validation successful!");

    Ok(())
}
