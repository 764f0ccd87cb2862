use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use strata_apply::Config;

mod commands;
mod logging;

/// Exit code for a run that halted.
const EXIT_HALTED: u8 = 1;
/// Exit code for configuration and usage errors.
const EXIT_USAGE: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "strata", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the target database (default: ~/.local/share/strata/strata.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Apply pending migrations
    ///
    /// Discovers `V<version>__<description>.sql` files, compares them with the
    /// schema history table, and applies every pending migration in ascending
    /// version order. Each migration runs in its own transaction together with
    /// its history record, so a failure rolls back only the migration in
    /// flight. Earlier commits are kept.
    ///
    /// Nothing is applied if an already-applied file has changed (drift), if
    /// a file name is malformed, or if two files share a version.
    ///
    /// Exit status: 0 when the schema is up to date, 1 when the run halted,
    /// 2 on configuration errors.
    Apply(commands::apply::ApplyArgs),
    /// Show applied, pending, drifted and missing migrations
    Status {
        /// Directory containing migration files
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Check migrations without touching the target database
    ///
    /// Runs the naming, ordering and manifest checks, then applies every
    /// migration to a scratch in-memory database.
    Validate(commands::validate::ValidateArgs),
    /// Remove a run lock left behind by a crashed run
    Unlock,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, clap::Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Print one setting, or the whole config file when no key is given
    Get { key: Option<String> },
    /// Write a setting to the config file
    Set { key: String, value: String },
    /// Print the config file path
    Path,
    /// Print an example config file
    Example,
    /// Create the config file with defaults
    Init,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.db.clone()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    if let Err(e) = logging::setup(&config.logging, cli.verbose) {
        eprintln!("Error: {e:#}");
        return ExitCode::from(EXIT_USAGE);
    }

    let result = match cli.command {
        Commands::Apply(args) => commands::run_apply(config, args),
        Commands::Status { dir } => commands::show_status(&config, dir),
        Commands::Validate(args) => commands::run_validate(&config, args),
        Commands::Unlock => commands::run_unlock(&config),
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show_config(&config),
            ConfigAction::Get { key } => commands::config::get_config(&config, key),
            ConfigAction::Set { key, value } => commands::config::set_config(&key, &value),
            ConfigAction::Path => commands::config::show_path(),
            ConfigAction::Example => commands::config::show_example(),
            ConfigAction::Init => commands::config::init_config(),
        },
    };

    match result {
        Ok(commands::Outcome::Done) => ExitCode::SUCCESS,
        Ok(commands::Outcome::Halted) => ExitCode::from(EXIT_HALTED),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}

fn load_config(db: Option<PathBuf>) -> anyhow::Result<Config> {
    match db {
        Some(path) => {
            let mut config = Config::load_with_db_path(path)?;
            // An explicit --db wins over a configured credentials file.
            config.credentials_file = None;
            Ok(config)
        }
        None => Config::load(),
    }
}
