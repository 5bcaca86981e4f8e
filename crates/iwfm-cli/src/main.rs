use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use iwfm_runtime::{init_logging, LogConfig};
use std::io;
use std::path::PathBuf;

mod commands;
mod config;

/// Drive the IWFM hydrologic engine from the command line.
///
/// Inspects budget and zone budget result files, queries a model scenario,
/// and steps a simulation through the engine library.
///
/// EXAMPLES:
///     iwfm budget info Results/GW_Budget.hdf
///     iwfm budget series Results/GW_Budget.hdf -l 1 -c "Deep Percolation (+)"
///     iwfm model info
///     iwfm model run --steps 12
///
/// ENVIRONMENT VARIABLES:
///     IWFM_LIBRARY      Engine library name or path
///     IWFM_INDEX_BASE   Base of engine location numbers (0 or 1)
///     IWFM_LOG_LEVEL    Minimum log level
///     IWFM_OUTPUT       Set to 'json' for JSON output by default
///     IWFM_NO_PROGRESS  Set to '1' to hide progress bars
#[derive(Parser)]
#[command(name = "iwfm")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Engine library name or path (overrides configuration)
    #[arg(long, short = 'L', global = true)]
    library: Option<String>,

    /// Project configuration file (default: iwfm.toml found from the current directory)
    #[arg(long, short = 'C', global = true)]
    config: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect budget and zone budget result files
    ///
    /// EXAMPLES:
    ///     iwfm budget info Results/GW_Budget.hdf
    ///     iwfm budget info Results/ZBudget.hdf --zbudget
    ///     iwfm budget series Results/GW_Budget.hdf -l 22 -c Inflow -c Outflow
    #[command(visible_alias = "b")]
    Budget {
        #[command(subcommand)]
        command: commands::budget::BudgetCommand,
    },

    /// Query or step the model scenario
    ///
    /// Input files come from --preprocessor/--simulation or the [model]
    /// table of iwfm.toml.
    ///
    /// EXAMPLES:
    ///     iwfm model info
    ///     iwfm model run --steps 12
    #[command(visible_alias = "m")]
    Model {
        #[command(subcommand)]
        command: commands::model::ModelCommand,
    },

    /// Generate shell completions
    ///
    /// EXAMPLES:
    ///     iwfm completions bash > ~/.local/share/bash-completion/completions/iwfm
    ///     iwfm completions zsh > ~/.zfunc/_iwfm
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cli_config = config::Config::from_env();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "iwfm", &mut io::stdout());
        return Ok(());
    }

    let settings = config::load_settings(cli.config.as_deref())?;

    init_logging(&LogConfig::from_settings(&settings.logging()).with_verbosity(cli.verbose));

    let ctx = commands::Context {
        settings,
        library: cli.library,
        // Command-line flag overrides environment variable
        json: cli.json || cli_config.default_json,
        progress: !cli_config.no_progress,
    };

    match cli.command {
        Commands::Budget { command } => commands::budget::run(&ctx, command),
        Commands::Model { command } => commands::model::run(&ctx, command),
        Commands::Completions { .. } => Ok(()),
    }
}

