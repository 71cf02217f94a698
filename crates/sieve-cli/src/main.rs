mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, run::RunArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "sieve-exec",
    about = "Execute mail filtering action plans: store, discard, and notify with transactional rollback",
    version,
    propagate_version = true
)]
struct Cli {
    /// Engine configuration file (YAML)
    #[arg(long, global = true, env = "SIEVE_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Verbose host logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add the actions of a plan to a result and execute it against a message
    Run(RunArgs),

    /// List the registered action and side-effect types
    Actions,

    /// Inspect the engine configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Run(args) => cmd::run::run(args, config, cli.json),
        Commands::Actions => cmd::actions::run(cli.json),
        Commands::Config { subcommand } => cmd::config::run(subcommand, config, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
