use std::error::Error;
use std::io;

use clap::{Parser, Subcommand, ValueEnum};
use commands::{
    collect::{self, CollectArgs},
    init::{self, InitArgs},
    plan::{self, PlanArgs},
    run::{self, RunArgs},
};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "swept-sim", about = "Timing sweeps for the swept solvers", version)]
struct Cli {
    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    /// Log line format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
    Pretty,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write an experiment config carrying the campaign defaults.
    Init(InitArgs),
    /// Validate a config and list the runs it would launch.
    Plan(PlanArgs),
    /// Sweep every (equation, scheme) pair and collect the timings.
    Run(RunArgs),
    /// Re-collect the timing artifact of a persisted sweep result.
    Collect(CollectArgs),
}

fn setup_logging(level: &str, format: LogFormat) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false);

    let installed = match format {
        LogFormat::Json => subscriber
            .json()
            .with_timer(tracing_subscriber::fmt::time::uptime())
            .try_init(),
        LogFormat::Compact => subscriber.compact().try_init(),
        LogFormat::Pretty => subscriber.pretty().try_init(),
    };
    installed.map_err(|err| err as Box<dyn Error>)
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level, cli.log_format)?;
    match cli.command {
        Command::Init(args) => init::run(&args),
        Command::Plan(args) => plan::run(&args),
        Command::Run(args) => run::run(&args),
        Command::Collect(args) => collect::run(&args),
    }
}
