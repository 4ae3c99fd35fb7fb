use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::Args;
use swept_exp::{load_config, ParameterSpace};

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// YAML experiment config.
    #[arg(long)]
    pub config: PathBuf,
    /// Print only the number of runs.
    #[arg(long)]
    pub count: bool,
}

pub fn run(args: &PlanArgs) -> Result<(), Box<dyn Error>> {
    let config = load_config(&args.config)?;
    config.validate()?;
    let space = ParameterSpace::new(&config.sweep)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{}", space.len())?;
    if args.count {
        return Ok(());
    }

    let settings = config.invoker_settings();
    for pair in space.pairs() {
        writeln!(out, "# {} -> {}", pair.label(), config.artifact_path(&pair).display())?;
        for run in &ParameterSpace::for_pair(&config.sweep, &pair)? {
            writeln!(out, "{}", settings.invocation(&run)?)?;
        }
    }
    Ok(())
}
