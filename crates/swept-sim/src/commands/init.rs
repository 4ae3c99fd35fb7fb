use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::Args;
use swept_exp::{
    to_yaml_string, ExperimentConfig, LauncherSpec, SchedulerOpts, SweepSpec,
    DEFAULT_CAPTURE_LIMIT,
};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Where to write the config.
    #[arg(long, default_value = "swept.yaml")]
    pub out: PathBuf,
    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

fn campaign_config() -> ExperimentConfig {
    let sweep = SweepSpec::default();
    let equation_specs: BTreeMap<String, PathBuf> = sweep
        .equations
        .iter()
        .map(|eq| (eq.clone(), PathBuf::from("tests").join(format!("{eq}.json"))))
        .collect();
    ExperimentConfig {
        sweep,
        binary_dir: PathBuf::from("bin"),
        equation_specs,
        output_dir: PathBuf::from("rslts"),
        results_dir: None,
        scheduler: SchedulerOpts::default(),
        launcher: LauncherSpec::default(),
        timeout_secs: 600,
        grace_secs: 5,
        capture_limit: DEFAULT_CAPTURE_LIMIT,
        dry_run: false,
        base_dir: PathBuf::new(),
    }
}

pub fn run(args: &InitArgs) -> Result<(), Box<dyn Error>> {
    if args.out.exists() && !args.force {
        return Err(format!("{} already exists (pass --force to overwrite)", args.out.display()).into());
    }
    if let Some(parent) = args.out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let config = campaign_config();
    config.validate()?;
    fs::write(&args.out, to_yaml_string(&config)?)?;
    tracing::info!(path = %args.out.display(), runs = config.sweep.run_count(), "wrote config");
    Ok(())
}
