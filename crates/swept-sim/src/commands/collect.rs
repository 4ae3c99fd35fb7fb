use std::error::Error;
use std::path::{Path, PathBuf};

use clap::Args;
use swept_exp::{collect, read_sweep_result, Reporter, SummaryWriter};

#[derive(Args, Debug)]
pub struct CollectArgs {
    /// Sweep result written by `swept-sim run`.
    #[arg(long)]
    pub sweep: PathBuf,
    /// Directory for the timing table and summary; defaults to the sweep's directory.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub fn run(args: &CollectArgs) -> Result<(), Box<dyn Error>> {
    let result = read_sweep_result(&args.sweep)?;
    let set = collect(&result)?;

    let out = args
        .out
        .clone()
        .unwrap_or_else(|| args.sweep.parent().unwrap_or(Path::new(".")).to_path_buf());
    SummaryWriter::new(&out).report(&set)?;

    let summary = serde_json::json!({
        "pair": result.pair.to_string(),
        "label": result.pair.label(),
        "records": set.artifact.len(),
        "counts": set.counts,
        "out": out.display().to_string(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
