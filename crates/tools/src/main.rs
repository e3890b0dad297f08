use std::io::{BufWriter, stdout};
use std::path::PathBuf;

use clap::Parser;
use matching::SessionConfig;
use tools::{Script, ScriptError, load_config, run_to};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay a frame matching session script and print the backend requests")]
struct Args {
    /// Session script: {"frames": [...], "steps": [...]}
    script: PathBuf,

    /// Session config JSON; missing fields keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = real_main(Args::parse()) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn real_main(args: Args) -> Result<(), ScriptError> {
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => SessionConfig::default(),
    };
    let script = Script::load(&args.script)?;
    info!(frames = script.frames.len(), steps = script.steps.len(), "replaying script");
    run_to(&script, config, BufWriter::new(stdout().lock()))
}
