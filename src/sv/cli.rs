use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "supervise", version, about = "supervise one service directory")]
pub struct Args {
    /// Optional YAML config (timings, control directory name, log level)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Service directory holding `run` and friends
    pub dir: PathBuf,
}
