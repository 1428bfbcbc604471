use clap::Parser;
use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = supervise::sv::cli::Args::parse();
    let cfg = match supervise::sv::config::load_supervise_config(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => return fatal(e),
    };
    supervise::sv::events::init_tracing(&cfg.log_level);
    match supervise::sv::daemon::run_supervise_async(&args.dir, cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fatal(e),
    }
}

fn fatal(e: anyhow::Error) -> ExitCode {
    eprintln!("supervise: fatal: {e:#}");
    ExitCode::from(111)
}
