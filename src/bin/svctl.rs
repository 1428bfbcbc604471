use std::process::ExitCode;

fn main() -> ExitCode {
    match supervise::sv::svctl_cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("svctl: {e:#}");
            ExitCode::FAILURE
        }
    }
}
