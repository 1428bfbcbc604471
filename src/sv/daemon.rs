use crate::sv::build_info;
use crate::sv::channels::{self, ControlFifo};
use crate::sv::config::{supervisedir_from_env, SuperviseConfig};
use crate::sv::event_loop::{self, Wakeups};
use crate::sv::events::sv_event;
use crate::sv::launcher::UnixLauncher;
use crate::sv::supervisor::{Supervisor, SupervisorOptions};
use crate::sv::svdir::{self, FsServiceDir, ServiceDir};
use anyhow::Context;
use nix::fcntl::OFlag;
use std::path::Path;

/// Supervise `dir` until told to exit. Every error returned here is fatal.
pub async fn run_supervise_async(dir: &Path, cfg: SuperviseConfig) -> anyhow::Result<()> {
    std::env::set_current_dir(dir).with_context(|| format!("unable to chdir to {}", dir.display()))?;
    let abs_dir = std::env::current_dir()
        .with_context(|| format!("unable to setup control path for {}", dir.display()))?;
    let control = cfg.control_path(&abs_dir, supervisedir_from_env().as_deref());

    channels::create_control_dir(&control)?;
    let _lock = channels::acquire_lock(&control)?;

    let svc = FsServiceDir::default();
    let orphanage = svc.exists(svdir::ORPHANAGE).unwrap_or(true);
    if orphanage {
        set_subreaper()?;
    }

    let log_pipe = if matches!(svc.is_executable(svdir::LOG), Ok(true)) {
        let pipe = nix::unistd::pipe2(OFlag::O_CLOEXEC)
            .with_context(|| format!("unable to create pipe for {}", dir.display()))?;
        anyhow::ensure!(!orphanage, "orphanage and log are mutually exclusive");
        Some(pipe)
    } else {
        None
    };

    let down = svc
        .exists(svdir::DOWN)
        .with_context(|| format!("unable to stat {}/down", dir.display()))?;

    let status = channels::open_status(&control)?;
    let fifo = ControlFifo::open(&control)?;

    let opts = SupervisorOptions {
        has_log: log_pipe.is_some(),
        orphanage,
        down,
        timing: cfg.timing(),
    };
    let launcher = UnixLauncher::new(dir.display().to_string(), log_pipe);
    let mut sv = Supervisor::new(launcher, svc, Box::new(status), opts);
    sv.announce();

    let _ok = channels::open_ok(&control)?;
    let mut wakeups = Wakeups::install()?;

    sv_event(
        "boot",
        None,
        format!(
            "{} dir={} control={} log={} orphanage={orphanage} down={down}",
            build_info::banner(),
            abs_dir.display(),
            control.display(),
            sv.has_log(),
        ),
    );

    sv.start_initial();
    event_loop::run(&mut sv, &fifo, &mut wakeups, cfg.timing().wait_deadline).await;
    sv.announce();
    sv_event("shutdown", None, "all services down; exiting");
    Ok(())
}

#[cfg(target_os = "linux")]
fn set_subreaper() -> anyhow::Result<()> {
    nix::sys::prctl::set_child_subreaper(true).context("could not set subreaper attribute")
}

#[cfg(not(target_os = "linux"))]
fn set_subreaper() -> anyhow::Result<()> {
    anyhow::bail!("could not set subreaper attribute: unsupported on this platform")
}
