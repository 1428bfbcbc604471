use nix::errno::Errno;
use nix::sys::signal::{self, kill, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{dup2, execv, fork, setsid, ForkResult, Pid};
use std::ffi::{CString, NulError};
use std::os::fd::{AsRawFd, OwnedFd};
use std::time::Duration;

/// Where a spawned program's output or input is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wiring {
    /// Inherit the supervisor's descriptors.
    Inherit,
    /// Log pipe write end on descriptor 1 (main service scripts).
    PipeToStdout,
    /// Log pipe read end on descriptor 0 (the log service).
    PipeFromStdin,
}

/// One program to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// argv[0] is the path executed, relative to the service directory.
    pub argv: Vec<String>,
    pub wiring: Wiring,
    /// Start a new session in the child.
    pub new_session: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("unable to fork: {0}")]
    Fork(Errno),
    #[error("argument contains a NUL byte: {0}")]
    Command(#[from] NulError),
    #[error("empty argv")]
    EmptyArgv,
}

/// OS side of supervision: spawning, signalling and reaping children, plus the
/// deliberate blocking pauses. The state machine only ever talks to this trait.
pub trait ProcessOps {
    fn spawn(&mut self, spec: &LaunchSpec) -> Result<Pid, LaunchError>;
    /// Deliver `sig` to `pid`, or to the process group `pid` leads when `group` is set.
    fn signal(&mut self, pid: Pid, group: bool, sig: Signal) -> nix::Result<()>;
    /// Non-blocking wait for any child.
    fn wait_any(&mut self) -> nix::Result<WaitStatus>;
    /// Non-blocking wait for any member of process group `pgid`.
    fn wait_group(&mut self, pgid: Pid) -> nix::Result<WaitStatus>;
    /// Block the whole process.
    fn pause(&mut self, d: Duration);
}

/// fork/exec launcher. Holds the log pipe (if any) for the supervisor's lifetime.
#[derive(Debug)]
pub struct UnixLauncher {
    log_pipe: Option<(OwnedFd, OwnedFd)>,
    /// Service directory, for the child's exec-failure message.
    dir: String,
}

impl UnixLauncher {
    pub fn new(dir: impl Into<String>, log_pipe: Option<(OwnedFd, OwnedFd)>) -> Self {
        Self {
            log_pipe,
            dir: dir.into(),
        }
    }
}

fn child_reset_signals() {
    for sig in [
        Signal::SIGCHLD,
        Signal::SIGINT,
        Signal::SIGTERM,
        Signal::SIGTSTP,
        Signal::SIGCONT,
        Signal::SIGPIPE,
    ] {
        // SAFETY: resetting to the default disposition installs no handler.
        let _ = unsafe { signal::signal(sig, SigHandler::SigDfl) };
    }
    let mut set = SigSet::empty();
    set.add(Signal::SIGCHLD);
    let _ = signal::sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&set), None);
}

/// Report and terminate a forked child that could not exec. Raw writes only: a
/// thread of the parent may have held the stderr lock at fork time.
fn child_die(prefix: &str, err: Errno) -> ! {
    for part in [prefix, err.desc(), "\n"] {
        // SAFETY: writing a valid buffer to descriptor 2.
        let _ = unsafe { libc::write(2, part.as_ptr().cast(), part.len()) };
    }
    // SAFETY: leave the forked child without running the parent's destructors.
    unsafe { libc::_exit(111) }
}

impl ProcessOps for UnixLauncher {
    fn spawn(&mut self, spec: &LaunchSpec) -> Result<Pid, LaunchError> {
        // Everything that allocates happens before the fork.
        let argv = spec
            .argv
            .iter()
            .map(|a| CString::new(a.as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;
        let Some(path) = argv.first() else {
            return Err(LaunchError::EmptyArgv);
        };
        let script = spec.argv[0].trim_start_matches("./");
        let exec_failed = format!("supervise: fatal: unable to start {}/{script}: ", self.dir);
        let wire_failed = format!(
            "supervise: fatal: unable to wire log pipe for {}/{script}: ",
            self.dir
        );
        let pipe = match spec.wiring {
            Wiring::Inherit => None,
            _ => self
                .log_pipe
                .as_ref()
                .map(|(r, w)| (r.as_raw_fd(), w.as_raw_fd())),
        };

        // SAFETY: the supervisor runs on a single thread; the child only resets
        // signal state, rewires descriptors and execs.
        match unsafe { fork() } {
            Err(e) => Err(LaunchError::Fork(e)),
            Ok(ForkResult::Parent { child }) => Ok(child),
            Ok(ForkResult::Child) => {
                child_reset_signals();
                if spec.new_session {
                    let _ = setsid();
                }
                if let Some((r, w)) = pipe {
                    let wired = match spec.wiring {
                        Wiring::PipeFromStdin => dup2(r, 0),
                        _ => dup2(w, 1),
                    };
                    let _ = nix::unistd::close(r);
                    let _ = nix::unistd::close(w);
                    if let Err(e) = wired {
                        child_die(&wire_failed, e);
                    }
                }
                let err = match execv(path, &argv) {
                    Err(e) => e,
                    Ok(never) => match never {},
                };
                child_die(&exec_failed, err)
            }
        }
    }

    fn signal(&mut self, pid: Pid, group: bool, sig: Signal) -> nix::Result<()> {
        let target = if group {
            Pid::from_raw(-pid.as_raw())
        } else {
            pid
        };
        kill(target, sig)
    }

    fn wait_any(&mut self) -> nix::Result<WaitStatus> {
        waitpid(None, Some(WaitPidFlag::WNOHANG))
    }

    fn wait_group(&mut self, pgid: Pid) -> nix::Result<WaitStatus> {
        waitpid(Pid::from_raw(-pgid.as_raw()), Some(WaitPidFlag::WNOHANG))
    }

    fn pause(&mut self, d: Duration) {
        std::thread::sleep(d);
    }
}
