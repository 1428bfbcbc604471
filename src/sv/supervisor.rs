use crate::sv::config::Timing;
use crate::sv::events::sv_event;
use crate::sv::launcher::{LaunchError, LaunchSpec, ProcessOps, Wiring};
use crate::sv::notify::{notify_spec, Event};
use crate::sv::service::{Role, ServiceSlot};
use crate::sv::status::{self, StatusRecord, StatusSink, SvStatus, Timestamp};
use crate::sv::svdir::{self, ServiceDir};
use nix::sys::signal::Signal;
use nix::unistd::Pid;

/// How a child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Code(i32),
    Signal(Signal),
}

impl Exit {
    pub fn crashed(&self) -> bool {
        matches!(self, Exit::Signal(_))
    }
}

/// Startup facts about the service directory.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorOptions {
    /// An executable `log` was found and its pipe exists.
    pub has_log: bool,
    /// `orphanage` was present and the subreaper attribute is set.
    pub orphanage: bool,
    /// `down` was present: neither slot is started automatically.
    pub down: bool,
    pub timing: Timing,
}

/// The per-directory supervisor: both slots, the process-wide flags and the OS seams.
///
/// Every operation runs to completion on the caller's thread; the only suspension
/// points are the deliberate pauses delegated to [`ProcessOps::pause`].
pub struct Supervisor<P: ProcessOps, D: ServiceDir> {
    pub(crate) ops: P,
    pub(crate) dir: D,
    status_out: Box<dyn StatusSink>,
    pub(crate) main: ServiceSlot,
    pub(crate) log: ServiceSlot,
    pub(crate) has_log: bool,
    pub(crate) orphanage: bool,
    pub(crate) exiting: bool,
    pub(crate) first_run: bool,
    /// Script last launched for main; names main in notify calls.
    pub(crate) main_script: &'static str,
    /// Exit of the main leader while its group lives on as an orphanage.
    pub(crate) orphan_exit: Option<Exit>,
    /// Slot whose launch failed at fork time and should be tried again.
    pub(crate) retry: Option<Role>,
    pub(crate) timing: Timing,
}

impl<P: ProcessOps, D: ServiceDir> Supervisor<P, D> {
    pub fn new(ops: P, dir: D, status_out: Box<dyn StatusSink>, opts: SupervisorOptions) -> Self {
        Self {
            ops,
            dir,
            status_out,
            main: ServiceSlot::new(Role::Main, !opts.down),
            log: ServiceSlot::new(Role::Log, opts.has_log && !opts.down),
            has_log: opts.has_log,
            orphanage: opts.orphanage,
            exiting: false,
            first_run: true,
            main_script: svdir::RUN,
            orphan_exit: None,
            retry: None,
            timing: opts.timing,
        }
    }

    pub fn slot(&self, role: Role) -> &ServiceSlot {
        match role {
            Role::Main => &self.main,
            Role::Log => &self.log,
        }
    }

    pub(crate) fn slot_mut(&mut self, role: Role) -> &mut ServiceSlot {
        match role {
            Role::Main => &mut self.main,
            Role::Log => &mut self.log,
        }
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting
    }

    pub fn has_log(&self) -> bool {
        self.has_log
    }

    /// Exit requested and nothing left alive in either slot.
    pub fn finished(&self) -> bool {
        self.exiting && self.main.pid.is_none() && self.log.pid.is_none()
    }

    pub fn retry_pending(&self) -> bool {
        self.retry.is_some()
    }

    pub fn records(&self) -> Vec<StatusRecord> {
        let mut out = vec![self.main.record()];
        if self.has_log {
            out.push(self.log.record());
        }
        out
    }

    /// Rewrite the status snapshot.
    pub fn announce(&mut self) {
        let records = self.records();
        status::publish(self.status_out.as_mut(), &records);
    }

    /// Stamp a transition, tell `./notify` about it when present, and publish.
    pub(crate) fn pid_change(&mut self, role: Role, event: Option<Event>, code: i32, pid: Option<Pid>) {
        self.slot_mut(role).last_change = Timestamp::now();
        if let Some(event) = event {
            if matches!(self.dir.is_executable(svdir::NOTIFY), Ok(true)) {
                let name = match role {
                    Role::Log => svdir::LOG,
                    Role::Main => self.main_script,
                };
                let spec = notify_spec(name, event, pid, code, self.new_session());
                let _ = self.launch(None, &spec);
            }
        }
        self.announce();
    }

    fn new_session(&self) -> bool {
        matches!(self.dir.exists(svdir::NO_SETSID), Ok(false))
    }

    /// Fork and exec `spec`, attributing the child to `role` when given.
    ///
    /// A fork failure stalls the whole process for the backoff delay and marks the
    /// slot for a retry on a later iteration.
    pub(crate) fn launch(&mut self, role: Option<Role>, spec: &LaunchSpec) -> Result<Pid, LaunchError> {
        match self.ops.spawn(spec) {
            Ok(pid) => {
                if let Some(role) = role {
                    let slot = self.slot_mut(role);
                    slot.pid = Some(pid);
                    slot.paused = false;
                }
                Ok(pid)
            }
            Err(e @ LaunchError::Fork(_)) => {
                tracing::warn!(
                    err = %e,
                    backoff_ms = self.timing.fork_backoff.as_millis() as u64,
                    "unable to fork for {}, sleeping",
                    spec.argv.first().map(String::as_str).unwrap_or("?")
                );
                self.ops.pause(self.timing.fork_backoff);
                if role.is_some() {
                    self.retry = role;
                }
                Err(e)
            }
            Err(e) => {
                tracing::warn!(err = %e, "unable to launch {:?}", spec.argv);
                Err(e)
            }
        }
    }

    fn script_spec(&self, script: &str, wiring: Wiring) -> LaunchSpec {
        LaunchSpec {
            argv: vec![format!("./{script}")],
            wiring,
            new_session: self.new_session(),
        }
    }

    pub fn try_start(&mut self, role: Role) {
        let spec = match role {
            Role::Log => {
                self.log.status = SvStatus::Running;
                self.script_spec(svdir::LOG, Wiring::PipeFromStdin)
            }
            Role::Main => {
                if self.first_run && matches!(self.dir.is_executable(svdir::START), Ok(false)) {
                    self.first_run = false;
                }
                if !self.first_run && matches!(self.dir.exists(svdir::RUN), Ok(false)) {
                    // Nothing to supervise: inert by intent.
                    self.main.want_persistent = false;
                    self.main.status = SvStatus::Started;
                    sv_event("start", Some(role), "no run script; marked started");
                    self.announce();
                    return;
                }
                let (script, status) = if self.first_run {
                    (svdir::START, SvStatus::Starting)
                } else {
                    (svdir::RUN, SvStatus::Running)
                };
                self.main_script = script;
                self.main.status = status;
                self.script_spec(script, Wiring::PipeToStdout)
            }
        };
        let Ok(pid) = self.launch(Some(role), &spec) else {
            return;
        };
        sv_event("start", Some(role), format!("pid={pid} argv0={}", spec.argv[0]));
        self.pid_change(role, Some(Event::Start), 0, Some(pid));
        self.ops.pause(self.timing.spawn_throttle);
    }

    pub fn try_stop(&mut self, role: Role) {
        let stop_script = role == Role::Main
            && !self.slot(role).ran_stop
            && matches!(self.dir.is_executable(svdir::STOP), Ok(true));
        if !stop_script {
            let slot = self.slot_mut(role);
            slot.ran_stop = true;
            slot.status = SvStatus::Stopped;
            self.announce();
            return;
        }
        self.main_script = svdir::STOP;
        let spec = self.script_spec(svdir::STOP, Wiring::PipeToStdout);
        let Ok(pid) = self.launch(Some(Role::Main), &spec) else {
            return;
        };
        self.main.ran_stop = true;
        sv_event("stop", Some(role), format!("pid={pid} argv0=./stop"));
        self.pid_change(role, Some(Event::Stop), 0, Some(pid));
        self.ops.pause(self.timing.spawn_throttle);
    }

    /// Deliver `sig` to the slot's process, or its group when `group` is set.
    /// An orphaned main only has a group left to address.
    pub fn kill_target(&mut self, role: Role, group: bool, sig: Signal) {
        let slot = self.slot(role);
        let Some(pid) = slot.pid else {
            return;
        };
        if slot.status == SvStatus::Orphaned && !group {
            return;
        }
        if let Err(e) = self.ops.signal(pid, group, sig) {
            tracing::debug!(service = role.as_str(), %pid, ?sig, group, err = %e, "signal delivery failed");
        }
    }

    /// TERM then CONT, so a paused process wakes up to die.
    pub fn stop_now(&mut self, role: Role, group: bool) {
        self.kill_target(role, group, Signal::SIGTERM);
        self.kill_target(role, group, Signal::SIGCONT);
        let slot = self.slot_mut(role);
        slot.paused = false;
        slot.status = SvStatus::Stopping;
        slot.ran_stop = false;
    }

    /// Initial starts, log first so main's output has a reader.
    pub fn start_initial(&mut self) {
        if self.has_log && (!self.log.want_persistent || self.log.want_up) {
            self.try_start(Role::Log);
        }
        if !self.main.want_persistent || self.main.want_up {
            self.try_start(Role::Main);
        }
    }

    /// The control FIFO was unlinked: kill both process groups outright and exit.
    pub fn force_exit(&mut self) {
        for role in [Role::Main, Role::Log] {
            if let Some(pid) = self.slot(role).pid {
                let _ = self.ops.signal(pid, true, Signal::SIGKILL);
            }
        }
        if !self.exiting {
            sv_event("control", None, "control fifo removed; killing all and exiting");
        }
        self.exiting = true;
    }

    /// Once main is fully stopped during exit, take the log service down too.
    pub fn stop_log_if_main_done(&mut self) {
        if self.exiting
            && self.main.status == SvStatus::Stopped
            && matches!(self.log.status, SvStatus::Running | SvStatus::Started)
        {
            self.stop_now(Role::Log, false);
        }
    }
}
