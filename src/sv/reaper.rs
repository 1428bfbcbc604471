use crate::sv::events::sv_event;
use crate::sv::launcher::ProcessOps;
use crate::sv::notify::Event;
use crate::sv::service::Role;
use crate::sv::status::SvStatus;
use crate::sv::supervisor::{Exit, Supervisor};
use crate::sv::svdir::ServiceDir;
use nix::errno::Errno;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

/// Terminal wait statuses only; stops and continues are not exits.
fn exit_of(ws: WaitStatus) -> Option<(Pid, Exit)> {
    match ws {
        WaitStatus::Exited(pid, code) => Some((pid, Exit::Code(code))),
        WaitStatus::Signaled(pid, sig, _) => Some((pid, Exit::Signal(sig))),
        _ => None,
    }
}

impl<P: ProcessOps, D: ServiceDir> Supervisor<P, D> {
    /// Drain terminated children until one is attributed to a slot, then react to it.
    ///
    /// At most one slot exit is handled per call. When nothing was attributed, a
    /// launch that previously failed at fork time is retried.
    pub fn reap(&mut self) {
        if !self.reap_one() {
            self.retry_failed_launch();
        }
    }

    fn reap_one(&mut self) -> bool {
        loop {
            if self.main.status == SvStatus::Orphaned {
                if let Some(pgid) = self.main.pid {
                    match self.ops.wait_group(pgid) {
                        Ok(ws) if exit_of(ws).is_some() => continue,
                        Err(Errno::ECHILD) => {
                            let exit = self.orphan_exit.take().unwrap_or(Exit::Code(0));
                            sv_event("reap", Some(Role::Main), format!("orphanage {pgid} emptied"));
                            self.handle_exit(Role::Main, pgid, exit);
                            return true;
                        }
                        Err(Errno::EINTR) => continue,
                        _ => {}
                    }
                }
            }

            let (pid, exit) = match self.ops.wait_any() {
                Ok(WaitStatus::StillAlive) => return false,
                Ok(ws) => match exit_of(ws) {
                    Some(x) => x,
                    None => continue,
                },
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    if e != Errno::ECHILD {
                        tracing::warn!(err = %e, "wait failed");
                    }
                    return false;
                }
            };

            if self.main.pid == Some(pid) {
                if self.orphanage && self.main.status != SvStatus::Orphaned {
                    // The leader is gone but its group may still hold descendants.
                    self.main.status = SvStatus::Orphaned;
                    self.orphan_exit = Some(exit);
                    sv_event("reap", Some(Role::Main), format!("leader {pid} exited; draining its group"));
                    self.announce();
                    continue;
                }
                self.handle_exit(Role::Main, pid, exit);
                return true;
            }
            if self.log.pid == Some(pid) {
                self.handle_exit(Role::Log, pid, exit);
                return true;
            }
            tracing::debug!(%pid, ?exit, "reaped unattributed child");
        }
    }

    fn handle_exit(&mut self, role: Role, pid: Pid, exit: Exit) {
        let was_starting = role == Role::Main && self.main.status == SvStatus::Starting;
        let slot = self.slot_mut(role);
        slot.pid = None;
        slot.paused = false;
        let clean_100 = exit == Exit::Code(100);
        let failed_start = was_starting && exit != Exit::Code(0);
        if failed_start || clean_100 {
            slot.want_up = false;
            slot.status = SvStatus::Failed;
        } else if was_starting {
            // start finished cleanly; run comes next
        } else if !slot.wanted_up() {
            slot.status = SvStatus::Stopped;
        }

        let (event, code) = match exit {
            Exit::Code(c) => (Event::Exit, c),
            Exit::Signal(sig) => (Event::Killed, sig as i32),
        };
        sv_event("reap", Some(role), format!("pid {pid} {event} {code}"));
        self.pid_change(role, Some(event), code, Some(pid));
        self.first_run = false;

        let slot = self.slot(role);
        if slot.wanted_up() || (role == Role::Main && slot.status == SvStatus::Starting) {
            if !self.exiting {
                self.try_start(role);
            }
        } else if slot.status != SvStatus::Failed {
            self.try_stop(role);
        }
    }

    fn retry_failed_launch(&mut self) {
        let Some(role) = self.retry.take() else {
            return;
        };
        let slot = self.slot(role);
        let wanted = slot.wanted_up()
            || !slot.want_persistent
            || (role == Role::Main && slot.status == SvStatus::Starting);
        if slot.pid.is_none() && wanted && !self.exiting {
            sv_event("start", Some(role), "retrying launch after fork failure");
            self.try_start(role);
        }
    }
}
