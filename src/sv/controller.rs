use crate::sv::events::sv_event;
use crate::sv::launcher::ProcessOps;
use crate::sv::service::Role;
use crate::sv::status::SvStatus;
use crate::sv::supervisor::Supervisor;
use crate::sv::svdir::ServiceDir;
use nix::sys::signal::Signal;

/// One control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `+`: signals that follow go to the whole process group.
    Group,
    /// `=`: signals that follow go to the single process.
    Single,
    /// `L`: following commands target the log slot.
    Log,
    /// `l`: following commands target the main slot.
    Main,
    Down,
    Up,
    Once,
    Signal(Signal),
    Pause,
    Continue,
    Exit,
}

const SIGNAL_LETTERS: [(u8, Signal); 9] = [
    (b'a', Signal::SIGALRM),
    (b'h', Signal::SIGHUP),
    (b'k', Signal::SIGKILL),
    (b't', Signal::SIGTERM),
    (b'i', Signal::SIGINT),
    (b'q', Signal::SIGQUIT),
    (b'1', Signal::SIGUSR1),
    (b'2', Signal::SIGUSR2),
    (b'w', Signal::SIGWINCH),
];

impl Command {
    pub fn from_byte(b: u8) -> Option<Self> {
        let cmd = match b {
            b'+' => Command::Group,
            b'=' => Command::Single,
            b'L' => Command::Log,
            b'l' => Command::Main,
            b'd' => Command::Down,
            b'u' => Command::Up,
            b'o' => Command::Once,
            b'p' => Command::Pause,
            b'c' => Command::Continue,
            b'x' => Command::Exit,
            _ => {
                let (_, sig) = SIGNAL_LETTERS.iter().find(|(l, _)| *l == b)?;
                Command::Signal(*sig)
            }
        };
        Some(cmd)
    }

    /// `None` for a signal with no control letter.
    pub fn to_byte(self) -> Option<u8> {
        let b = match self {
            Command::Group => b'+',
            Command::Single => b'=',
            Command::Log => b'L',
            Command::Main => b'l',
            Command::Down => b'd',
            Command::Up => b'u',
            Command::Once => b'o',
            Command::Pause => b'p',
            Command::Continue => b'c',
            Command::Exit => b'x',
            Command::Signal(sig) => return letter_for(sig),
        };
        Some(b)
    }
}

fn letter_for(sig: Signal) -> Option<u8> {
    SIGNAL_LETTERS.iter().find(|(_, s)| *s == sig).map(|(l, _)| *l)
}

/// A signal the control alphabet can carry, by name such as `HUP`, `SIGHUP` or `usr1`.
pub fn signal_named(name: &str) -> Option<Signal> {
    let upper = name.to_ascii_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    let sig: Signal = full.parse().ok()?;
    letter_for(sig).map(|_| sig)
}

impl<P: ProcessOps, D: ServiceDir> Supervisor<P, D> {
    /// Apply a batch of control bytes in order. Each batch starts targeting the
    /// main slot's single process; unknown bytes are skipped.
    pub fn apply_commands(&mut self, bytes: &[u8]) {
        let mut role = Role::Main;
        let mut group = false;
        for &b in bytes {
            let Some(cmd) = Command::from_byte(b) else {
                tracing::debug!(byte = b, "ignoring unknown control byte");
                continue;
            };
            match cmd {
                Command::Group => group = true,
                Command::Single => group = false,
                Command::Log => role = Role::Log,
                Command::Main => role = Role::Main,
                Command::Exit => {
                    sv_event("control", None, "exit requested");
                    self.exiting = true;
                    self.announce();
                }
                _ if role == Role::Log && !self.has_log => {
                    tracing::debug!(?cmd, "no log service; ignoring");
                }
                _ => self.apply_to_slot(role, group, cmd),
            }
        }
    }

    fn apply_to_slot(&mut self, role: Role, group: bool, cmd: Command) {
        match cmd {
            Command::Up => {
                sv_event("control", Some(role), "want up");
                if role == Role::Main {
                    // A service that was down runs its start script again.
                    self.first_run = !self.main.want_up;
                }
                let slot = self.slot_mut(role);
                slot.want_persistent = true;
                slot.want_up = true;
                let idle = !slot.is_running();
                if idle {
                    slot.status = SvStatus::Starting;
                }
                self.announce();
                if idle {
                    self.try_start(role);
                }
            }
            Command::Down => {
                sv_event("control", Some(role), "want down");
                let slot = self.slot_mut(role);
                slot.want_persistent = true;
                slot.want_up = false;
                if slot.is_running() {
                    self.stop_now(role, group);
                } else {
                    self.try_stop(role);
                }
                self.announce();
            }
            Command::Once => {
                self.slot_mut(role).want_persistent = false;
                self.announce();
                if !self.slot(role).is_running() {
                    self.try_start(role);
                }
            }
            Command::Pause => {
                sv_event("pause", Some(role), if group { "STOP to group" } else { "STOP" });
                let slot = self.slot_mut(role);
                slot.paused = slot.is_running();
                self.announce();
                self.kill_target(role, group, Signal::SIGSTOP);
            }
            Command::Continue => {
                sv_event("resume", Some(role), if group { "CONT to group" } else { "CONT" });
                self.slot_mut(role).paused = false;
                self.announce();
                self.kill_target(role, group, Signal::SIGCONT);
            }
            Command::Signal(sig) => self.kill_target(role, group, sig),
            Command::Group | Command::Single | Command::Log | Command::Main | Command::Exit => {}
        }
    }
}
