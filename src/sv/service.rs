use crate::sv::status::{StatusRecord, SvStatus, Timestamp, Want};
use nix::unistd::Pid;

/// Which supervised program a slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Main,
    Log,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Main => "main",
            Role::Log => "log",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired and actual state of one supervised role.
#[derive(Debug, Clone)]
pub struct ServiceSlot {
    pub role: Role,
    pub pid: Option<Pid>,
    pub status: SvStatus,
    /// Restart whenever the process exits.
    pub want_persistent: bool,
    /// Desired direction; only meaningful together with `want_persistent`.
    pub want_up: bool,
    pub paused: bool,
    pub last_change: Timestamp,
    /// The stop script already ran in this stop cycle.
    pub ran_stop: bool,
}

impl ServiceSlot {
    pub fn new(role: Role, want_up: bool) -> Self {
        Self {
            role,
            pid: None,
            status: SvStatus::Stopped,
            want_persistent: true,
            want_up,
            paused: false,
            last_change: Timestamp::now(),
            ran_stop: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.pid.is_some()
    }

    /// Persistent and up: restart on every exit.
    pub fn wanted_up(&self) -> bool {
        self.want_persistent && self.want_up
    }

    pub fn record(&self) -> StatusRecord {
        StatusRecord {
            since: self.last_change,
            pid: self.pid.map(|p| p.as_raw() as u32).unwrap_or(0),
            paused: self.pid.is_some() && self.paused,
            want: self.want_persistent.then_some(if self.want_up {
                Want::Up
            } else {
                Want::Down
            }),
            status: self.status,
        }
    }
}
