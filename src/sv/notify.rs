use crate::sv::launcher::{LaunchSpec, Wiring};
use nix::unistd::Pid;

/// State-changing events reported to `./notify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start,
    Stop,
    Exit,
    Killed,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Start => "start",
            Event::Stop => "stop",
            Event::Exit => "exit",
            Event::Killed => "killed",
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `./notify ROLE EVENT PID CODE`, inheriting the supervisor's descriptors.
///
/// `role` is `log` for the log service, otherwise the script name last run for main.
pub fn notify_spec(role: &str, event: Event, pid: Option<Pid>, code: i32, new_session: bool) -> LaunchSpec {
    LaunchSpec {
        argv: vec![
            "./notify".to_string(),
            role.to_string(),
            event.to_string(),
            pid.map(|p| p.as_raw()).unwrap_or(0).to_string(),
            code.to_string(),
        ],
        wiring: Wiring::Inherit,
        new_session,
    }
}
