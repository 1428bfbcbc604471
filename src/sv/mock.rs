//! In-memory stand-ins for the OS seams, used by the state machine tests.

use crate::sv::config::Timing;
use crate::sv::launcher::{LaunchError, LaunchSpec, ProcessOps};
use crate::sv::status::{decode_file, StatusRecord, SvStatus};
use crate::sv::supervisor::{Supervisor, SupervisorOptions};
use crate::sv::svdir::ServiceDir;
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::{self, Cursor, Seek, SeekFrom, Write};
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug)]
pub struct FakeOps {
    pub spawned: Vec<LaunchSpec>,
    /// Pids handed out, in spawn order.
    pub pids: Vec<Pid>,
    next_pid: i32,
    /// Number of upcoming spawns that fail with EAGAIN.
    pub fail_spawns: usize,
    pub signals: Vec<(Pid, bool, Signal)>,
    pub pauses: Vec<Duration>,
    /// Scripted results for `wait_any`; empty means nothing to reap.
    pub waits: VecDeque<nix::Result<WaitStatus>>,
    pub group_waits: VecDeque<nix::Result<WaitStatus>>,
}

impl Default for FakeOps {
    fn default() -> Self {
        Self {
            spawned: Vec::new(),
            pids: Vec::new(),
            next_pid: 100,
            fail_spawns: 0,
            signals: Vec::new(),
            pauses: Vec::new(),
            waits: VecDeque::new(),
            group_waits: VecDeque::new(),
        }
    }
}

impl FakeOps {
    pub fn exit(&mut self, pid: Pid, code: i32) {
        self.waits.push_back(Ok(WaitStatus::Exited(pid, code)));
    }

    pub fn kill(&mut self, pid: Pid, sig: Signal) {
        self.waits.push_back(Ok(WaitStatus::Signaled(pid, sig, false)));
    }
}

impl ProcessOps for FakeOps {
    fn spawn(&mut self, spec: &LaunchSpec) -> Result<Pid, LaunchError> {
        if self.fail_spawns > 0 {
            self.fail_spawns -= 1;
            return Err(LaunchError::Fork(Errno::EAGAIN));
        }
        let pid = Pid::from_raw(self.next_pid);
        self.next_pid += 1;
        self.spawned.push(spec.clone());
        self.pids.push(pid);
        Ok(pid)
    }

    fn signal(&mut self, pid: Pid, group: bool, sig: Signal) -> nix::Result<()> {
        self.signals.push((pid, group, sig));
        Ok(())
    }

    fn wait_any(&mut self) -> nix::Result<WaitStatus> {
        self.waits.pop_front().unwrap_or(Ok(WaitStatus::StillAlive))
    }

    fn wait_group(&mut self, _pgid: Pid) -> nix::Result<WaitStatus> {
        self.group_waits
            .pop_front()
            .unwrap_or(Ok(WaitStatus::StillAlive))
    }

    fn pause(&mut self, d: Duration) {
        self.pauses.push(d);
    }
}

/// Service directory contents by name; `true` marks an executable.
#[derive(Debug, Default, Clone)]
pub struct FakeDir {
    entries: HashMap<String, bool>,
}

impl FakeDir {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exec(mut self, name: &str) -> Self {
        self.entries.insert(name.to_string(), true);
        self
    }

    pub fn file(mut self, name: &str) -> Self {
        self.entries.insert(name.to_string(), false);
        self
    }
}

impl ServiceDir for FakeDir {
    fn exists(&self, name: &str) -> io::Result<bool> {
        Ok(self.entries.contains_key(name))
    }

    fn is_executable(&self, name: &str) -> io::Result<bool> {
        Ok(self.entries.get(name).copied().unwrap_or(false))
    }
}

/// Status file kept in memory, readable after being handed to the supervisor.
/// Every rewind keeps a copy of the snapshot it is about to overwrite.
#[derive(Debug, Clone, Default)]
pub struct SharedStatus {
    file: Rc<RefCell<Cursor<Vec<u8>>>>,
    history: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl SharedStatus {
    pub fn records(&self) -> Vec<StatusRecord> {
        decode_file(self.file.borrow().get_ref()).unwrap()
    }

    /// Main's published status codes, oldest first, without repeats.
    pub fn main_history(&self) -> Vec<SvStatus> {
        let mut out: Vec<SvStatus> = Vec::new();
        let current = self.file.borrow().get_ref().clone();
        for snap in self.history.borrow().iter().chain(std::iter::once(&current)) {
            let st = decode_file(snap).unwrap()[0].status;
            if out.last() != Some(&st) {
                out.push(st);
            }
        }
        out
    }
}

impl Write for SharedStatus {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.borrow_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for SharedStatus {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let mut file = self.file.borrow_mut();
        if pos == SeekFrom::Start(0) && !file.get_ref().is_empty() {
            self.history.borrow_mut().push(file.get_ref().clone());
        }
        file.seek(pos)
    }
}

pub fn harness(dir: FakeDir, has_log: bool, down: bool) -> (Supervisor<FakeOps, FakeDir>, SharedStatus) {
    orphanage_harness(dir, has_log, down, false)
}

pub fn orphanage_harness(
    dir: FakeDir,
    has_log: bool,
    down: bool,
    orphanage: bool,
) -> (Supervisor<FakeOps, FakeDir>, SharedStatus) {
    let status = SharedStatus::default();
    let opts = SupervisorOptions {
        has_log,
        orphanage,
        down,
        timing: Timing::default(),
    };
    let mut sv = Supervisor::new(FakeOps::default(), dir, Box::new(status.clone()), opts);
    sv.announce();
    (sv, status)
}
