use crate::sv::channels::ControlFifo;
use crate::sv::launcher::ProcessOps;
use crate::sv::supervisor::Supervisor;
use crate::sv::svdir::ServiceDir;
use anyhow::Context;
use std::time::Duration;
use tokio::signal::unix::{signal as unix_signal, Signal as UnixSignal, SignalKind};
use tokio::time as tokio_time;

/// Signal streams that wake the loop. Handlers only record delivery; all state
/// changes happen on the loop itself.
pub struct Wakeups {
    child: UnixSignal,
    term: UnixSignal,
    int: UnixSignal,
    tstp: UnixSignal,
    cont: UnixSignal,
}

impl Wakeups {
    pub fn install() -> anyhow::Result<Self> {
        Ok(Self {
            child: unix_signal(SignalKind::child()).context("SIGCHLD handler")?,
            term: unix_signal(SignalKind::terminate()).context("SIGTERM handler")?,
            int: unix_signal(SignalKind::interrupt()).context("SIGINT handler")?,
            tstp: unix_signal(SignalKind::from_raw(libc::SIGTSTP)).context("SIGTSTP handler")?,
            cont: unix_signal(SignalKind::from_raw(libc::SIGCONT)).context("SIGCONT handler")?,
        })
    }

    /// Block until something might need attention, returning control bytes that
    /// arrived while waiting. Signals sent to the supervisor become control bytes.
    async fn wait(&mut self, fifo: &ControlFifo, deadline: Duration) -> Vec<u8> {
        tokio::select! {
            _ = self.child.recv() => {}
            _ = self.term.recv() => fifo.inject(b"dx"),
            _ = self.int.recv() => fifo.inject(b"dx"),
            _ = self.tstp.recv() => fifo.inject(b"p"),
            _ = self.cont.recv() => fifo.inject(b"c"),
            r = fifo.readable() => match r {
                Ok(bytes) => return bytes,
                Err(e) => tracing::warn!(err = %e, "control wait failed"),
            },
            _ = tokio_time::sleep(deadline) => {}
        }
        Vec::new()
    }
}

/// Drive the supervisor until an exit was requested and both slots are empty.
pub async fn run<P: ProcessOps, D: ServiceDir>(
    sv: &mut Supervisor<P, D>,
    fifo: &ControlFifo,
    wakeups: &mut Wakeups,
    deadline: Duration,
) {
    loop {
        if sv.finished() {
            break;
        }
        let wait = if sv.retry_pending() {
            Duration::ZERO
        } else {
            deadline
        };
        let mut pending = wakeups.wait(fifo, wait).await;

        sv.reap();

        if fifo.is_unlinked() {
            sv.force_exit();
        }

        pending.extend(fifo.drain());
        if !pending.is_empty() {
            sv.apply_commands(&pending);
        }

        sv.stop_log_if_main_done();
    }
}
