//! The control directory: lock, status file and the two FIFOs.

use anyhow::Context;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use std::fs::{DirBuilder, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use tokio::io::unix::AsyncFd;

pub const LOCK: &str = "lock";
pub const STATUS: &str = "status";
pub const CONTROL: &str = "control";
pub const OK: &str = "ok";

/// Create the control directory (0700). An existing directory is reused.
pub fn create_control_dir(path: &Path) -> anyhow::Result<()> {
    match DirBuilder::new().mode(0o700).create(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e).with_context(|| format!("unable to create {}", path.display())),
    }
}

/// Exclusive, non-blocking advisory lock; held for the supervisor's lifetime.
pub fn acquire_lock(control_dir: &Path) -> anyhow::Result<Flock<File>> {
    let path = control_dir.join(LOCK);
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .mode(0o600)
        .custom_flags(libc::O_NONBLOCK)
        .open(&path)
        .with_context(|| format!("unable to acquire {}", path.display()))?;
    Flock::lock(file, FlockArg::LockExclusiveNonblock)
        .map_err(|(_, errno)| errno)
        .with_context(|| format!("unable to acquire {}", path.display()))
}

/// Truncate (or create) the status file.
pub fn open_status(control_dir: &Path) -> anyhow::Result<File> {
    let path = control_dir.join(STATUS);
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .custom_flags(libc::O_NONBLOCK)
        .open(&path)
        .with_context(|| format!("unable to open {} for writing", path.display()))
}

fn make_fifo(path: &Path) -> anyhow::Result<()> {
    match mkfifo(path, Mode::from_bits_truncate(0o600)) {
        Ok(()) | Err(Errno::EEXIST) => Ok(()),
        Err(e) => Err(e).with_context(|| format!("unable to create {}", path.display())),
    }
}

fn open_fifo_read(path: &Path) -> anyhow::Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .with_context(|| format!("unable to read {}", path.display()))
}

/// Open the readiness FIFO. Holding a reader lets clients probe liveness by
/// opening it for writing without blocking.
pub fn open_ok(control_dir: &Path) -> anyhow::Result<File> {
    let path = control_dir.join(OK);
    make_fifo(&path)?;
    open_fifo_read(&path)
}

/// The command FIFO. The supervisor holds both ends: the write end keeps reads
/// from ever seeing end-of-file and carries commands derived from signals.
#[derive(Debug)]
pub struct ControlFifo {
    path: PathBuf,
    read: AsyncFd<File>,
    write: File,
}

impl ControlFifo {
    /// Must be called from within a tokio runtime.
    pub fn open(control_dir: &Path) -> anyhow::Result<Self> {
        let path = control_dir.join(CONTROL);
        make_fifo(&path)?;
        let read = open_fifo_read(&path)?;
        let write = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .with_context(|| format!("unable to write {}", path.display()))?;
        let read = AsyncFd::new(read).with_context(|| format!("unable to watch {}", path.display()))?;
        Ok(Self { path, read, write })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue bytes behind whatever clients have written.
    pub fn inject(&self, bytes: &[u8]) {
        if let Err(e) = (&self.write).write_all(bytes) {
            tracing::warn!(err = %e, "unable to queue control bytes");
        }
    }

    /// Wait until the FIFO is readable and take everything pending.
    /// Cancel-safe: nothing is read before readiness is reported.
    pub async fn readable(&self) -> io::Result<Vec<u8>> {
        let mut guard = self.read.readable().await?;
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            match guard.try_io(|inner| inner.get_ref().read(&mut buf)) {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => out.extend_from_slice(&buf[..n]),
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => break,
            }
        }
        Ok(out)
    }

    /// Take whatever is pending without waiting.
    pub fn drain(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            match self.read.get_ref().read(&mut buf) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(err = %e, "control read failed");
                    break;
                }
            }
        }
        out
    }

    /// The FIFO was removed from the filesystem.
    pub fn is_unlinked(&self) -> bool {
        match self.read.get_ref().metadata() {
            Ok(m) => m.nlink() == 0,
            Err(_) => false,
        }
    }
}
