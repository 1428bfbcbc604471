use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

/// Files of the service directory contract.
pub const RUN: &str = "run";
pub const START: &str = "start";
pub const STOP: &str = "stop";
pub const LOG: &str = "log";
pub const NOTIFY: &str = "notify";
pub const DOWN: &str = "down";
pub const NO_SETSID: &str = "no-setsid";
pub const ORPHANAGE: &str = "orphanage";

/// Read-only view of the files a service directory may contain.
///
/// `Ok(false)` means "known absent". Any other error is passed through so callers can
/// decide whether an unreadable entry counts as present.
pub trait ServiceDir {
    fn exists(&self, name: &str) -> io::Result<bool>;
    /// Regular file with the owner execute bit set.
    fn is_executable(&self, name: &str) -> io::Result<bool>;
}

/// The real directory. The supervisor chdirs into the service directory at startup,
/// so the default root is `.`.
#[derive(Debug, Clone)]
pub struct FsServiceDir {
    root: PathBuf,
}

impl Default for FsServiceDir {
    fn default() -> Self {
        Self::new(".")
    }
}

impl FsServiceDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn absent_is_false(r: io::Result<std::fs::Metadata>) -> io::Result<Option<std::fs::Metadata>> {
    match r {
        Ok(m) => Ok(Some(m)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

impl ServiceDir for FsServiceDir {
    fn exists(&self, name: &str) -> io::Result<bool> {
        Ok(absent_is_false(std::fs::metadata(self.root.join(name)))?.is_some())
    }

    fn is_executable(&self, name: &str) -> io::Result<bool> {
        Ok(absent_is_false(std::fs::metadata(self.root.join(name)))?
            .is_some_and(|m| m.is_file() && m.permissions().mode() & 0o100 != 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn probes_follow_the_contract() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FsServiceDir::new(tmp.path());

        fs::write(tmp.path().join(RUN), "#!/bin/sh\n").unwrap();
        fs::write(tmp.path().join(DOWN), "").unwrap();
        fs::write(tmp.path().join(STOP), "#!/bin/sh\n").unwrap();
        fs::set_permissions(tmp.path().join(STOP), fs::Permissions::from_mode(0o755)).unwrap();
        fs::create_dir(tmp.path().join(LOG)).unwrap();

        assert!(dir.exists(RUN).unwrap());
        assert!(!dir.is_executable(RUN).unwrap());
        assert!(dir.is_executable(STOP).unwrap());
        assert!(dir.exists(DOWN).unwrap());
        assert!(!dir.exists(START).unwrap());
        assert!(!dir.is_executable(NOTIFY).unwrap());
        // a directory is never an executable script
        assert!(!dir.is_executable(LOG).unwrap());
    }
}
