use crate::sv::channels::{CONTROL, OK, STATUS};
use crate::sv::config::{load_supervise_config, supervisedir_from_env};
use crate::sv::controller::{signal_named, Command};
use crate::sv::service::Role;
use crate::sv::status::{decode_file, StatusRecord, Want};
use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use nix::errno::Errno;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "svctl", version, about = "control client for supervise")]
pub struct SvctlArgs {
    /// Service directory
    #[arg(short = 'd', long = "dir", default_value = ".")]
    pub dir: PathBuf,

    /// Same config file the supervisor was started with (for `control_dir`)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Address the log service instead of the main one
    #[arg(long = "log")]
    pub log: bool,

    /// Deliver signals to the whole process group
    #[arg(long = "group")]
    pub group: bool,

    #[command(subcommand)]
    pub cmd: SvCmd,
}

#[derive(Debug, Subcommand)]
pub enum SvCmd {
    /// Keep the service up, restarting it whenever it exits
    Up,
    /// Stop the service and keep it down
    Down,
    /// Run the service once without restarting it
    Once,
    /// Send STOP
    Pause,
    /// Send CONT
    Cont,
    /// Ask the supervisor to exit once the service is down
    Exit,
    /// Send a signal: alrm, hup, kill, term, int, quit, usr1, usr2 or winch
    Signal { name: String },
    /// Write raw control bytes
    Send { bytes: String },
    /// Show the published status
    Status {
        /// Output format: text (default) or json
        #[arg(long = "format", default_value = "text")]
        format: OutputFormat,
    },
    /// Succeed iff a supervisor is running for the directory
    Check,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Control bytes for a command, with the slot and targeting prefixes.
pub fn command_bytes(cmd: &SvCmd, log: bool, group: bool) -> anyhow::Result<Vec<u8>> {
    let mut cmds = Vec::new();
    if log {
        cmds.push(Command::Log);
    }
    if group {
        cmds.push(Command::Group);
    }
    let mut raw: &[u8] = &[];
    match cmd {
        SvCmd::Up => cmds.push(Command::Up),
        SvCmd::Down => cmds.push(Command::Down),
        SvCmd::Once => cmds.push(Command::Once),
        SvCmd::Pause => cmds.push(Command::Pause),
        SvCmd::Cont => cmds.push(Command::Continue),
        SvCmd::Exit => cmds.push(Command::Exit),
        SvCmd::Signal { name } => {
            let sig = signal_named(name).with_context(|| format!("unsupported signal {name:?}"))?;
            cmds.push(Command::Signal(sig));
        }
        SvCmd::Send { bytes } => raw = bytes.as_bytes(),
        SvCmd::Status { .. } | SvCmd::Check => anyhow::bail!("{cmd:?} sends nothing"),
    }
    let mut out = cmds
        .into_iter()
        .map(|c| c.to_byte().with_context(|| format!("{c:?} has no control letter")))
        .collect::<anyhow::Result<Vec<u8>>>()?;
    out.extend_from_slice(raw);
    Ok(out)
}

fn control_dir(args: &SvctlArgs) -> anyhow::Result<PathBuf> {
    let cfg = load_supervise_config(args.config.as_deref())?;
    let abs = std::fs::canonicalize(&args.dir)
        .with_context(|| format!("unable to resolve {}", args.dir.display()))?;
    let base = cfg.control_path(&abs, supervisedir_from_env().as_deref());
    Ok(if base.is_absolute() { base } else { abs.join(base) })
}

/// Open a FIFO for writing without waiting for a reader.
fn open_fifo_writer(path: &Path) -> anyhow::Result<std::fs::File> {
    match OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
    {
        Ok(f) => Ok(f),
        Err(e) if e.raw_os_error() == Some(Errno::ENXIO as i32) => {
            anyhow::bail!("supervise not running ({})", path.display())
        }
        Err(e) => Err(e).with_context(|| format!("unable to open {}", path.display())),
    }
}

pub fn send_control(control_dir: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let path = control_dir.join(CONTROL);
    let mut f = open_fifo_writer(&path)?;
    f.write_all(bytes)
        .with_context(|| format!("unable to write {}", path.display()))
}

pub fn check_running(control_dir: &Path) -> anyhow::Result<()> {
    open_fifo_writer(&control_dir.join(OK)).map(|_| ())
}

#[derive(Debug, Serialize)]
pub struct ServiceView {
    pub service: &'static str,
    #[serde(flatten)]
    pub record: StatusRecord,
    pub since_unix: i64,
    pub seconds: i64,
}

pub fn service_views(records: Vec<StatusRecord>, now_unix: i64) -> Vec<ServiceView> {
    records
        .into_iter()
        .zip([Role::Main, Role::Log])
        .map(|(record, role)| {
            let since_unix = record.since.unix_secs();
            ServiceView {
                service: role.as_str(),
                seconds: (now_unix - since_unix).max(0),
                since_unix,
                record,
            }
        })
        .collect()
}

pub fn render_text(v: &ServiceView) -> String {
    let r = &v.record;
    let mut line = format!("{}: {}", v.service, r.status);
    if r.pid != 0 {
        line.push_str(&format!(" (pid {})", r.pid));
    }
    line.push_str(&format!(" {} seconds", v.seconds));
    if r.paused {
        line.push_str(", paused");
    }
    match r.want {
        Some(Want::Up) => line.push_str(", want up"),
        Some(Want::Down) => line.push_str(", want down"),
        None => {}
    }
    line
}

pub fn run() -> anyhow::Result<()> {
    let args = SvctlArgs::parse();
    let dir = control_dir(&args)?;
    match &args.cmd {
        SvCmd::Status { format } => {
            let path = dir.join(STATUS);
            let raw = std::fs::read(&path).with_context(|| format!("unable to read {}", path.display()))?;
            let records = decode_file(&raw).with_context(|| format!("unable to decode {}", path.display()))?;
            let views = service_views(records, chrono::Utc::now().timestamp());
            match format {
                OutputFormat::Text => {
                    for v in &views {
                        println!("{}", render_text(v));
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&views)?),
            }
            Ok(())
        }
        SvCmd::Check => check_running(&dir),
        cmd => send_control(&dir, &command_bytes(cmd, args.log, args.group)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sv::status::{SvStatus, Timestamp};

    #[test]
    fn prefixes_and_letters() {
        assert_eq!(command_bytes(&SvCmd::Up, false, false).unwrap(), b"u");
        assert_eq!(command_bytes(&SvCmd::Pause, true, true).unwrap(), b"L+p");
        let sig = SvCmd::Signal { name: "usr2".into() };
        assert_eq!(command_bytes(&sig, false, true).unwrap(), b"+2");
        let bad = SvCmd::Signal { name: "pipe".into() };
        assert!(command_bytes(&bad, false, false).is_err());
        let raw = SvCmd::Send { bytes: "dx".into() };
        assert_eq!(command_bytes(&raw, false, false).unwrap(), b"dx");
        assert!(command_bytes(&SvCmd::Check, false, false).is_err());
    }

    #[test]
    fn text_lines() {
        let rec = StatusRecord {
            since: Timestamp::from_unix(1_000, 0),
            pid: 42,
            paused: true,
            want: Some(Want::Up),
            status: SvStatus::Running,
        };
        let idle = StatusRecord {
            pid: 0,
            paused: false,
            want: None,
            status: SvStatus::Stopped,
            ..rec.clone()
        };
        let views = service_views(vec![rec, idle], 1_012);
        assert_eq!(render_text(&views[0]), "main: running (pid 42) 12 seconds, paused, want up");
        assert_eq!(render_text(&views[1]), "log: stopped 12 seconds");

        let json = serde_json::to_value(&views[0]).unwrap();
        assert_eq!(json["service"], "main");
        assert_eq!(json["status"], "running");
        assert_eq!(json["want"], "up");
        assert_eq!(json["seconds"], 12);
    }

    #[test]
    fn no_reader_means_not_running() {
        let td = tempfile::tempdir().unwrap();
        nix::unistd::mkfifo(&td.path().join(CONTROL), nix::sys::stat::Mode::from_bits_truncate(0o600))
            .unwrap();
        let err = send_control(td.path(), b"u").unwrap_err();
        assert!(err.to_string().contains("not running"));
        let err = check_running(td.path()).unwrap_err();
        assert!(format!("{err:#}").contains("unable to open"));
    }
}
