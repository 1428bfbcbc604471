use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment override for where control directories live.
pub const SUPERVISEDIR_ENV: &str = "SUPERVISEDIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuperviseConfig {
    /// Control directory name, relative to the service directory.
    #[serde(default = "default_control_dir")]
    pub control_dir: PathBuf,

    /// Upper bound on one event-loop wait.
    #[serde(default = "default_wait_deadline_ms")]
    pub wait_deadline_ms: u64,

    /// Full-process pause after every successful spawn of start/run/stop/log.
    #[serde(default = "default_spawn_throttle_ms")]
    pub spawn_throttle_ms: u64,

    /// Full-process pause after a failed fork.
    #[serde(default = "default_fork_backoff_ms")]
    pub fork_backoff_ms: u64,

    /// tracing filter used when SUPERVISE_LOG is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for SuperviseConfig {
    fn default() -> Self {
        Self {
            control_dir: default_control_dir(),
            wait_deadline_ms: default_wait_deadline_ms(),
            spawn_throttle_ms: default_spawn_throttle_ms(),
            fork_backoff_ms: default_fork_backoff_ms(),
            log_level: default_log_level(),
        }
    }
}

fn default_control_dir() -> PathBuf {
    "supervise".into()
}
fn default_wait_deadline_ms() -> u64 {
    10_000
}
fn default_spawn_throttle_ms() -> u64 {
    1_000
}
fn default_fork_backoff_ms() -> u64 {
    60_000
}
fn default_log_level() -> String {
    "info".to_string()
}

/// The delays the supervisor deliberately blocks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub wait_deadline: Duration,
    pub spawn_throttle: Duration,
    pub fork_backoff: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        SuperviseConfig::default().timing()
    }
}

impl SuperviseConfig {
    pub fn timing(&self) -> Timing {
        Timing {
            wait_deadline: Duration::from_millis(self.wait_deadline_ms),
            spawn_throttle: Duration::from_millis(self.spawn_throttle_ms),
            fork_backoff: Duration::from_millis(self.fork_backoff_ms),
        }
    }

    /// Where `lock`, `status`, `control` and `ok` live for `service_dir`.
    ///
    /// With `SUPERVISEDIR` set, every service gets a flat entry under it named after its
    /// absolute path (`/srv/web` becomes `srv:web`); otherwise the control directory sits
    /// inside the service directory.
    pub fn control_path(&self, service_dir: &Path, supervisedir: Option<&Path>) -> PathBuf {
        match supervisedir {
            Some(base) => {
                let flat = service_dir
                    .to_string_lossy()
                    .trim_start_matches('/')
                    .replace('/', ":");
                base.join(flat)
            }
            None => service_dir.join(&self.control_dir),
        }
    }
}

/// Read `SUPERVISEDIR`, ignoring an empty value.
pub fn supervisedir_from_env() -> Option<PathBuf> {
    std::env::var_os(SUPERVISEDIR_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

pub fn parse_supervise_config(raw: &str) -> anyhow::Result<SuperviseConfig> {
    // An empty document deserializes to unit, not to an empty map.
    if raw.trim().is_empty() {
        return Ok(SuperviseConfig::default());
    }
    let cfg: SuperviseConfig = serde_yaml::from_str(raw)?;
    anyhow::ensure!(cfg.wait_deadline_ms > 0, "wait_deadline_ms must be positive");
    anyhow::ensure!(
        !cfg.control_dir.as_os_str().is_empty(),
        "control_dir must not be empty"
    );
    Ok(cfg)
}

pub fn load_supervise_config(config_path: Option<&Path>) -> anyhow::Result<SuperviseConfig> {
    let Some(path) = config_path else {
        return Ok(SuperviseConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
    parse_supervise_config(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse config {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_delays() {
        let t = Timing::default();
        assert_eq!(t.wait_deadline, Duration::from_secs(10));
        assert_eq!(t.spawn_throttle, Duration::from_secs(1));
        assert_eq!(t.fork_backoff, Duration::from_secs(60));
        assert_eq!(SuperviseConfig::default().control_dir, PathBuf::from("supervise"));
    }

    #[test]
    fn yaml_overrides_only_given_fields() {
        let cfg = parse_supervise_config("spawn_throttle_ms: 5\nlog_level: debug\n").unwrap();
        assert_eq!(cfg.spawn_throttle_ms, 5);
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.fork_backoff_ms, 60_000);
    }

    #[test]
    fn yaml_rejects_unknown_and_invalid() {
        assert!(parse_supervise_config("bogus: 1\n").is_err());
        assert!(parse_supervise_config("wait_deadline_ms: 0\n").is_err());
        assert!(parse_supervise_config("").is_ok());
    }

    #[test]
    fn control_path_resolution() {
        let cfg = SuperviseConfig::default();
        let dir = Path::new("/srv/web");
        assert_eq!(cfg.control_path(dir, None), PathBuf::from("/srv/web/supervise"));
        assert_eq!(
            cfg.control_path(dir, Some(Path::new("/run/sv"))),
            PathBuf::from("/run/sv/srv:web")
        );
    }

    #[test]
    fn missing_file_means_defaults() {
        let cfg = load_supervise_config(None).unwrap();
        assert_eq!(cfg.wait_deadline_ms, 10_000);
        assert!(load_supervise_config(Some(Path::new("/nonexistent/supervise.yml"))).is_err());
    }
}
