use crate::sv::service::Role;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a tracing filter (e.g. `debug`, `supervise=trace`).
pub const LOG_ENV: &str = "SUPERVISE_LOG";

/// Install the stderr subscriber. `SUPERVISE_LOG` wins over the configured level.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// One line of the supervisor's event log.
pub(crate) fn sv_event(component: &str, role: Option<Role>, msg: impl AsRef<str>) {
    match role {
        Some(r) => tracing::info!(component, service = r.as_str(), "{}", msg.as_ref()),
        None => tracing::info!(component, "{}", msg.as_ref()),
    }
}
