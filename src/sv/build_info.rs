/// Seconds since the epoch as `YYYY-MM-DD HH:MM:SS` UTC.
fn format_epoch(raw: &str) -> Option<String> {
    let secs = raw.trim().parse::<i64>().ok()?;
    let dt = chrono::DateTime::<chrono::Utc>::from_timestamp(secs, 0)?;
    Some(dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn banner_from(version: &str, host: Option<&str>, epoch: Option<&str>) -> String {
    let mut out = format!("supervise {version}");
    if let Some(host) = host {
        out.push_str(&format!(" built on {host}"));
    }
    if let Some(at) = epoch.and_then(format_epoch) {
        out.push_str(&format!(" at {at}"));
    }
    out
}

pub fn banner() -> String {
    banner_from(
        env!("CARGO_PKG_VERSION"),
        option_env!("SUPERVISE_BUILD_HOST"),
        option_env!("SUPERVISE_BUILD_EPOCH"),
    )
}
