//! Forwards the build host and a reproducible build time to the boot banner.
//! Nothing is stamped when the environment does not provide them.

fn main() {
    for (from, to) in [
        ("SOURCE_DATE_EPOCH", "SUPERVISE_BUILD_EPOCH"),
        ("HOSTNAME", "SUPERVISE_BUILD_HOST"),
    ] {
        println!("cargo:rerun-if-env-changed={from}");
        if let Some(v) = std::env::var(from).ok().filter(|v| !v.trim().is_empty()) {
            println!("cargo:rustc-env={to}={}", v.trim());
        }
    }
}
