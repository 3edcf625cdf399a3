fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");

    // binaries print this on startup; outside a git checkout fall back to the package version
    let version = std::process::Command::new("git")
        .args(["describe", "--always", "--dirty", "--tags"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

    println!("cargo:rustc-env=SIGNIFY_BUILD={}", version);
}
