use std::process::Command;

/// Trimmed stdout of a successful command.
fn command_output(program: &str, args: &[&str]) -> Option<String> {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn main() {
    // Shown by `mont-pos doctor` and logged at startup.
    let built_at = command_output("date", &["-u", "+%Y-%m-%dT%H:%M:%SZ"])
        .unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=BUILD_TIMESTAMP={built_at}");

    // Release tarballs carry no .git; packagers pass the revision instead.
    let git_sha = std::env::var("MONT_POS_GIT_SHA")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| command_output("git", &["rev-parse", "--short", "HEAD"]))
        .unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=BUILD_GIT_SHA={git_sha}");

    println!("cargo:rerun-if-env-changed=MONT_POS_GIT_SHA");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
