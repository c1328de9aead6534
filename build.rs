use std::process::Command;

fn main() {
    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", utc_now());

    let git_sha = run(&["git", "rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=BUILD_GIT_SHA={git_sha}");

    // Rebuild when git HEAD changes
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=build.rs");
}

fn run(argv: &[&str]) -> Option<String> {
    let (program, args) = argv.split_first()?;
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// UTC ISO-8601 without a build-time chrono dependency.
fn utc_now() -> String {
    run(&["date", "-u", "+%Y-%m-%dT%H:%M:%SZ"])
        .or_else(|| {
            run(&[
                "powershell",
                "-Command",
                "(Get-Date).ToUniversalTime().ToString('yyyy-MM-ddTHH:mm:ssZ')",
            ])
        })
        .unwrap_or_else(|| "unknown".into())
}
