use std::process::Command;

/// Stdout of a command, trimmed, or `"unknown"` if it cannot run.
fn command_output(program: &str, args: &[&str]) -> String {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn main() {
    let git_hash = command_output("git", &["rev-parse", "--short", "HEAD"]);
    let build_date = std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .map(|epoch| command_output("date", &["-u", "-d", &format!("@{epoch}"), "+%Y-%m-%d"]))
        .unwrap_or_else(|| command_output("date", &["-u", "+%Y-%m-%d"]));

    println!("cargo:rustc-env=CHATFLOW_GIT_HASH={git_hash}");
    println!("cargo:rustc-env=CHATFLOW_BUILD_DATE={build_date}");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
