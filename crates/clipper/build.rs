use std::process::Command;

use time::OffsetDateTime;
use time::macros::format_description;

fn main() {
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rustc-env=GIT_SHA={}", git_short_sha());
    println!("cargo:rustc-env=BUILD_DATE={}", build_day());
}

/// Short commit hash of the checkout, or `unknown` outside a git tree.
fn git_short_sha() -> String {
    let Ok(out) = Command::new("git")
        .args(["rev-parse", "--short=8", "HEAD"])
        .output()
    else {
        return "unknown".to_string();
    };
    let sha = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if out.status.success() && !sha.is_empty() {
        sha
    } else {
        "unknown".to_string()
    }
}

/// UTC build day, `YYYY-MM-DD`.
fn build_day() -> String {
    OffsetDateTime::now_utc()
        .format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| "unknown-date".to_string())
}
