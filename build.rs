//! Build script to inject version and git SHA at compile time.
//!
//! Environment variables (set by CI or fall back to defaults):
//! - GNB_VERSION: Version string (defaults to CARGO_PKG_VERSION)
//! - GNB_GIT_SHA: Git commit SHA (defaults to git rev-parse, then "unknown")

use std::process::Command;

fn main() {
    let version = std::env::var("GNB_VERSION").unwrap_or_else(|_| {
        std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "unknown".into())
    });
    println!("cargo:rustc-env=GNB_VERSION={}", version);

    let git_sha = std::env::var("GNB_GIT_SHA")
        .or_else(|_| {
            std::env::var("GITHUB_SHA").map(|s| s.chars().take(7).collect::<String>())
        })
        .unwrap_or_else(|_| get_git_sha());
    println!("cargo:rustc-env=GNB_GIT_SHA={}", git_sha);

    println!("cargo:rerun-if-env-changed=GNB_VERSION");
    println!("cargo:rerun-if-env-changed=GNB_GIT_SHA");
    println!("cargo:rerun-if-env-changed=GITHUB_SHA");
}

fn get_git_sha() -> String {
    Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".into())
}
