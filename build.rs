// SPDX-License-Identifier: MPL-2.0

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");
    println!("cargo::rerun-if-env-changed=CAMERA_SCANNER_VERSION");

    // Packagers can pin the reported version without a git checkout
    let version = std::env::var("CAMERA_SCANNER_VERSION").unwrap_or_else(|_| describe_version());

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

/// Build a version string from the nearest `v*` tag.
///
/// - exactly on a tag: `0.1.0-abcdef1`
/// - commits after a tag: `0.1.0-dirty-abcdef1`
/// - no tags at all: the crate version plus the short hash
fn describe_version() -> String {
    let hash = git(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".to_string());

    let Some(described) = git(&["describe", "--tags", "--match", "v*"]) else {
        return format!("{}-{}", env!("CARGO_PKG_VERSION"), hash);
    };

    let described = described.strip_prefix('v').unwrap_or(&described);

    // "<tag>-<count>-g<hash>" when HEAD is past the tag
    let parts: Vec<&str> = described.rsplitn(3, '-').collect();
    match parts.as_slice() {
        [short, _count, tag] if short.starts_with('g') => {
            format!("{}-dirty-{}", tag, short.trim_start_matches('g'))
        }
        _ => format!("{}-{}", described, hash),
    }
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() { None } else { Some(text) }
}
