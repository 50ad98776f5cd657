// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");
    println!("cargo::rerun-if-env-changed=DEPTHCAP_VERSION");

    // Packagers can pin the version string without a git checkout
    let version = std::env::var("DEPTHCAP_VERSION").unwrap_or_else(|_| describe_version());

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

/// Build "<crate version>-<short hash>" or "<crate version>-dirty-<short hash>"
/// when HEAD is not exactly at a release tag.
fn describe_version() -> String {
    let crate_version = std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".into());

    let Some(hash) = git(&["rev-parse", "--short", "HEAD"]) else {
        return crate_version;
    };

    let exact_tag = git(&["describe", "--tags", "--exact-match", "--match", "v*"]).is_some();
    if exact_tag {
        format!("{}-{}", crate_version, hash)
    } else {
        format!("{}-dirty-{}", crate_version, hash)
    }
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}
