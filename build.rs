// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

fn main() {
    // Re-run build script if git HEAD changes
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");

    // Packagers may pin the version explicitly
    let version = if let Ok(v) = std::env::var("BARCODE_CAMERA_VERSION") {
        v
    } else {
        get_git_version()
    };

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

fn get_git_version() -> String {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--match", "v*"])
        .output();

    match output {
        Ok(output) if output.status.success() => {
            let described = String::from_utf8_lossy(&output.stdout).trim().to_string();
            described
                .strip_prefix('v')
                .map(str::to_string)
                .unwrap_or(described)
        }
        // Not a git checkout (e.g. crates.io tarball)
        _ => env!("CARGO_PKG_VERSION").to_string(),
    }
}
