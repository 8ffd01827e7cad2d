// Copyright © 2026 The Ready Group Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::process::Command;

fn main() {
    // Prefer the exact git revision, fall back to the crate version outside
    // of a git checkout.
    let version = Command::new("git")
        .args(["describe", "--dirty"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

    // This println!() has a special behavior, as it will set the environment
    // variable BUILT_VERSION, so that it can be reused from the binary.
    println!("cargo:rustc-env=BUILT_VERSION={version}");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
