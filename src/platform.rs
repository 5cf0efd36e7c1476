//! Host architecture detection.
//!
//! Packaging decisions depend on which CPU the host runs:
//! - **RPM target**: `rpmbuild --target` gets `aarch64` or `x86_64`
//! - **Cross builds**: the *other* architecture is reached through
//!   `pkgsCross.<system>` attributes in nixpkgs
//! - **Runtime bootstrap**: the pinned nix and CA-bundle store paths differ
//!   per architecture
//!
//! Apple reports `arm64` from `uname -m` on Apple Silicon, while RPM and nixpkgs
//! both call it `aarch64`. This module always uses the RPM/nixpkgs spelling.
//!
//! # Examples
//!
//! ```
//! use nix2pkg::platform::HostArch;
//!
//! let arch = HostArch::parse("arm64").unwrap();
//! assert_eq!(arch, HostArch::Aarch64);
//! assert_eq!(arch.rpm_arch(), "aarch64");
//! assert_eq!(arch.other().cross_system(), "x86_64-darwin");
//! ```

use anyhow::{Result, bail};
use serde::Serialize;
use std::fmt;

/// CPU architecture of the machine doing the packaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostArch {
    Aarch64,
    X86_64,
}

impl HostArch {
    /// Detect the architecture this binary was built for.
    ///
    /// Anything that is not ARM64 is treated as x86_64, which matches the
    /// two host kinds nixpkgs ships darwin bootstrap tools for.
    pub fn detect() -> Self {
        match std::env::consts::ARCH {
            "aarch64" => HostArch::Aarch64,
            _ => HostArch::X86_64,
        }
    }

    /// Parse a user-supplied architecture name.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "aarch64" | "arm64" | "arm" => Ok(HostArch::Aarch64),
            "x86_64" | "x86" | "amd64" | "intel" => Ok(HostArch::X86_64),
            other => bail!("Unknown architecture: {}", other),
        }
    }

    /// Architecture string understood by `rpmbuild --target`.
    pub fn rpm_arch(self) -> &'static str {
        match self {
            HostArch::Aarch64 => "aarch64",
            HostArch::X86_64 => "x86_64",
        }
    }

    /// nixpkgs system double used under `pkgsCross`.
    pub fn cross_system(self) -> &'static str {
        match self {
            HostArch::Aarch64 => "aarch64-darwin",
            HostArch::X86_64 => "x86_64-darwin",
        }
    }

    pub fn other(self) -> Self {
        match self {
            HostArch::Aarch64 => HostArch::X86_64,
            HostArch::X86_64 => HostArch::Aarch64,
        }
    }
}

impl fmt::Display for HostArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rpm_arch())
    }
}
