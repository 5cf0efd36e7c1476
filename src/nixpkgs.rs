//! nixpkgs source checkout.
//!
//! Packages are built from a nixpkgs tarball rather than a channel so the
//! bootstrap tools script can be patched before evaluation:
//!
//! ```text
//! <work>/repo.tar.gz        downloaded tarball
//! <work>/nix_repo/          extracted checkout (replaced on every run)
//!   nixpkgs-<rev>/
//!     default.nix           <- root handed to `nix build -f`
//!     pkgs/stdenv/darwin/unpack-bootstrap-tools.sh
//! ```
//!
//! The darwin bootstrap unpacker calls `install_name_tool` on prebuilt
//! binaries. Those calls fail on hosts with tightened code signing, so the
//! two offending lines get `|| true` appended.

use crate::download;
use crate::error::{Nix2PkgError, Result};
use anyhow::Context;
use flate2::read::GzDecoder;
use regex::Regex;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use tar::Archive;
use tracing::{debug, info, warn};

/// Bootstrap script patched before building, relative to the repo root
pub const BOOTSTRAP_SCRIPT: &str = "pkgs/stdenv/darwin/unpack-bootstrap-tools.sh";

const PATCH_TARGETS: [&str; 2] = [
    r#"install_name_tool -id "$(dirname $i)/$(basename $id)" $i"#,
    "install_name_tool -add_rpath $out/lib $i",
];

const TARBALL_NAME: &str = "repo.tar.gz";
const CHECKOUT_DIR: &str = "nix_repo";

fn release_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d\d\.\d\d(-pre|-beta)?$").expect("release pattern is valid")
    })
}

/// Which nixpkgs snapshot to build from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    /// A NixOS release such as `21.11` or `22.05-beta`
    Release(String),
    Unstable,
    Master,
    /// Any tarball URL containing nix expressions
    Url(String),
}

impl Channel {
    pub fn tarball_url(&self) -> String {
        match self {
            Channel::Release(version) => format!(
                "https://github.com/NixOS/nixpkgs/archive/nixos-{}.tar.gz",
                version
            ),
            Channel::Unstable => {
                "https://github.com/NixOS/nixpkgs/archive/nixos-unstable.tar.gz".to_string()
            }
            Channel::Master => "https://github.com/NixOS/nixpkgs/archive/master.tar.gz".to_string(),
            Channel::Url(url) => url.clone(),
        }
    }
}

impl FromStr for Channel {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Ok(if lower == "unstable" {
            Channel::Unstable
        } else if lower == "master" {
            Channel::Master
        } else if release_pattern().is_match(&lower) {
            Channel::Release(lower)
        } else {
            Channel::Url(s.trim().to_string())
        })
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Release(version) => f.write_str(version),
            Channel::Unstable => f.write_str("unstable"),
            Channel::Master => f.write_str("master"),
            Channel::Url(url) => f.write_str(url),
        }
    }
}

/// Download, extract, locate and patch a nixpkgs checkout under `work_dir`.
///
/// Returns the directory holding the top-level `default.nix`.
pub async fn fetch(channel: &Channel, work_dir: &Path) -> Result<PathBuf> {
    let url = channel.tarball_url();
    let tarball = work_dir.join(TARBALL_NAME);
    info!("Fetching nixpkgs from {}", url);
    download::download_file(&url, &tarball, "nixpkgs").await?;

    let checkout = work_dir.join(CHECKOUT_DIR);
    extract_tarball(&tarball, &checkout)?;
    let root = locate_root(&checkout)?;

    if patch_bootstrap(&root)? {
        info!("Bootstrap patch applied");
    } else {
        warn!("Bootstrap patch: nothing was patched");
    }
    Ok(root)
}

/// Extract a gzip tarball into `dest`, replacing any previous contents
pub fn extract_tarball(tarball: &Path, dest: &Path) -> Result<()> {
    if dest.exists() {
        fs::remove_dir_all(dest)
            .with_context(|| format!("Failed to remove old checkout: {}", dest.display()))?;
    }
    fs::create_dir_all(dest)?;

    let file = fs::File::open(tarball)
        .with_context(|| format!("Failed to open tarball: {}", tarball.display()))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive
        .unpack(dest)
        .with_context(|| format!("Failed to extract tarball to: {}", dest.display()))?;
    Ok(())
}

/// Find the directory containing the top-level `default.nix`
pub fn locate_root(checkout: &Path) -> Result<PathBuf> {
    if checkout.join("default.nix").is_file() {
        return Ok(checkout.to_path_buf());
    }
    let nixos = checkout.join("nixos");
    if nixos.join("default.nix").is_file() {
        return Ok(nixos);
    }

    let mut candidates: Vec<PathBuf> = fs::read_dir(checkout)
        .with_context(|| format!("Failed to read checkout: {}", checkout.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.join("default.nix").is_file())
        .collect();
    candidates.sort();

    candidates.into_iter().next().ok_or_else(|| {
        Nix2PkgError::BuildFailed(format!(
            "can't determine repo root in {}",
            checkout.display()
        ))
    })
}

/// Append `|| true` to the failing `install_name_tool` lines.
///
/// Returns the patched text and whether any line changed.
pub fn patch_script(contents: &str) -> (String, bool) {
    let mut patched = false;
    let mut out = String::with_capacity(contents.len() + 32);

    for line in contents.split_inclusive('\n') {
        let body = line.trim_end_matches(['\n', '\r']);
        let needs_patch =
            PATCH_TARGETS.iter().any(|t| body.contains(t)) && !body.contains("|| true");
        if needs_patch {
            debug!("Patching: {}", body.trim_end());
            out.push_str(body.trim_end());
            out.push_str(" || true\n");
            patched = true;
        } else {
            out.push_str(line);
        }
    }
    (out, patched)
}

/// Patch the bootstrap script under `root` in place
pub fn patch_bootstrap(root: &Path) -> Result<bool> {
    let script = root.join(BOOTSTRAP_SCRIPT);
    if !script.is_file() {
        warn!("Bootstrap script not found: {}", script.display());
        return Ok(false);
    }
    let contents = fs::read_to_string(&script)
        .with_context(|| format!("Failed to read {}", script.display()))?;
    let (patched_text, patched) = patch_script(&contents);
    if patched {
        fs::write(&script, patched_text)
            .with_context(|| format!("Failed to write {}", script.display()))?;
    }
    Ok(patched)
}
