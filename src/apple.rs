//! Apple installer emission: one component package per store path, then a
//! distribution package bundling all of them.
//!
//! `pkgbuild` installs a component's `--root` at `/`, so each store path is
//! copied into a scratch root at its own absolute location first:
//!
//! ```text
//! /tmp/.tmpXXXX/nix/store/<hash>-<name>/...   --root /tmp/.tmpXXXX
//! ```

use crate::error::Result;
use crate::process::{Runner, ToolCommand, ToolOutput};
use crate::store_path::StorePath;
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};
use walkdir::WalkDir;

/// Version stamped on every component package
pub const COMPONENT_VERSION: &str = "1.0";

/// Copy `src` into `dest`, recreating symlinks instead of following them.
///
/// Dangling links are copied as-is.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("Unexpected path under {}", src.display()))?;
        let target = dest.join(rel);
        let file_type = entry.file_type();

        if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            if target.symlink_metadata().is_ok() {
                fs::remove_file(&target)?;
            }
            std::os::unix::fs::symlink(&link, &target)
                .with_context(|| format!("Failed to create symlink: {}", target.display()))?;
        } else if file_type.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

fn report_failure(what: &str, output: &ToolOutput) {
    error!("{} failed with code {}", what, output.code.unwrap_or(-1));
    if !output.stdout.trim().is_empty() {
        eprintln!("{}", output.stdout.trim_end());
    }
    if !output.stderr.trim().is_empty() {
        eprintln!("{}", output.stderr.trim_end());
    }
}

/// Builds component and distribution packages into one output directory
#[derive(Debug, Clone)]
pub struct ApplePkgBuilder {
    output_dir: PathBuf,
}

impl ApplePkgBuilder {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn component_command(&self, root: &Path, package: &StorePath) -> ToolCommand {
        ToolCommand::new("/usr/bin/pkgbuild")
            .arg("--root")
            .arg_path(root)
            .arg("--identifier")
            .arg(package.pkg_identifier())
            .arg("--version")
            .arg(COMPONENT_VERSION)
            .arg_path(&self.output_dir.join(package.component_pkg_name()))
    }

    pub fn distribution_command(&self, components: &[PathBuf], primary: &StorePath) -> ToolCommand {
        let mut cmd = ToolCommand::new("/usr/bin/productbuild");
        for component in components {
            cmd = cmd.arg("--package").arg_path(component);
        }
        cmd.arg_path(&self.output_dir.join(primary.distribution_pkg_name()))
    }

    /// Build the component package for `package`; returns whether pkgbuild succeeded
    pub fn build_component(&self, runner: &dyn Runner, package: &StorePath) -> Result<bool> {
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;

        let scratch = tempfile::Builder::new()
            .prefix("nix2pkg-root")
            .tempdir()
            .context("Failed to create scratch root")?;
        let relative = package
            .path()
            .strip_prefix("/")
            .unwrap_or_else(|_| package.path());
        let fixed_root = scratch.path().join(relative);
        debug!("Copying {} into {}", package, fixed_root.display());
        copy_tree(package.path(), &fixed_root)?;

        let output = runner.assemble(&self.component_command(scratch.path(), package))?;
        if !output.success() {
            report_failure(&format!("pkgbuild for {}", package.name()), &output);
        }
        Ok(output.success())
    }

    /// Component packages currently in the output directory, sorted
    pub fn components(&self) -> Result<Vec<PathBuf>> {
        if !self.output_dir.exists() {
            return Ok(vec![]);
        }
        let mut components: Vec<PathBuf> = fs::read_dir(&self.output_dir)
            .with_context(|| format!("Failed to read {}", self.output_dir.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "pkg"))
            .collect();
        components.sort();
        Ok(components)
    }

    /// Bundle every component in the output directory into one installer
    /// named after `primary`; returns whether productbuild succeeded
    pub fn build_distribution(&self, runner: &dyn Runner, primary: &StorePath) -> Result<bool> {
        let target = self.output_dir.join(primary.distribution_pkg_name());
        let components: Vec<PathBuf> = self
            .components()?
            .into_iter()
            .filter(|path| *path != target)
            .collect();
        if components.is_empty() {
            error!("No component packages to build distribution package from");
            return Ok(false);
        }

        let output = runner.assemble(&self.distribution_command(&components, primary))?;
        if output.success() {
            info!("Package found at {}", target.display());
        } else {
            report_failure("productbuild", &output);
        }
        Ok(output.success())
    }
}
