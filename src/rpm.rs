//! RPM emission: spec file generation and `rpmbuild` invocation.
//!
//! Each store path becomes one binary RPM that drops the path, unchanged,
//! back into the store on the target host:
//!
//! ```text
//! <work>/packages/<name>-<hash>.spec   generated spec (removed by --rmspec)
//! <work>/topdir/                       rpmbuild _topdir
//! <work>/rpm-tmp/                      rpmbuild _tmppath
//! <work>/output/<arch>/*.rpm           finished packages
//! ```
//!
//! Automatic dependency and provides scanning is turned off; the
//! `Requires:` line comes from the store's reference graph instead.

use crate::closure;
use crate::error::Result;
use crate::platform::HostArch;
use crate::process::{Runner, ToolCommand};
use crate::store_path::StorePath;
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Build arch for `pkg_name`.
///
/// Cross-compiled outputs carry the target triple in their name and override
/// the host's native architecture.
pub fn build_arch(pkg_name: &str, host: HostArch) -> &'static str {
    if pkg_name.contains("x86_64-apple-darwin-") {
        HostArch::X86_64.rpm_arch()
    } else if pkg_name.contains("aarch64-apple-darwin-") {
        HostArch::Aarch64.rpm_arch()
    } else {
        host.rpm_arch()
    }
}

/// `Requires:` line for `deps`, or `None` when nothing but the package itself is listed
pub fn requires_line(package: &StorePath, deps: &[StorePath]) -> Option<String> {
    let names: Vec<String> = closure::requires_for(package, deps)
        .into_iter()
        .map(StorePath::rpm_name)
        .collect();
    if names.is_empty() {
        None
    } else {
        Some(format!("Requires: {}", names.join(" ")))
    }
}

/// Render the spec file for `package`, installed under `store_dir`
pub fn generate_spec(package: &StorePath, deps: &[StorePath], store_dir: &Path) -> String {
    let pkg_path = package.path().display();
    let store_dir = store_dir.display();

    let mut lines = vec![
        format!("Name: {}", package.rpm_name()),
        // BuildArch can't be set here; it goes to rpmbuild --target instead
        "Version: 1".to_string(),
        "Release: 0".to_string(),
        "Summary: Nix2RPM".to_string(),
        "Group: Nix2RPM".to_string(),
        "License: Nix2RPM".to_string(),
        "AutoReq: No".to_string(),
        "AutoProv: No".to_string(),
        "Packager: nix2pkg".to_string(),
    ];
    if let Some(requires) = requires_line(package, deps) {
        lines.push(requires);
    }
    lines.extend([
        "%description".to_string(),
        format!(
            "Packaged {} with hash {} using nix2rpm",
            package.name(),
            package.hash()
        ),
        "%install".to_string(),
        format!("mkdir -p $RPM_BUILD_ROOT{}/", store_dir),
        format!("cp -a {} $RPM_BUILD_ROOT{}/", pkg_path, store_dir),
        "%files".to_string(),
        pkg_path.to_string(),
        "%clean".to_string(),
        "chmod -R +w $RPM_BUILD_ROOT".to_string(),
        "rm -rf $RPM_BUILD_ROOT".to_string(),
    ]);
    lines.join("\n")
}

/// Writes spec files and drives `rpmbuild` inside a work directory
#[derive(Debug, Clone)]
pub struct RpmBuilder {
    work_dir: PathBuf,
    store_dir: PathBuf,
    host: HostArch,
}

impl RpmBuilder {
    pub fn new(work_dir: impl Into<PathBuf>, store_dir: impl Into<PathBuf>, host: HostArch) -> Self {
        Self {
            work_dir: work_dir.into(),
            store_dir: store_dir.into(),
            host,
        }
    }

    pub fn spec_dir(&self) -> PathBuf {
        self.work_dir.join("packages")
    }

    pub fn topdir(&self) -> PathBuf {
        self.work_dir.join("topdir")
    }

    pub fn rpmdir(&self) -> PathBuf {
        self.work_dir.join("output")
    }

    pub fn tmppath(&self) -> PathBuf {
        self.work_dir.join("rpm-tmp")
    }

    /// Remove rpmbuild's scratch space
    pub fn cleanup(&self) -> Result<()> {
        remove_dir_if_exists(&self.tmppath())
    }

    /// Render and write the spec for `package`, returning its path
    pub fn write_spec(&self, package: &StorePath, deps: &[StorePath]) -> Result<PathBuf> {
        let dir = self.spec_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let spec_path = dir.join(package.spec_file_name());
        fs::write(&spec_path, generate_spec(package, deps, &self.store_dir))
            .with_context(|| format!("Failed to write spec: {}", spec_path.display()))?;
        Ok(spec_path)
    }

    pub fn rpmbuild_command(&self, spec: &Path, arch: &str) -> ToolCommand {
        ToolCommand::new("rpmbuild")
            .args(["--target", arch, "-bb", "--rmspec"])
            .arg("--define")
            .arg(format!("_topdir {}", self.topdir().display()))
            .arg("--define")
            .arg(format!("_rpmdir {}", self.rpmdir().display()))
            .arg("--define")
            .arg(format!("_tmppath {}", self.tmppath().display()))
            .arg("--define")
            .arg("_invalid_encoding_terminates_build 0")
            .arg_path(spec)
    }

    /// Write the spec for `package` and build it; returns whether rpmbuild succeeded
    pub fn create_rpm(
        &self,
        runner: &dyn Runner,
        package: &StorePath,
        deps: &[StorePath],
    ) -> Result<bool> {
        let spec = self.write_spec(package, deps)?;
        let arch = build_arch(package.name(), self.host);
        let cmd = self.rpmbuild_command(&spec, arch).dir(&self.spec_dir());
        info!("Running: {}", cmd.command_line());
        runner.build(&cmd)
    }
}

fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).with_context(|| format!("Failed to remove {}", dir.display()))?;
    }
    Ok(())
}
