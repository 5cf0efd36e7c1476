//! Thin client over the `nix`, `nix-env` and `nix-store` binaries.
//!
//! Nothing here evaluates or resolves anything itself: each method is one
//! invocation through the [`Runner`], with the install's
//! [`NixEnvironment`] attached.

use crate::config::Settings;
use crate::environment::NixEnvironment;
use crate::error::{Nix2PkgError, Result};
use crate::paths::NixLayout;
use crate::process::{Runner, ToolCommand, ToolOutput};
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Is the runtime installed and the user profile linked?
pub fn is_installed(settings: &Settings) -> bool {
    let nix_present = settings.layout.nix_package().exists();
    let profile_linked = settings
        .user_profile()
        .symlink_metadata()
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    debug!(
        "nix package present: {}, profile linked: {}",
        nix_present, profile_linked
    );
    nix_present && profile_linked
}

/// Parameters for one `nix build`
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Attribute path, e.g. `wget` or `pkgsCross.aarch64-darwin.wget`
    pub attr: String,
    /// Directory containing nixpkgs' `default.nix`
    pub nixpkgs_root: PathBuf,
    /// Out-link prefix; Nix creates `<out_link>`, `<out_link>-dev`, ...
    pub out_link: PathBuf,
    pub max_jobs: usize,
    pub build_logs: bool,
    pub force: bool,
}

impl BuildRequest {
    fn out_link_name(&self) -> String {
        self.out_link
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn out_link_dir(&self) -> &Path {
        self.out_link.parent().unwrap_or_else(|| Path::new("."))
    }
}

pub struct Nix<'a> {
    runner: &'a dyn Runner,
    layout: &'a NixLayout,
    env: NixEnvironment,
}

impl<'a> Nix<'a> {
    pub fn new(runner: &'a dyn Runner, layout: &'a NixLayout, env: NixEnvironment) -> Self {
        Self {
            runner,
            layout,
            env,
        }
    }

    pub fn layout(&self) -> &NixLayout {
        self.layout
    }

    fn nix_env(&self) -> ToolCommand {
        ToolCommand::new(self.layout.nix_env()).env(&self.env)
    }

    fn nix_store(&self) -> ToolCommand {
        ToolCommand::new(self.layout.nix_store()).env(&self.env)
    }

    fn query_lines(&self, cmd: ToolCommand) -> Result<Vec<String>> {
        let output: ToolOutput = self.runner.query(&cmd)?;
        if !output.success() {
            warn!("{} failed: {}", cmd.command_line(), output.stderr.trim());
            return Err(Nix2PkgError::ToolFailed {
                program: cmd.program_name().to_string(),
                code: output.code.unwrap_or(-1),
            });
        }
        Ok(output.words())
    }

    /// All store paths `path` depends on, transitively, including itself
    pub fn requisites(&self, path: &Path) -> Result<Vec<String>> {
        self.query_lines(
            self.nix_store()
                .args(["--query", "--requisites"])
                .arg_path(path),
        )
    }

    /// Store paths `path` refers to directly
    pub fn references(&self, path: &Path) -> Result<Vec<String>> {
        self.query_lines(
            self.nix_store()
                .args(["--query", "--references"])
                .arg_path(path),
        )
    }

    /// Every package name available from the configured channels
    pub fn remote_packages(&self) -> Result<Vec<String>> {
        self.query_lines(self.nix_env().arg("-qa"))
    }

    /// Remote packages containing `term`, shortest names first
    pub fn search(&self, term: &str) -> Result<Vec<String>> {
        let mut matches: Vec<String> = self
            .remote_packages()?
            .into_iter()
            .filter(|p| p.contains(term))
            .collect();
        matches.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        Ok(matches)
    }

    /// Switch to a dedicated profile so builds don't interact with earlier ones
    pub fn switch_profile(&self, package: &str) -> Result<()> {
        let profile = self.layout.profile_for(package);
        let output = self.runner.query(
            &self
                .nix_env()
                .arg("--switch-profile")
                .arg_path(&profile),
        )?;
        if !output.success() {
            warn!(
                "Could not switch to profile {}: {}",
                profile.display(),
                output.stderr.trim()
            );
        }
        Ok(())
    }

    /// Build `request.attr` and return the basenames of its output paths
    pub fn build(&self, request: &BuildRequest) -> Result<Vec<String>> {
        let link_dir = request.out_link_dir();
        let link_name = request.out_link_name();
        for stale in out_links(link_dir, &link_name)? {
            fs::remove_file(&stale)
                .with_context(|| format!("Failed to remove old build result: {}", stale.display()))?;
        }

        let env = if request.force {
            self.env.clone().with_force()
        } else {
            self.env.clone()
        };

        let mut cmd = ToolCommand::new(self.layout.nix())
            .env(&env)
            .arg("build")
            .arg("-f")
            .arg_path(&request.nixpkgs_root.join("default.nix"))
            .arg("-o")
            .arg_path(&request.out_link)
            .arg("-j")
            .arg(request.max_jobs.to_string());
        if request.build_logs {
            cmd = cmd.arg("-L");
        }
        cmd = cmd.arg(&request.attr);

        info!("Running build command: {}", cmd.command_line());
        if !self.runner.build(&cmd)? {
            return Err(Nix2PkgError::BuildFailed(format!(
                "nix build failed for {}",
                request.attr
            )));
        }

        let links = out_links(link_dir, &link_name)?;
        if links.is_empty() {
            return Err(Nix2PkgError::BuildFailed(format!(
                "no build results found: {}*",
                request.out_link.display()
            )));
        }

        let mut base_names = Vec::with_capacity(links.len());
        for link in links {
            let target = fs::canonicalize(&link)
                .with_context(|| format!("Failed to resolve build result: {}", link.display()))?;
            if let Some(name) = target.file_name() {
                base_names.push(name.to_string_lossy().into_owned());
            }
        }
        debug!("Build outputs: {:?}", base_names);
        Ok(base_names)
    }

    /// Register the bootstrap archive's store paths and set up the default profile
    pub fn initial_setup(&self, extracted: &Path) -> Result<()> {
        let reginfo = extracted.join(".reginfo");
        let load = self.nix_store().arg("--load-db").stdin_file(&reginfo);
        if !self.runner.build(&load)? {
            return Err(Nix2PkgError::ToolFailed {
                program: "nix-store --load-db".to_string(),
                code: 1,
            });
        }

        let install_nix = self.nix_env().arg("-i").arg_path(&self.layout.nix_package());
        if !self.runner.build(&install_nix)? {
            return Err(Nix2PkgError::ToolFailed {
                program: "nix-env -i".to_string(),
                code: 1,
            });
        }

        let install_ca = self.nix_env().arg("-i").arg_path(&self.layout.ca_package());
        if !self.runner.build(&install_ca)? {
            warn!("Failed to install CA bundle into the profile");
        }

        self.runner.build(&self.nix_env().arg("--version"))?;
        Ok(())
    }
}

/// Entries in `dir` whose name starts with `prefix` (`result`, `result-dev`, ...)
fn out_links(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    if prefix.is_empty() || !dir.exists() {
        return Ok(vec![]);
    }
    let mut links: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
        .map(|entry| entry.path())
        .collect();
    links.sort();
    Ok(links)
}
