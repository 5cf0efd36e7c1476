//! The `package` pipeline.
//!
//! For every requested target: switch to its profile, build it, walk the
//! closure of its outputs and emit one artifact per store path. The first
//! artifact failure stops the run; nothing already produced is rolled back.
//! In Apple mode a distribution package bundling every component follows.

use crate::apple::ApplePkgBuilder;
use crate::closure;
use crate::cross;
use crate::environment::NixEnvironment;
use crate::error::{Nix2PkgError, Result};
use crate::nix::{BuildRequest, Nix};
use crate::paths::NixLayout;
use crate::platform::HostArch;
use crate::process::Runner;
use crate::rpm::RpmBuilder;
use crate::store_path::StorePath;
use anyhow::Context;
use colored::Colorize;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Out-link prefix for `nix build`, inside the work directory
pub const BUILD_RESULT: &str = "build_result";

/// What kind of artifacts to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Rpm,
    ApplePkg,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Rpm => f.write_str("rpm"),
            OutputFormat::ApplePkg => f.write_str("apple-pkg"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PackageOptions {
    pub requested: Vec<String>,
    pub force: bool,
    pub arm: bool,
    pub x86: bool,
    pub max_jobs: usize,
    pub build_logs: bool,
    pub format: OutputFormat,
}

/// Outcome of one pipeline run
#[derive(Debug, Default, Clone)]
pub struct PackagingReport {
    /// Build targets after cross-compile expansion
    pub targets: Vec<String>,
    /// Store paths an artifact was produced for, in order
    pub packaged: Vec<StorePath>,
    /// Store paths skipped because they are not directories (Apple mode)
    pub skipped: Vec<PathBuf>,
    /// The package or step whose artifact failed, if any
    pub failed: Option<String>,
    /// Files in the output directory after the run
    pub artifacts: Vec<PathBuf>,
}

impl PackagingReport {
    /// Report for a run that stopped with `error` before it finished
    pub fn aborted(targets: Vec<String>, error: &Nix2PkgError, artifacts: Vec<PathBuf>) -> Self {
        Self {
            targets,
            failed: Some(error.to_string()),
            artifacts,
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.failed.is_none()
    }
}

pub struct Pipeline<'a> {
    runner: &'a dyn Runner,
    nix: Nix<'a>,
    host: HostArch,
    work_dir: PathBuf,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        runner: &'a dyn Runner,
        layout: &'a NixLayout,
        env: NixEnvironment,
        host: HostArch,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            nix: Nix::new(runner, layout, env),
            host,
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Finished RPMs and Apple packages land here
    pub fn output_dir(&self) -> PathBuf {
        self.work_dir.join("output")
    }

    /// Build targets for `options`, after cross-compile expansion
    pub fn targets(&self, options: &PackageOptions) -> Vec<String> {
        cross::expand(&options.requested, options.arm, options.x86, self.host)
    }

    /// Files currently in the output directory, sorted
    pub fn artifacts(&self) -> Vec<PathBuf> {
        list_artifacts(&self.output_dir())
    }

    fn rpm_builder(&self) -> RpmBuilder {
        RpmBuilder::new(&self.work_dir, self.nix.layout().store(), self.host)
    }

    fn apple_builder(&self) -> ApplePkgBuilder {
        ApplePkgBuilder::new(self.output_dir())
    }

    /// Build and package every requested target from the checkout at `nixpkgs_root`.
    ///
    /// Build and closure errors are returned as `Err`; artifact failures stop
    /// the run and are reported through [`PackagingReport::failed`].
    pub fn run(&self, options: &PackageOptions, nixpkgs_root: &Path) -> Result<PackagingReport> {
        let mut report = PackagingReport {
            targets: self.targets(options),
            ..PackagingReport::default()
        };
        println!(
            "{} Packaging {}",
            "==>".bold().green(),
            report.targets.join(", ").bold()
        );

        let output_dir = self.output_dir();
        if output_dir.exists() {
            debug!("Cleaning output directory {}", output_dir.display());
            fs::remove_dir_all(&output_dir)
                .with_context(|| format!("Failed to clean {}", output_dir.display()))?;
        }
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;

        let targets = report.targets.clone();
        for target in &targets {
            self.package_target(target, options, nixpkgs_root, &mut report)?;
            if !report.success() {
                break;
            }
        }

        if options.format == OutputFormat::ApplePkg && report.success() {
            match report.packaged.first() {
                Some(primary) => {
                    println!("{} Building distribution package", "==>".bold().green());
                    if !self.apple_builder().build_distribution(self.runner, primary)? {
                        report.failed = Some(primary.distribution_pkg_name());
                    }
                }
                None => report.failed = Some("distribution package".to_string()),
            }
        }

        if options.format == OutputFormat::Rpm {
            self.rpm_builder().cleanup()?;
        }
        report.artifacts = self.artifacts();
        Ok(report)
    }

    fn package_target(
        &self,
        target: &str,
        options: &PackageOptions,
        nixpkgs_root: &Path,
        report: &mut PackagingReport,
    ) -> Result<()> {
        println!("{} Building {}", "==>".bold().green(), target.cyan());
        self.nix.switch_profile(target)?;

        let request = BuildRequest {
            attr: target.to_string(),
            nixpkgs_root: nixpkgs_root.to_path_buf(),
            out_link: self.work_dir.join(BUILD_RESULT),
            max_jobs: options.max_jobs,
            build_logs: options.build_logs,
            force: options.force,
        };
        let outputs = self.nix.build(&request)?;
        info!("Build done: {} -> {:?}", target, outputs);

        let paths = closure::packages_to_pack(&self.nix, &outputs)?;
        println!(
            "  {} Closure of {} has {} store paths",
            "ℹ".cyan(),
            target,
            paths.len().to_string().bold()
        );

        let rpm = self.rpm_builder();
        let apple = self.apple_builder();
        for path in &paths {
            let package = StorePath::parse(path)?;

            let ok = match options.format {
                OutputFormat::Rpm => {
                    let deps = closure::references(&self.nix, path)?;
                    rpm.create_rpm(self.runner, &package, &deps)?
                }
                OutputFormat::ApplePkg => {
                    if !path.is_dir() {
                        debug!("Skipping non-directory {}", path.display());
                        report.skipped.push(path.clone());
                        continue;
                    }
                    apple.build_component(self.runner, &package)?
                }
            };

            if ok {
                println!("    {} {}", "✓".green(), package.name());
                report.packaged.push(package);
            } else {
                println!("    {} Packaging error: {}", "✗".red(), path.display());
                report.failed = Some(path.display().to_string());
                break;
            }
        }
        Ok(())
    }
}

fn list_artifacts(output_dir: &Path) -> Vec<PathBuf> {
    let mut artifacts: Vec<PathBuf> = WalkDir::new(output_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    artifacts.sort();
    artifacts
}
