use crate::commands::{ensure_prepared, nix_environment};
use crate::config::Settings;
use crate::error::Result;
use crate::installer::Installer;
use crate::nixpkgs::{self, Channel};
use crate::pipeline::{PackageOptions, PackagingReport, Pipeline};
use crate::platform::HostArch;
use crate::process::Runner;
use crate::receipt::PackagingReceipt;
use anyhow::Context;
use colored::Colorize;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

/// Everything `nix2pkg package` was invoked with
#[derive(Debug, Clone)]
pub struct PackageArgs {
    pub options: PackageOptions,
    pub channel: Channel,
    /// Chown the store to this user while packaging
    pub own_store: Option<String>,
    pub work_dir: PathBuf,
}

/// Clamp `--max-jobs` to `1..=cpus`, defaulting to `cpus`
pub fn clamp_jobs(requested: Option<usize>, cpus: usize) -> usize {
    let cpus = cpus.max(1);
    requested.unwrap_or(cpus).clamp(1, cpus)
}

/// Build and package everything in `args`; returns whether every artifact succeeded
pub async fn package(runner: &dyn Runner, settings: &Settings, args: &PackageArgs) -> Result<bool> {
    ensure_prepared(settings)?;

    fs::create_dir_all(&args.work_dir)
        .with_context(|| format!("Failed to create {}", args.work_dir.display()))?;
    let work_dir = fs::canonicalize(&args.work_dir)?;

    println!("Using repo: {}", args.channel.to_string().cyan());
    let nixpkgs_root = nixpkgs::fetch(&args.channel, &work_dir).await?;

    let installer = Installer::new(runner, settings);
    if let Some(user) = &args.own_store {
        hand_store_to(&installer, user);
    }

    let pipeline = Pipeline::new(
        runner,
        &settings.layout,
        nix_environment(settings),
        settings.arch,
        &work_dir,
    );
    let result = pipeline.run(&args.options, &nixpkgs_root);

    if args.own_store.is_some() {
        hand_store_to(&installer, "root");
    }
    if let Err(e) = write_receipt(&pipeline, settings.arch, args, &result) {
        warn!("Could not write packaging receipt: {}", e);
    }
    let report = result?;

    if report.success() {
        println!(
            "{} Packaged {} store paths into {}",
            "✓".green().bold(),
            report.packaged.len().to_string().bold(),
            pipeline.output_dir().display().to_string().cyan()
        );
    } else {
        println!(
            "{} There were errors during packaging ({})",
            "✗".red().bold(),
            report.failed.as_deref().unwrap_or("unknown")
        );
    }
    Ok(report.success())
}

/// Chown the store to `user`; failures only warn
fn hand_store_to(installer: &Installer<'_>, user: &str) {
    match installer.own_store(user) {
        Ok(true) => {}
        Ok(false) => warn!("Could not hand the store to {}", user),
        Err(e) => warn!("Could not hand the store to {}: {}", user, e),
    }
}

/// Record the outcome of `result` in the output directory.
///
/// Runs that stopped with an error still get a receipt, marked failed with
/// the error message.
pub fn write_receipt(
    pipeline: &Pipeline<'_>,
    arch: HostArch,
    args: &PackageArgs,
    result: &Result<PackagingReport>,
) -> Result<PathBuf> {
    let aborted;
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            aborted = PackagingReport::aborted(
                pipeline.targets(&args.options),
                e,
                pipeline.artifacts(),
            );
            &aborted
        }
    };
    let receipt = PackagingReceipt::from_report(
        report,
        &args.options.requested,
        arch,
        args.options.format,
        &args.channel.to_string(),
    );
    Ok(receipt.write(&pipeline.output_dir())?)
}
