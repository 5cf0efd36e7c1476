use crate::commands::nix_environment;
use crate::config::Settings;
use crate::download;
use crate::error::Result;
use crate::installer::{self, Installer};
use crate::nix::{self, Nix};
use crate::process::Runner;
use anyhow::{Context, anyhow};
use colored::Colorize;

/// Install the Nix runtime from `archive` (a path or URL), or from
/// `NIX2PKG_RELEASE_URL` when none is given
pub async fn prepare(
    runner: &dyn Runner,
    settings: &Settings,
    archive: Option<&str>,
    sha256: Option<&str>,
) -> Result<()> {
    if nix::is_installed(settings) {
        println!("{} nix2pkg is already prepared.", "✓".green());
        return Ok(());
    }

    let source = archive
        .map(str::to_string)
        .or_else(|| settings.release_url.clone())
        .ok_or_else(|| {
            anyhow!("No runtime archive given; pass --archive or set NIX2PKG_RELEASE_URL")
        })?;

    println!(
        "{} Installing Nix into {}",
        "==>".bold().green(),
        settings.layout.root().display().to_string().cyan()
    );

    let scratch = tempfile::Builder::new()
        .prefix("nix2pkg-prepare")
        .tempdir()
        .context("Failed to create scratch directory")?;

    println!("  Fetching {}", source.dimmed());
    let archive_path = download::fetch(&source, scratch.path(), sha256).await?;
    if sha256.is_some() {
        println!("    ├ {} Checksum verified", "✓".green());
    }

    let nix = Nix::new(runner, &settings.layout, nix_environment(settings));
    let installer = Installer::new(runner, settings);
    let result = installer.install(&nix, &archive_path, scratch.path());

    if download::is_url(&source) {
        if let Ok(extracted) = installer::extracted_dir(&archive_path, scratch.path()) {
            installer::clean_install_files(&extracted, Some(&archive_path));
        }
    }
    result?;

    println!("    └ {} Finished install", "✓".green());
    Ok(())
}
