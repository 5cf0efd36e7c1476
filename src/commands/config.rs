use crate::config::Settings;
use crate::error::Result;
use crate::nix;
use colored::Colorize;
use std::path::Path;

fn path_line(label: &str, path: &Path) {
    println!(
        "  {}: {}",
        label.dimmed(),
        path.display().to_string().cyan()
    );
}

/// Print resolved settings, or the same data as JSON
pub fn config(settings: &Settings, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(settings)?);
        return Ok(());
    }

    let layout = &settings.layout;
    println!("{}", "==> nix2pkg Configuration".bold().green());
    println!();

    println!("{}", "Paths:".bold());
    path_line("Root", layout.root());
    path_line("Store", &layout.store());
    path_line("Nix package", &layout.nix_package());
    path_line("CA bundle", &layout.ca_bundle());
    path_line("Profiles", &layout.profiles());
    path_line("Config file", &layout.config_file());
    path_line("User profile", &settings.user_profile());
    println!();

    println!("{}", "System:".bold());
    println!(
        "  {}: {}",
        "Version".dimmed(),
        env!("CARGO_PKG_VERSION").cyan()
    );
    println!(
        "  {}: {}",
        "Architecture".dimmed(),
        settings.arch.to_string().cyan()
    );
    let prepared = if nix::is_installed(settings) {
        "yes".green()
    } else {
        "no".yellow()
    };
    println!("  {}: {}", "Prepared".dimmed(), prepared);
    match &settings.proxy {
        Some(proxy) => println!(
            "  {}: {} (no_proxy: {})",
            "Proxy".dimmed(),
            proxy.address.cyan(),
            proxy.no_proxy
        ),
        None => println!("  {}: {}", "Proxy".dimmed(), "none".dimmed()),
    }
    if let Some(url) = &settings.release_url {
        println!("  {}: {}", "Release URL".dimmed(), url.cyan());
    }
    Ok(())
}
