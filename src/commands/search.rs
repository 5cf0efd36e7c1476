use crate::commands::{ensure_prepared, nix_environment};
use crate::config::Settings;
use crate::error::Result;
use crate::nix::Nix;
use crate::process::Runner;
use colored::Colorize;

pub fn search(runner: &dyn Runner, settings: &Settings, term: &str) -> Result<()> {
    ensure_prepared(settings)?;
    let nix = Nix::new(runner, &settings.layout, nix_environment(settings));

    println!("Searching for: {}", term.cyan());
    let matches = nix.search(term)?;
    if matches.is_empty() {
        println!("No packages found");
        return Ok(());
    }

    println!(
        "{} Found {} packages",
        "==>".bold().green(),
        matches.len().to_string().bold()
    );
    for name in &matches {
        println!("  {}", name);
    }
    Ok(())
}
