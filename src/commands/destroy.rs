use crate::config::Settings;
use crate::error::Result;
use crate::installer::Installer;
use crate::process::Runner;
use colored::Colorize;

/// Remove the runtime. Without `yes` only lists what would go.
pub fn destroy(runner: &dyn Runner, settings: &Settings, yes: bool) -> Result<()> {
    let installer = Installer::new(runner, settings);
    let plan = installer.removal_plan()?;

    if plan.is_empty() {
        println!("Nothing to remove");
        return Ok(());
    }

    if !yes {
        println!("{}", "==> Would remove".bold().yellow());
        for path in plan.home_files.iter().chain(&plan.state_dirs) {
            println!("  {}", path.display());
        }
        println!(
            "  {} store entries under {}",
            plan.store_entries.len().to_string().bold(),
            settings.layout.store().display()
        );
        println!();
        println!("Run with {} to remove them", "--yes".dimmed());
        return Ok(());
    }

    println!("{} Removing nix2pkg", "==>".bold().green());
    let failed = installer.removal()?;
    if failed == 0 {
        println!("{} Finished removal", "✓".green());
    } else {
        println!(
            "{} Finished removal; {} paths could not be removed",
            "⚠".yellow(),
            failed.to_string().bold()
        );
    }
    Ok(())
}
