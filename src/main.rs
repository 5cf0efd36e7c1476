use clap::{Parser, Subcommand};
use colored::Colorize;
use nix2pkg::commands::{self, PackageArgs};
use nix2pkg::config::Settings;
use nix2pkg::nixpkgs::Channel;
use nix2pkg::{OutputFormat, PackageOptions, SystemRunner};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "nix2pkg")]
#[command(author, version, about = "Build Nix packages and repackage them as RPMs or macOS installer packages", long_about = None)]
#[command(after_help = "Example: get ffmpeg RPMs: nix2pkg prepare, nix2pkg package ffmpeg")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the Nix runtime as first time setup
    Prepare {
        /// Runtime archive (.tar.xz), local path or URL
        #[arg(long)]
        archive: Option<String>,

        /// Expected SHA-256 of the archive
        #[arg(long)]
        sha256: Option<String>,
    },

    /// Remove the Nix runtime and everything installed into its store
    Destroy {
        /// Actually remove files instead of listing them
        #[arg(long)]
        yes: bool,
    },

    /// Build packages and create installer packages for them and their dependencies
    Package {
        /// Package names, optionally with -<version> (e.g. wget-1.20.3)
        #[arg(required = true)]
        pkgs: Vec<String>,

        /// Attempt to build broken/unsupported packages
        #[arg(long)]
        force: bool,

        /// 'unstable', 'master', a release such as '21.11', or a tarball URL
        #[arg(long, default_value = "21.11")]
        repo: String,

        /// Build an ARM package
        #[arg(long)]
        arm: bool,

        /// Build an x86 package
        #[arg(long)]
        x86: bool,

        /// Maximum number of build jobs (clamped to the CPU count)
        #[arg(long)]
        max_jobs: Option<usize>,

        /// Print full build logs
        #[arg(long)]
        build_logs: bool,

        /// Create an Apple distribution pkg instead of RPMs
        #[arg(long)]
        pkg: bool,

        /// Chown the store to <USER>:wheel while packaging
        #[arg(long, value_name = "USER")]
        own_store: Option<String>,

        /// Directory for the nixpkgs checkout, specs and output
        #[arg(long, default_value = ".")]
        work_dir: PathBuf,
    },

    /// Search packages available from the configured channels
    Search {
        /// Query string
        term: String,
    },

    /// Show resolved paths and settings
    Config {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

async fn run(command: Commands) -> nix2pkg::Result<bool> {
    let settings = Settings::from_env()?;
    let runner = SystemRunner::new();

    match command {
        Commands::Prepare { archive, sha256 } => {
            commands::prepare(&runner, &settings, archive.as_deref(), sha256.as_deref()).await?;
        }
        Commands::Destroy { yes } => {
            commands::destroy(&runner, &settings, yes)?;
        }
        Commands::Package {
            pkgs,
            force,
            repo,
            arm,
            x86,
            max_jobs,
            build_logs,
            pkg,
            own_store,
            work_dir,
        } => {
            let channel: Channel = match repo.parse() {
                Ok(channel) => channel,
                Err(never) => match never {},
            };
            let args = PackageArgs {
                options: PackageOptions {
                    requested: pkgs,
                    force,
                    arm,
                    x86,
                    max_jobs: commands::clamp_jobs(max_jobs, num_cpus::get()),
                    build_logs,
                    format: if pkg {
                        OutputFormat::ApplePkg
                    } else {
                        OutputFormat::Rpm
                    },
                },
                channel,
                own_store,
                work_dir,
            };
            return commands::package(&runner, &settings, &args).await;
        }
        Commands::Search { term } => {
            commands::search(&runner, &settings, &term)?;
        }
        Commands::Config { json } => {
            commands::config(&settings, json)?;
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    nix2pkg::colors::init_colors(cli.no_color);

    match run(cli.command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            if cli.verbose {
                let mut source = std::error::Error::source(&e);
                while let Some(cause) = source {
                    eprintln!("  caused by: {}", cause);
                    source = cause.source();
                }
            }
            ExitCode::FAILURE
        }
    }
}
