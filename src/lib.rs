//! Library interface for nix2pkg
//!
//! nix2pkg builds packages with Nix and repackages each store path of the
//! result's closure as an RPM or an Apple installer package. The binary is a
//! thin clap front end over [`commands`]; everything else is exposed for
//! testing.

pub mod apple;
pub mod closure;
pub mod colors;
pub mod commands;
pub mod config;
pub mod cross;
pub mod download;
pub mod environment;
pub mod error;
pub mod installer;
pub mod nix;
pub mod nixpkgs;
pub mod paths;
pub mod pipeline;
pub mod platform;
pub mod process;
pub mod receipt;
pub mod rpm;
pub mod store_path;

// Re-export commonly used types
pub use error::{Nix2PkgError, Result};
pub use pipeline::{OutputFormat, PackageOptions, PackagingReport, Pipeline};
pub use process::{Runner, SystemRunner, ToolCommand, ToolOutput};
pub use store_path::{StorePath, sanitize};
