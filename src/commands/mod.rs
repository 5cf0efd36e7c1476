//! Command implementations for the nix2pkg CLI
//!
//! - **prepare**: install the Nix runtime from a release archive
//! - **destroy**: remove the runtime, its state and profile links
//! - **package**: build packages and emit RPMs or Apple installer packages
//! - **search**: list packages available from the configured channels
//! - **config**: show resolved settings

pub mod config;
pub mod destroy;
pub mod package;
pub mod prepare;
pub mod search;

pub use config::config;
pub use destroy::destroy;
pub use package::{PackageArgs, clamp_jobs, package, write_receipt};
pub use prepare::prepare;
pub use search::search;

use crate::config::Settings;
use crate::environment::NixEnvironment;
use crate::error::{Nix2PkgError, Result};
use crate::nix;

/// Fail with [`Nix2PkgError::NotPrepared`] unless the runtime is installed
pub(crate) fn ensure_prepared(settings: &Settings) -> Result<()> {
    if nix::is_installed(settings) {
        Ok(())
    } else {
        Err(Nix2PkgError::NotPrepared)
    }
}

/// Overlay for Nix invocations, layered over the caller's `PATH`
pub(crate) fn nix_environment(settings: &Settings) -> NixEnvironment {
    let path = std::env::var("PATH").ok();
    NixEnvironment::for_settings(settings, path.as_deref())
}
