//! Closure discovery: which store paths need packaging for a build.
//!
//! A build produces one or more output basenames. Each output is located in
//! the store, its transitive closure is queried from `nix-store`, and the
//! union becomes the set of packages to emit. Per package, the direct
//! references become its `Requires:` list.

use crate::error::{Nix2PkgError, Result};
use crate::nix::Nix;
use crate::store_path::StorePath;
use anyhow::Context;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Store directories whose basename contains any of `output_names`
pub fn find_roots(store: &Path, output_names: &[String]) -> Result<Vec<PathBuf>> {
    let mut roots = Vec::new();
    for entry in fs::read_dir(store)
        .with_context(|| format!("Failed to read store: {}", store.display()))?
    {
        let entry = entry?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if output_names.iter().any(|name| file_name.contains(name.as_str()))
            && entry.path().is_dir()
        {
            roots.push(entry.path());
        }
    }
    roots.sort();
    Ok(roots)
}

/// Every store path that must be packaged for `output_names`.
///
/// Fails with [`Nix2PkgError::PackagePathNotFound`] when no store entry
/// matches. The result is deduplicated and sorted.
pub fn packages_to_pack(nix: &Nix<'_>, output_names: &[String]) -> Result<Vec<PathBuf>> {
    let store = nix.layout().store();
    let roots = find_roots(&store, output_names)?;
    if roots.is_empty() {
        return Err(Nix2PkgError::PackagePathNotFound(output_names.to_vec()));
    }

    let mut closure = BTreeSet::new();
    for root in &roots {
        let requisites = nix.requisites(root)?;
        debug!("{} has {} requisites", root.display(), requisites.len());
        closure.extend(requisites.into_iter().map(PathBuf::from));
    }
    Ok(closure.into_iter().collect())
}

/// Direct dependencies of `path`, parsed
pub fn references(nix: &Nix<'_>, path: &Path) -> Result<Vec<StorePath>> {
    nix.references(path)?
        .iter()
        .map(StorePath::parse)
        .collect()
}

/// Dependencies other than the package itself
pub fn requires_for<'d>(package: &StorePath, deps: &'d [StorePath]) -> Vec<&'d StorePath> {
    deps.iter()
        .filter(|dep| dep.hash() != package.hash())
        .collect()
}
