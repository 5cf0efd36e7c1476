//! Store path parsing and artifact naming.
//!
//! Every package Nix builds lands in the store under a content-addressed
//! basename:
//!
//! ```text
//! /nix/store/0c3kglq4xq7y6p6wnw0z4ggfmjcnv3ss-wget-1.21.2
//!            \______________________________/ \_________/
//!                       32-char hash              name
//! ```
//!
//! The `(hash, name)` pair is the identity of a package everywhere downstream:
//! RPM names, component package file names and installer identifiers are all
//! derived from it. Names may contain `+` (`gtk+3`), which some artifact hosts
//! reject, so every generated name goes through [`sanitize`].
//!
//! # Examples
//!
//! ```
//! use nix2pkg::store_path::StorePath;
//!
//! let path = StorePath::parse("/nix/store/0c3kglq4xq7y6p6wnw0z4ggfmjcnv3ss-gtk+3-3.24").unwrap();
//! assert_eq!(path.hash(), "0c3kglq4xq7y6p6wnw0z4ggfmjcnv3ss");
//! assert_eq!(path.name(), "gtk+3-3.24");
//! assert_eq!(path.rpm_name(), "nix2rpm-gtkplus3-3.24-0c3kglq4xq7y6p6wnw0z4ggfmjcnv3ss");
//! ```

use crate::error::{Nix2PkgError, Result};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn store_path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^.*/([a-z0-9]{32})-(.*)$").expect("store path pattern is valid")
    })
}

/// Replace characters artifact hosts reject
pub fn sanitize(name: &str) -> String {
    name.replace('+', "plus")
}

/// A parsed `<hash>-<name>` store path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StorePath {
    path: PathBuf,
    hash: String,
    name: String,
}

impl StorePath {
    /// Split a store path into hash and name.
    ///
    /// The path must contain a `/` followed by exactly 32 lowercase
    /// alphanumerics, a dash and a name.
    pub fn parse(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = path.to_string_lossy();
        let caps = store_path_pattern()
            .captures(&text)
            .ok_or_else(|| Nix2PkgError::InvalidStorePath(text.to_string()))?;

        Ok(Self {
            path: path.to_path_buf(),
            hash: caps[1].to_string(),
            name: caps[2].to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `(hash, name)` pair
    pub fn pair(&self) -> (&str, &str) {
        (&self.hash, &self.name)
    }

    /// `nix2rpm-<name>-<hash>`
    pub fn rpm_name(&self) -> String {
        rpm_name(&self.name, &self.hash)
    }

    /// `<name>-<hash>.spec`
    pub fn spec_file_name(&self) -> String {
        format!("{}-{}.spec", self.name, self.hash)
    }

    /// `<name>-<hash>.pkg`
    pub fn component_pkg_name(&self) -> String {
        sanitize(&format!("{}-{}.pkg", self.name, self.hash))
    }

    /// `nix2pkg-<name>-<hash>.pkg`
    pub fn distribution_pkg_name(&self) -> String {
        sanitize(&format!("nix2pkg-{}-{}.pkg", self.name, self.hash))
    }

    /// Installer identifier for the component package
    pub fn pkg_identifier(&self) -> String {
        format!("com.nix2pkg.{}-{}", self.hash, self.name)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// RPM package name for a `(name, hash)` pair
pub fn rpm_name(name: &str, hash: &str) -> String {
    sanitize(&format!("nix2rpm-{}-{}", name, hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0c3kglq4xq7y6p6wnw0z4ggfmjcnv3ss";

    #[test]
    fn test_parse_valid() {
        let path = StorePath::parse(format!("/nix/store/{}-wget-1.21.2", HASH)).unwrap();
        assert_eq!(path.hash(), HASH);
        assert_eq!(path.name(), "wget-1.21.2");
        assert_eq!(path.pair(), (HASH, "wget-1.21.2"));
        assert_eq!(
            path.path(),
            Path::new(&format!("/nix/store/{}-wget-1.21.2", HASH))
        );
    }

    #[test]
    fn test_parse_name_with_dashes() {
        let path = StorePath::parse(format!("/nix/store/{}-python3.9-six-1.16.0", HASH)).unwrap();
        assert_eq!(path.name(), "python3.9-six-1.16.0");
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        // No directory component
        assert!(StorePath::parse(format!("{}-wget", HASH)).is_err());
        // Short hash
        assert!(StorePath::parse("/nix/store/abc123-wget").is_err());
        // Uppercase hash
        assert!(StorePath::parse(format!("/nix/store/{}-wget", HASH.to_uppercase())).is_err());
        // Missing dash
        assert!(StorePath::parse(format!("/nix/store/{}wget", HASH)).is_err());
        assert!(StorePath::parse("").is_err());
    }

    #[test]
    fn test_parse_error_kind() {
        match StorePath::parse("/tmp/not-a-store-path") {
            Err(Nix2PkgError::InvalidStorePath(p)) => assert_eq!(p, "/tmp/not-a-store-path"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("gtk+3"), "gtkplus3");
        assert_eq!(sanitize("a++b+"), "aplusplusbplus");
        assert_eq!(sanitize("wget"), "wget");
        assert_eq!(sanitize(""), "");
    }

    #[test]
    fn test_sanitize_idempotent() {
        for name in ["gtk+3", "c++", "libsigc++-2.10", "plain"] {
            let once = sanitize(name);
            assert_eq!(sanitize(&once), once);
            assert!(!once.contains('+'));
        }
    }

    #[test]
    fn test_artifact_names() {
        let path = StorePath::parse(format!("/nix/store/{}-libsigc++-2.10", HASH)).unwrap();
        assert_eq!(path.rpm_name(), format!("nix2rpm-libsigcplusplus-2.10-{}", HASH));
        assert_eq!(
            path.component_pkg_name(),
            format!("libsigcplusplus-2.10-{}.pkg", HASH)
        );
        assert_eq!(
            path.distribution_pkg_name(),
            format!("nix2pkg-libsigcplusplus-2.10-{}.pkg", HASH)
        );
        assert_eq!(path.spec_file_name(), format!("libsigc++-2.10-{}.spec", HASH));
        assert_eq!(
            path.pkg_identifier(),
            format!("com.nix2pkg.{}-libsigc++-2.10", HASH)
        );
    }
}
