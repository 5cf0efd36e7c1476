//! Runtime settings resolved from the environment.
//!
//! nix2pkg has no config file; everything that differs between hosts comes
//! from `NIX2PKG_*` variables:
//!
//! | Variable               | Meaning                                    | Default            |
//! |------------------------|--------------------------------------------|--------------------|
//! | `NIX2PKG_ROOT`         | Nix install root                           | `/nix`             |
//! | `NIX2PKG_ARCH`         | Host architecture override                 | detected           |
//! | `NIX2PKG_NIX_PACKAGE`  | Store basename of the nix package          | pinned per arch    |
//! | `NIX2PKG_CA_PACKAGE`   | Store basename of the CA bundle package    | pinned per arch    |
//! | `NIX2PKG_PROXY`        | Forward proxy (`host:port`) for Nix        | none               |
//! | `NIX2PKG_NO_PROXY`     | `no_proxy` list used with the proxy        | `localhost`        |
//! | `NIX2PKG_RELEASE_URL`  | Runtime archive fetched by `prepare`       | none               |
//!
//! Settings are read once in `main` and passed down explicitly; nothing
//! below this module reads the process environment for configuration.

use crate::paths::{self, DEFAULT_INSTALL_ROOT, NixLayout};
use crate::platform::HostArch;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;

/// Forward proxy used by Nix when fetching sources
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxySettings {
    pub address: String,
    pub no_proxy: String,
}

/// Everything nix2pkg needs to know about the host
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub arch: HostArch,
    pub layout: NixLayout,
    pub home: PathBuf,
    pub proxy: Option<ProxySettings>,
    pub release_url: Option<String>,
}

impl Settings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let arch = match get("NIX2PKG_ARCH") {
            Some(value) => HostArch::parse(&value).context("Invalid NIX2PKG_ARCH")?,
            None => HostArch::detect(),
        };

        let root = get("NIX2PKG_ROOT").unwrap_or_else(|| DEFAULT_INSTALL_ROOT.to_string());
        let nix_package =
            get("NIX2PKG_NIX_PACKAGE").unwrap_or_else(|| paths::default_nix_package(arch).into());
        let ca_package =
            get("NIX2PKG_CA_PACKAGE").unwrap_or_else(|| paths::default_ca_package(arch).into());

        let home = get("HOME").context("HOME is not set")?;

        let proxy = get("NIX2PKG_PROXY").map(|address| ProxySettings {
            address,
            no_proxy: get("NIX2PKG_NO_PROXY").unwrap_or_else(|| "localhost".to_string()),
        });

        Ok(Self {
            arch,
            layout: NixLayout::new(root, nix_package, ca_package),
            home: PathBuf::from(home),
            proxy,
            release_url: get("NIX2PKG_RELEASE_URL"),
        })
    }

    /// `~/.nix-profile`
    pub fn user_profile(&self) -> PathBuf {
        self.home.join(".nix-profile")
    }

    /// `~/.nix-defexpr`
    pub fn user_defexpr(&self) -> PathBuf {
        self.home.join(".nix-defexpr")
    }

    /// `~/.nix-channels`
    pub fn user_channels(&self) -> PathBuf {
        self.home.join(".nix-channels")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(lookup(&[("HOME", "/Users/test")])).unwrap();
        assert_eq!(settings.layout.root(), Path::new("/nix"));
        assert_eq!(settings.arch, HostArch::detect());
        assert!(settings.proxy.is_none());
        assert!(settings.release_url.is_none());
        assert_eq!(
            settings.user_profile(),
            PathBuf::from("/Users/test/.nix-profile")
        );
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::from_lookup(lookup(&[
            ("HOME", "/home/me"),
            ("NIX2PKG_ROOT", "/opt/nix"),
            ("NIX2PKG_ARCH", "arm64"),
            ("NIX2PKG_NIX_PACKAGE", "abc-nix-2.20"),
            ("NIX2PKG_PROXY", "proxy:8080"),
        ]))
        .unwrap();

        assert_eq!(settings.arch, HostArch::Aarch64);
        assert_eq!(
            settings.layout.nix_package(),
            PathBuf::from("/opt/nix/store/abc-nix-2.20")
        );
        assert_eq!(
            settings.layout.ca_package(),
            PathBuf::from("/opt/nix/store").join(paths::default_ca_package(HostArch::Aarch64))
        );
        let proxy = settings.proxy.unwrap();
        assert_eq!(proxy.address, "proxy:8080");
        assert_eq!(proxy.no_proxy, "localhost");
    }

    #[test]
    fn test_empty_values_fall_back_to_defaults() {
        let settings =
            Settings::from_lookup(lookup(&[("HOME", "/h"), ("NIX2PKG_ROOT", "")])).unwrap();
        assert_eq!(settings.layout.root(), Path::new("/nix"));
    }

    #[test]
    fn test_missing_home_is_error() {
        assert!(Settings::from_lookup(lookup(&[])).is_err());
    }

    #[test]
    fn test_bad_arch_is_error() {
        let result = Settings::from_lookup(lookup(&[("HOME", "/h"), ("NIX2PKG_ARCH", "sparc")]));
        assert!(result.is_err());
    }
}
