//! Nix install layout - where the store, profiles and config live

use crate::platform::HostArch;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Default install root; override with `NIX2PKG_ROOT`
pub const DEFAULT_INSTALL_ROOT: &str = "/nix";

/// Line written to nix.conf so builds can run as root without build users
pub const NIX_CONF_CONTENTS: &str = "build-users-group =";

/// Store basename of the nix package shipped in the bootstrap archive
pub fn default_nix_package(arch: HostArch) -> &'static str {
    match arch {
        HostArch::Aarch64 => "53r8ay20mygy2sifn7j2p8wjqlx2kxik-nix-2.19.2",
        HostArch::X86_64 => "68mfbnrkd4kghrai35f9rz6hn737fn98-nix-2.3.14pre7112_bd4e03d",
    }
}

/// Store basename of the CA bundle shipped in the bootstrap archive
pub fn default_ca_package(arch: HostArch) -> &'static str {
    match arch {
        HostArch::Aarch64 => "8ma7xas2nb0i3lq8mm7fpgalv94s8pzh-nss-cacert-3.92",
        HostArch::X86_64 => "8k0nxlkbmw6am0mn5xm5j7p0ir1z5g65-nss-cacert-3.66",
    }
}

/// Filesystem layout of a Nix installation rooted at `root`
#[derive(Debug, Clone, Serialize)]
pub struct NixLayout {
    root: PathBuf,
    nix_package: String,
    ca_package: String,
}

impl NixLayout {
    pub fn new(
        root: impl Into<PathBuf>,
        nix_package: impl Into<String>,
        ca_package: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            nix_package: nix_package.into(),
            ca_package: ca_package.into(),
        }
    }

    /// Layout with the pinned package versions for `arch`
    pub fn for_arch(root: impl Into<PathBuf>, arch: HostArch) -> Self {
        Self::new(root, default_nix_package(arch), default_ca_package(arch))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> PathBuf {
        self.root.join("store")
    }

    pub fn nix_package(&self) -> PathBuf {
        self.store().join(&self.nix_package)
    }

    pub fn nix_bin(&self) -> PathBuf {
        self.nix_package().join("bin")
    }

    pub fn nix(&self) -> PathBuf {
        self.nix_bin().join("nix")
    }

    pub fn nix_env(&self) -> PathBuf {
        self.nix_bin().join("nix-env")
    }

    pub fn nix_store(&self) -> PathBuf {
        self.nix_bin().join("nix-store")
    }

    pub fn ca_package(&self) -> PathBuf {
        self.store().join(&self.ca_package)
    }

    pub fn ca_bundle(&self) -> PathBuf {
        self.ca_package().join("etc/ssl/certs/ca-bundle.crt")
    }

    pub fn var(&self) -> PathBuf {
        self.root.join("var")
    }

    pub fn state(&self) -> PathBuf {
        self.var().join("nix")
    }

    pub fn profiles(&self) -> PathBuf {
        self.state().join("profiles")
    }

    pub fn log(&self) -> PathBuf {
        self.var().join("log/nix")
    }

    pub fn conf(&self) -> PathBuf {
        self.root.join("conf")
    }

    pub fn config_file(&self) -> PathBuf {
        self.conf().join("nix/nix.conf")
    }

    /// Dedicated profile per requested package, so builds don't see each other
    pub fn profile_for(&self, package: &str) -> PathBuf {
        self.profiles().join(format!("nix2rpm_{}", package))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = NixLayout::new("/nix", "aaa-nix-2.19.2", "bbb-nss-cacert");
        assert_eq!(layout.store(), PathBuf::from("/nix/store"));
        assert_eq!(
            layout.nix_env(),
            PathBuf::from("/nix/store/aaa-nix-2.19.2/bin/nix-env")
        );
        assert_eq!(
            layout.ca_bundle(),
            PathBuf::from("/nix/store/bbb-nss-cacert/etc/ssl/certs/ca-bundle.crt")
        );
        assert_eq!(layout.profiles(), PathBuf::from("/nix/var/nix/profiles"));
        assert_eq!(layout.log(), PathBuf::from("/nix/var/log/nix"));
        assert_eq!(layout.config_file(), PathBuf::from("/nix/conf/nix/nix.conf"));
    }

    #[test]
    fn test_profile_for() {
        let layout = NixLayout::for_arch("/opt/nix", HostArch::Aarch64);
        assert_eq!(
            layout.profile_for("wget"),
            PathBuf::from("/opt/nix/var/nix/profiles/nix2rpm_wget")
        );
    }

    #[test]
    fn test_pinned_packages_differ_per_arch() {
        assert_ne!(
            default_nix_package(HostArch::Aarch64),
            default_nix_package(HostArch::X86_64)
        );
        assert!(default_ca_package(HostArch::X86_64).contains("nss-cacert"));
    }
}
