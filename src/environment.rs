//! Environment overlay applied to every Nix invocation.
//!
//! The Nix binaries find their store, state and config through `NIX_*`
//! variables. Instead of exporting those into our own process, a
//! [`NixEnvironment`] is built up front and attached to each
//! [`ToolCommand`](crate::process::ToolCommand); the child sees the overlay on
//! top of the inherited environment and the parent stays untouched.

use crate::config::Settings;
use std::collections::BTreeMap;

/// Per-invocation environment for Nix tools
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NixEnvironment {
    vars: BTreeMap<String, String>,
}

impl NixEnvironment {
    /// Base environment for talking to the install described by `settings`.
    ///
    /// `inherited_path` is the caller's `PATH`; the user profile's `bin` is
    /// prepended to it.
    pub fn for_settings(settings: &Settings, inherited_path: Option<&str>) -> Self {
        let layout = &settings.layout;
        let home = settings.home.display();
        let profile = settings.user_profile();

        let mut env = Self::default();
        env.set("NIX_STORE_DIR", layout.store().display().to_string());
        env.set("NIX_STATE_DIR", layout.state().display().to_string());
        env.set("NIX_LOG_DIR", layout.log().display().to_string());
        env.set("NIX_CONF_DIR", layout.conf().display().to_string());
        env.set("NIX_SSL_CERT_FILE", layout.ca_bundle().display().to_string());
        env.set("NIX_PATH", format!("{}/.nix-defexpr/channels", home));
        env.set(
            "NIX_PROFILES",
            format!("{}/default {}", layout.profiles().display(), profile.display()),
        );

        let profile_bin = profile.join("bin");
        let path = match inherited_path {
            Some(rest) if !rest.is_empty() => format!("{}:{}", profile_bin.display(), rest),
            _ => profile_bin.display().to_string(),
        };
        env.set("PATH", path);
        env.set("NIXPKGS_ALLOW_UNFREE", "1");

        if let Some(proxy) = &settings.proxy {
            let address = proxy.address.as_str();
            env.set("no_proxy", proxy.no_proxy.clone());
            env.set("http_proxy", address);
            env.set("https_proxy", address);
            env.set("ftp_proxy", address);
            env.set(
                "CURL_NIX_FLAGS",
                format!("-x http://{} --proxy-insecure", address),
            );
        }

        env
    }

    /// Also allow insecure, broken and unsupported packages.
    ///
    /// Some packages only build this way, and it surfaces the reason a
    /// package is marked broken instead of a bare evaluation error.
    pub fn with_force(mut self) -> Self {
        self.set("NIXPKGS_ALLOW_INSECURE", "1");
        self.set("NIXPKGS_ALLOW_UNSUPPORTED_SYSTEM", "1");
        self.set("NIXPKGS_ALLOW_BROKEN", "1");
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
