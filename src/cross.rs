//! Cross-compile expansion of the requested package list.
//!
//! `--arm` / `--x86` select which architectures to package for. The host's
//! own architecture is built natively; the other one is reached through the
//! `pkgsCross.<system>.<attr>` attribute set in nixpkgs.

use crate::platform::HostArch;

/// Marker that identifies an attribute as already cross-compiled
pub const CROSS_MARKER: &str = "pkgsCross";

/// Expand each requested attribute into native and/or cross variants.
///
/// - With neither flag set the list is returned unchanged.
/// - Attributes already containing `pkgsCross` pass through once.
/// - Otherwise the native attribute comes first (if the host's own
///   architecture was requested), followed by the cross attribute (if the
///   other architecture was requested).
pub fn expand(pkgs: &[String], arm: bool, x86: bool, host: HostArch) -> Vec<String> {
    if !arm && !x86 {
        return pkgs.to_vec();
    }

    let wants = |arch: HostArch| match arch {
        HostArch::Aarch64 => arm,
        HostArch::X86_64 => x86,
    };
    let target = host.other();

    let mut expanded = Vec::with_capacity(pkgs.len() * 2);
    for pkg in pkgs {
        if pkg.contains(CROSS_MARKER) {
            expanded.push(pkg.clone());
            continue;
        }
        if wants(host) {
            expanded.push(pkg.clone());
        }
        if wants(target) {
            expanded.push(format!(
                "{}.{}.{}",
                CROSS_MARKER,
                target.cross_system(),
                pkg
            ));
        }
    }
    expanded
}
