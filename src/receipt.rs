//! Packaging receipts.
//!
//! Every `package` run leaves a `PACKAGING_RECEIPT.json` next to its
//! artifacts recording what was asked for, what was built and where the
//! results went:
//!
//! ```text
//! <work>/output/
//!   PACKAGING_RECEIPT.json
//!   aarch64/nix2rpm-wget-<hash>-1-0.aarch64.rpm
//!   ...
//! ```

use crate::pipeline::{OutputFormat, PackagingReport};
use crate::platform::HostArch;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const RECEIPT_FILE: &str = "PACKAGING_RECEIPT.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackagingReceipt {
    pub nix2pkg_version: String,
    pub time: DateTime<Utc>,
    pub arch: String,
    pub format: String,
    pub channel: String,
    #[serde(default)]
    pub requested: Vec<String>,
    #[serde(default)]
    pub targets: Vec<String>,
    /// Store paths an artifact was produced for
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<String>,
}

impl PackagingReceipt {
    pub fn from_report(
        report: &PackagingReport,
        requested: &[String],
        arch: HostArch,
        format: OutputFormat,
        channel: &str,
    ) -> Self {
        Self {
            nix2pkg_version: env!("CARGO_PKG_VERSION").to_string(),
            time: Utc::now(),
            arch: arch.rpm_arch().to_string(),
            format: format.to_string(),
            channel: channel.to_string(),
            requested: requested.to_vec(),
            targets: report.targets.clone(),
            packages: report
                .packaged
                .iter()
                .map(|p| p.path().display().to_string())
                .collect(),
            artifacts: report.artifacts.clone(),
            success: report.success(),
            failed: report.failed.clone(),
        }
    }

    /// Read the receipt in `output_dir`
    pub fn read(output_dir: &Path) -> Result<Self> {
        let receipt_path = output_dir.join(RECEIPT_FILE);
        let contents = fs::read_to_string(&receipt_path)
            .with_context(|| format!("Failed to read receipt: {}", receipt_path.display()))?;
        serde_json::from_str(&contents).context("Failed to parse packaging receipt")
    }

    /// Write the receipt into `output_dir`, returning its path
    pub fn write(&self, output_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;
        let receipt_path = output_dir.join(RECEIPT_FILE);
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize packaging receipt")?;
        fs::write(&receipt_path, json)
            .with_context(|| format!("Failed to write receipt: {}", receipt_path.display()))?;
        Ok(receipt_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store_path::StorePath;

    #[test]
    fn test_receipt_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let report = PackagingReport {
            targets: vec!["wget".into(), "pkgsCross.aarch64-darwin.wget".into()],
            packaged: vec![
                StorePath::parse("/nix/store/aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-wget").unwrap(),
            ],
            failed: Some("/nix/store/bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb-libcurl".into()),
            ..PackagingReport::default()
        };
        let receipt = PackagingReceipt::from_report(
            &report,
            &["wget".to_string()],
            HostArch::X86_64,
            OutputFormat::Rpm,
            "21.11",
        );
        assert!(!receipt.success);
        assert_eq!(receipt.arch, "x86_64");
        assert_eq!(receipt.format, "rpm");

        let path = receipt.write(dir.path()).unwrap();
        assert_eq!(path, dir.path().join(RECEIPT_FILE));
        let read_back = PackagingReceipt::read(dir.path()).unwrap();
        assert_eq!(read_back, receipt);
    }

    #[test]
    fn test_receipt_omits_failed_on_success() {
        let receipt = PackagingReceipt::from_report(
            &PackagingReport::default(),
            &[],
            HostArch::Aarch64,
            OutputFormat::ApplePkg,
            "unstable",
        );
        let json = serde_json::to_string(&receipt).unwrap();
        assert!(!json.contains("\"failed\""));
        assert!(json.contains("\"format\":\"apple-pkg\""));
    }
}
