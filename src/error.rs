use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Nix2PkgError {
    #[error("Expected a .tar.xz archive, got: {}", .0.display())]
    WrongArchiveType(PathBuf),

    #[error("Nix directory missing on system: {}", .0.display())]
    NixMissing(PathBuf),

    #[error("nix2pkg needs to be prepared (run `nix2pkg prepare` first)")]
    NotPrepared,

    #[error("No store path found for build outputs: {}", .0.join(", "))]
    PackagePathNotFound(Vec<String>),

    #[error("Path did not match <hash>-<name> store pattern: {0}")]
    InvalidStorePath(String),

    #[error("Package could not be built: {0}")]
    BuildFailed(String),

    #[error("{program} exited with code {code}")]
    ToolFailed { program: String, code: i32 },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Nix2PkgError>;
