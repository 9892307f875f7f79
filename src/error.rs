// src/error.rs

//! Crate-wide error type
//!
//! Every failure surfaced by the engine is one of these variants. Rejections
//! and unsupported features carry an optional remediation hint that is
//! appended to the rendered message.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while resolving, fetching and verifying dependencies
#[derive(Error, Debug)]
pub enum Error {
    /// The input violates a required invariant and will not be auto-corrected
    #[error("{reason}{}", render_solution(.solution))]
    PackageRejected {
        reason: String,
        solution: Option<String>,
    },

    /// The input is valid but uses a construct that is intentionally not supported
    #[error("{reason}{}", render_solution(.solution))]
    UnsupportedFeature {
        reason: String,
        solution: Option<String>,
    },

    /// A network-dependent operation failed after exhausting its retries
    #[error("Fetch failed: {0}")]
    FetchError(String),

    /// A downloaded artifact did not match any expected checksum
    #[error("Failed to verify {artifact} against any of the provided checksums (expected {expected}, got {actual})")]
    ChecksumMismatch {
        artifact: String,
        expected: String,
        actual: String,
    },

    /// A path resolved to a location outside the project root
    #[error("Path {path} resolves outside of the root directory {root}")]
    PathOutsideRoot { path: PathBuf, root: PathBuf },

    /// An external command exited unsuccessfully
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// A version could not be derived from repository history
    #[error("Version resolution failed: {0}")]
    ResolutionError(String),

    /// Tool output or a manifest had an unexpected shape
    #[error("Unexpected format: {0}")]
    UnexpectedFormat(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Download error: {0}")]
    DownloadError(String),

    #[error("Initialization error: {0}")]
    InitError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

fn render_solution(solution: &Option<String>) -> String {
    match solution {
        Some(solution) => format!("\n  {}", solution.replace('\n', "\n  ")),
        None => String::new(),
    }
}

impl Error {
    /// Build a rejection without a remediation hint
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::PackageRejected {
            reason: reason.into(),
            solution: None,
        }
    }

    /// Build a rejection that tells the user how to fix the input
    pub fn rejected_with(reason: impl Into<String>, solution: impl Into<String>) -> Self {
        Self::PackageRejected {
            reason: reason.into(),
            solution: Some(solution.into()),
        }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::UnsupportedFeature {
            reason: reason.into(),
            solution: None,
        }
    }

    pub fn unsupported_with(reason: impl Into<String>, solution: impl Into<String>) -> Self {
        Self::UnsupportedFeature {
            reason: reason.into(),
            solution: Some(solution.into()),
        }
    }

    /// Whether this error belongs to the "rejected input" category
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::PackageRejected { .. } | Self::PathOutsideRoot { .. } | Self::ChecksumMismatch { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}
