// src/filesystem/mod.rs

//! Filesystem helpers
//!
//! This module provides:
//! - [`RootedPath`], containment-checked path resolution inside a project
//! - Tree copies used to move tool caches into the output directory

pub mod path;

pub use path::RootedPath;

use crate::error::{Error, Result};
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Recursively copy `src` into `dest`, keeping files that already exist
///
/// Returns the number of files copied. A missing `src` copies nothing.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<usize> {
    if !src.exists() {
        debug!("Nothing to copy, {} does not exist", src.display());
        return Ok(0);
    }

    let mut copied = 0;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| {
            Error::IoError(format!("Failed to walk {}: {}", src.display(), e))
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::IoError(format!("Failed to relativize path: {}", e)))?;
        let target = dest.join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| {
                Error::IoError(format!("Failed to create {}: {}", target.display(), e))
            })?;
        } else if entry.file_type().is_file() && !target.exists() {
            std::fs::copy(entry.path(), &target).map_err(|e| {
                Error::IoError(format!(
                    "Failed to copy {} to {}: {}",
                    entry.path().display(),
                    target.display(),
                    e
                ))
            })?;
            copied += 1;
        }
    }

    debug!("Copied {} files from {} to {}", copied, src.display(), dest.display());
    Ok(copied)
}
