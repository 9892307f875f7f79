// src/request.rs

//! Inbound request model
//!
//! A request names the source tree, the output directory and one entry per
//! package to prefetch. Entries are tagged by ecosystem:
//!
//! ```json
//! [{"type": "gomod", "path": "."},
//!  {"type": "pip", "path": "tools", "allow_binary": true}]
//! ```

use crate::error::{Error, Result};
use crate::filesystem::RootedPath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use strum_macros::{Display, EnumString};

/// How strictly inconsistencies are treated
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    /// Any detected inconsistency aborts the request
    #[default]
    Strict,
    /// Inconsistencies are logged and processing continues
    Permissive,
}

/// Optional behavior switches
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Flag {
    /// Build Go packages with `CGO_ENABLED=0`
    CgoDisable,
    /// Accepted for compatibility, no effect
    ForceGomodTidy,
    /// Accepted for compatibility, no effect
    GomodVendor,
}

/// Supported package managers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum PackageManager {
    Gomod,
    Pip,
}

fn default_package_path() -> PathBuf {
    PathBuf::from(".")
}

/// One package to process, tagged by ecosystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PackageInput {
    Gomod {
        #[serde(default = "default_package_path")]
        path: PathBuf,
    },
    Pip {
        #[serde(default = "default_package_path")]
        path: PathBuf,
        /// Runtime requirements files; `None` uses `requirements.txt` if present
        #[serde(default)]
        requirements_files: Option<Vec<PathBuf>>,
        /// Build requirements files; `None` uses `requirements-build.txt` if present
        #[serde(default)]
        requirements_build_files: Option<Vec<PathBuf>>,
        #[serde(default)]
        allow_binary: bool,
    },
}

impl PackageInput {
    pub fn gomod(path: impl Into<PathBuf>) -> Self {
        Self::Gomod { path: path.into() }
    }

    pub fn pip(path: impl Into<PathBuf>) -> Self {
        Self::Pip {
            path: path.into(),
            requirements_files: None,
            requirements_build_files: None,
            allow_binary: false,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Gomod { path } | Self::Pip { path, .. } => path,
        }
    }

    pub fn package_manager(&self) -> PackageManager {
        match self {
            Self::Gomod { .. } => PackageManager::Gomod,
            Self::Pip { .. } => PackageManager::Pip,
        }
    }

    /// Parse the command-line form of the package list
    ///
    /// Accepts a bare package manager name (`gomod`), a JSON object, or a
    /// JSON list of objects.
    pub fn parse_list(input: &str) -> Result<Vec<Self>> {
        let trimmed = input.trim();
        if let Ok(manager) = trimmed.parse::<PackageManager>() {
            return Ok(vec![match manager {
                PackageManager::Gomod => Self::gomod("."),
                PackageManager::Pip => Self::pip("."),
            }]);
        }

        let value: serde_json::Value = serde_json::from_str(trimmed)
            .map_err(|e| Error::ParseError(format!("Invalid package input: {}", e)))?;
        let items = match value {
            serde_json::Value::Array(items) => items,
            other => vec![other],
        };
        items
            .into_iter()
            .map(|item| {
                serde_json::from_value(item)
                    .map_err(|e| Error::ParseError(format!("Invalid package input: {}", e)))
            })
            .collect()
    }
}

/// Check that a path is relative and does not climb out with `..`
fn check_sane_relpath(path: &Path) -> Result<()> {
    if path.is_absolute() {
        return Err(Error::InvalidPath(format!(
            "path must be relative: {}",
            path.display()
        )));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(Error::InvalidPath(format!(
            "path contains ..: {}",
            path.display()
        )));
    }
    Ok(())
}

/// A validated prefetch request
#[derive(Debug, Clone)]
pub struct Request {
    pub source_dir: RootedPath,
    pub output_dir: RootedPath,
    pub packages: Vec<PackageInput>,
    pub flags: BTreeSet<Flag>,
    pub mode: Mode,
}

impl Request {
    /// Build a request, validating every package entry
    ///
    /// Package paths must be relative, stay inside the source directory and
    /// name an existing directory. Identical entries are collapsed; two
    /// different entries for the same ecosystem and path are a conflict.
    pub fn new(
        source_dir: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
        packages: Vec<PackageInput>,
    ) -> Result<Self> {
        let source_dir = RootedPath::new(source_dir)?;
        let output_dir = {
            let path = output_dir.as_ref();
            std::fs::create_dir_all(path).map_err(|e| {
                Error::IoError(format!("Failed to create {}: {}", path.display(), e))
            })?;
            RootedPath::new(path)?
        };

        let mut unique: Vec<PackageInput> = Vec::new();
        for package in packages {
            Self::validate_package(&source_dir, &package)?;
            let conflict = unique.iter().find(|existing| {
                existing.package_manager() == package.package_manager()
                    && existing.path() == package.path()
            });
            match conflict {
                Some(existing) if *existing == package => continue,
                Some(existing) => {
                    return Err(Error::InvalidPath(format!(
                        "conflicting package definitions for {} at {}: {:?} X {:?}",
                        package.package_manager(),
                        package.path().display(),
                        existing,
                        package
                    )));
                }
                None => unique.push(package),
            }
        }

        Ok(Self {
            source_dir,
            output_dir,
            packages: unique,
            flags: BTreeSet::new(),
            mode: Mode::default(),
        })
    }

    pub fn with_flags(mut self, flags: impl IntoIterator<Item = Flag>) -> Self {
        self.flags.extend(flags);
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn has_flag(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }

    /// Packages handled by one package manager, in request order
    pub fn packages_for(&self, manager: PackageManager) -> impl Iterator<Item = &PackageInput> {
        self.packages
            .iter()
            .filter(move |p| p.package_manager() == manager)
    }

    fn validate_package(source_dir: &RootedPath, package: &PackageInput) -> Result<()> {
        check_sane_relpath(package.path())?;
        let abspath = source_dir.join_within_root(package.path())?;
        if !abspath.path().is_dir() {
            return Err(Error::InvalidPath(format!(
                "package path does not exist (or is not a directory): {}",
                package.path().display()
            )));
        }

        if let PackageInput::Pip {
            requirements_files,
            requirements_build_files,
            ..
        } = package
        {
            for file in requirements_files
                .iter()
                .chain(requirements_build_files.iter())
                .flatten()
            {
                check_sane_relpath(file)?;
            }
        }
        Ok(())
    }
}
