// src/packages/gomod/work.rs

//! go.work workspaces

use super::go::GoTool;
use super::parse::parse_go_sum;
use crate::error::{Error, Result};
use crate::filesystem::RootedPath;
use crate::process::RunParams;
use crate::workspace::WorkspaceResolver;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::debug;

/// The parts of `go work edit -json` that resolution needs
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParsedGoWork {
    #[serde(default)]
    pub go: Option<String>,
    #[serde(default)]
    pub toolchain: Option<String>,
    #[serde(default, rename = "Use")]
    pub uses: Vec<GoWorkUse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GoWorkUse {
    pub disk_path: String,
}

impl ParsedGoWork {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::UnexpectedFormat(format!("Invalid go.work JSON: {}", e)))
    }
}

/// An active go.work file and its members
#[derive(Debug, Clone)]
pub struct GoWork {
    /// Directory containing go.work
    pub dir: RootedPath,
    pub parsed: ParsedGoWork,
}

impl GoWork {
    /// The workspace governing `app_dir`, if any
    ///
    /// `go env GOWORK` prints the go.work path, or nothing (or `off`) when
    /// the module is not part of a workspace.
    pub fn discover(go: &GoTool, app_dir: &RootedPath, params: &RunParams) -> Result<Option<Self>> {
        let params = params.in_dir(app_dir.path());
        let gowork = go.run(&["env", "GOWORK"], &params)?;
        let gowork = gowork.trim();
        if gowork.is_empty() || gowork == "off" {
            return Ok(None);
        }

        let gowork = PathBuf::from(gowork);
        let dir = match gowork.parent() {
            // Absolute, so this only checks containment
            Some(parent) => app_dir.join_within_root(parent)?,
            None => {
                return Err(Error::UnexpectedFormat(format!(
                    "go env GOWORK returned an invalid path: {}",
                    gowork.display()
                )));
            }
        };

        let json = go.run(&["work", "edit", "-json"], &params)?;
        let parsed = ParsedGoWork::from_json(&json)?;
        debug!("go.work in {} uses {} modules", dir.path().display(), parsed.uses.len());
        Ok(Some(Self { dir, parsed }))
    }

    /// Member directories that contain a go.mod, in declaration order
    pub fn workspace_paths(&self) -> Result<Vec<RootedPath>> {
        let members: Vec<&str> = self.parsed.uses.iter().map(|u| u.disk_path.as_str()).collect();
        Ok(WorkspaceResolver::new(&self.dir, "go.mod")
            .resolve_explicit(members.as_slice())?
            .into_iter()
            .map(|workspace| workspace.path)
            .collect())
    }

    /// Every member's go.sum followed by go.work.sum
    pub fn go_sum_files(&self) -> Result<Vec<RootedPath>> {
        let mut files = self
            .workspace_paths()?
            .into_iter()
            .map(|member| member.join_within_root("go.sum"))
            .collect::<Result<Vec<_>>>()?;
        files.push(self.dir.join_within_root("go.work.sum")?);
        Ok(files)
    }

    /// Union of the checksummed modules across the workspace
    pub fn checksummed_modules(&self) -> Result<HashSet<(String, String)>> {
        let mut modules = HashSet::new();
        for file in self.go_sum_files()? {
            modules.extend(parse_go_sum(&file));
        }
        Ok(modules)
    }
}
