// src/workspace.rs

//! Multi-module workspace discovery
//!
//! A workspace lists its members either explicitly (go.work `use`
//! directives) or as glob patterns. Members are resolved
//! relative to the directory declaring them, must stay inside the project
//! root, and are skipped with a warning when they lack the ecosystem's
//! per-member manifest. Declaration order is kept; duplicates are dropped.

use crate::error::{Error, Result};
use crate::filesystem::RootedPath;
use std::path::PathBuf;
use tracing::{debug, warn};

/// A workspace member directory and its manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub path: RootedPath,
    pub manifest: PathBuf,
}

/// Resolves member references declared in `base`
pub struct WorkspaceResolver<'a> {
    base: &'a RootedPath,
    manifest_name: &'static str,
}

impl<'a> WorkspaceResolver<'a> {
    pub fn new(base: &'a RootedPath, manifest_name: &'static str) -> Self {
        Self {
            base,
            manifest_name,
        }
    }

    /// Resolve explicitly listed member directories
    pub fn resolve_explicit<S: AsRef<str>>(&self, members: &[S]) -> Result<Vec<Workspace>> {
        let mut workspaces = Vec::new();
        for member in members {
            let path = self.base.join_within_root(member.as_ref())?;
            self.push_member(&mut workspaces, path);
        }
        Ok(workspaces)
    }

    /// Expand glob patterns into member directories
    pub fn resolve_globs<S: AsRef<str>>(&self, patterns: &[S]) -> Result<Vec<Workspace>> {
        let mut workspaces = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let full = self.base.path().join(pattern);
            let matches = glob::glob(&full.to_string_lossy()).map_err(|e| {
                Error::rejected(format!("Invalid workspace pattern '{}': {}", pattern, e))
            })?;

            for entry in matches {
                let matched = entry.map_err(|e| {
                    Error::IoError(format!("Failed to expand workspace pattern '{}': {}", pattern, e))
                })?;
                let path = self.base.join_within_root(&matched)?;
                if path.path().is_dir() {
                    self.push_member(&mut workspaces, path);
                }
            }
        }
        Ok(workspaces)
    }

    fn push_member(&self, workspaces: &mut Vec<Workspace>, path: RootedPath) {
        if workspaces.iter().any(|w| w.path == path) {
            return;
        }

        let manifest = path.path().join(self.manifest_name);
        if !manifest.is_file() {
            warn!(
                "The workspace located at {} does not contain a {} and will be ignored.",
                path.subpath_from_root().display(),
                self.manifest_name
            );
            return;
        }

        debug!("Workspace member: {}", path.subpath_from_root().display());
        workspaces.push(Workspace { path, manifest });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_explicit_members_keep_order_and_skip_missing_manifest() {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path(), "tools/go.mod", "module example.com/tools\n");
        write(temp.path(), "app/go.mod", "module example.com/app\n");
        std::fs::create_dir_all(temp.path().join("docs")).unwrap();
        let root = RootedPath::new(temp.path()).unwrap();

        let members = WorkspaceResolver::new(&root, "go.mod")
            .resolve_explicit(&["./tools", "./docs", "./app", "tools"])
            .unwrap();
        let paths: Vec<PathBuf> = members.iter().map(|m| m.path.subpath_from_root()).collect();
        assert_eq!(paths, vec![PathBuf::from("tools"), PathBuf::from("app")]);
    }

    #[test]
    fn test_explicit_member_outside_root_fails() {
        let temp = tempfile::tempdir().unwrap();
        let root = RootedPath::new(temp.path()).unwrap();
        let err = WorkspaceResolver::new(&root, "go.mod")
            .resolve_explicit(&["../elsewhere"])
            .unwrap_err();
        assert!(matches!(err, Error::PathOutsideRoot { .. }));
    }

    #[test]
    fn test_glob_members_skip_files_and_missing_manifest() {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path(), "packages/a/package.json", r#"{"name": "a"}"#);
        write(temp.path(), "packages/b/package.json", r#"{"name": "b"}"#);
        write(temp.path(), "packages/readme.md", "not a dir");
        std::fs::create_dir_all(temp.path().join("packages/empty")).unwrap();
        let root = RootedPath::new(temp.path()).unwrap();

        let members = WorkspaceResolver::new(&root, "package.json")
            .resolve_globs(&["packages/*", "packages/a"])
            .unwrap();
        let paths: Vec<PathBuf> = members.iter().map(|m| m.path.subpath_from_root()).collect();
        assert_eq!(
            paths,
            vec![PathBuf::from("packages/a"), PathBuf::from("packages/b")]
        );
        assert!(members[0].manifest.ends_with("packages/a/package.json"));
    }

    #[test]
    fn test_glob_escaping_root_fails() {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path(), "project/go.mod", "module example.com/project\n");
        write(temp.path(), "other/go.mod", "module example.com/other\n");
        let root = RootedPath::new(temp.path().join("project")).unwrap();

        let err = WorkspaceResolver::new(&root, "go.mod")
            .resolve_globs(&["../*"])
            .unwrap_err();
        assert!(matches!(err, Error::PathOutsideRoot { .. }));
    }

    #[test]
    fn test_invalid_glob_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let root = RootedPath::new(temp.path()).unwrap();

        let err = WorkspaceResolver::new(&root, "go.mod")
            .resolve_globs(&["mods/[*"])
            .unwrap_err();
        assert!(err.is_rejection());
    }
}
