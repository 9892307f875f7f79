// src/filesystem/path.rs

//! Paths anchored to a project root
//!
//! Manifests name files relative to the directory that declares them
//! (`replace ../sibling`, `use ./tools`, `workspaces: ["packages/*"]`). A
//! [`RootedPath`] resolves such references and refuses any result that
//! lands outside the project root, including escapes through symlinks.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Symlink hops followed before a path is considered unresolvable
const MAX_SYMLINK_DEPTH: usize = 40;

/// An absolute path that is known to lie inside `root`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RootedPath {
    root: PathBuf,
    path: PathBuf,
}

impl RootedPath {
    /// Anchor a new root at an existing directory
    ///
    /// The root is canonicalized so later containment checks compare
    /// resolved paths on both sides.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let canonical = root.canonicalize().map_err(|e| {
            Error::IoError(format!("Failed to resolve root {}: {}", root.display(), e))
        })?;
        Ok(Self {
            root: canonical.clone(),
            path: canonical,
        })
    }

    /// The project root
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The resolved absolute path
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Join a relative reference onto this path, staying within the root
    ///
    /// `..` components and existing symlinks are resolved before the
    /// containment check; a result outside the root is an error, never
    /// clamped.
    ///
    /// # Examples
    ///
    /// ```
    /// use depfetch::filesystem::RootedPath;
    ///
    /// let temp = tempfile::tempdir().unwrap();
    /// std::fs::create_dir_all(temp.path().join("a/b")).unwrap();
    ///
    /// let root = RootedPath::new(temp.path()).unwrap();
    /// let module = root.join_within_root("a/b").unwrap();
    ///
    /// // Siblings are fine as long as they stay under the root
    /// let sibling = module.join_within_root("../c").unwrap();
    /// assert_eq!(sibling.subpath_from_root(), std::path::PathBuf::from("a/c"));
    ///
    /// // Escapes are rejected
    /// assert!(module.join_within_root("../../../etc").is_err());
    /// ```
    pub fn join_within_root(&self, rel: impl AsRef<Path>) -> Result<Self> {
        let rel = rel.as_ref();
        let resolved = resolve_path(&self.path.join(rel), 0)?;

        if !resolved.starts_with(&self.root) {
            return Err(Error::PathOutsideRoot {
                path: resolved,
                root: self.root.clone(),
            });
        }

        Ok(Self {
            root: self.root.clone(),
            path: resolved,
        })
    }

    /// The path relative to the root, `.` for the root itself
    pub fn subpath_from_root(&self) -> PathBuf {
        match self.path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => PathBuf::from("."),
            Ok(rel) => rel.to_path_buf(),
            Err(_) => PathBuf::from("."),
        }
    }

    /// A new RootedPath whose root is this path
    pub fn re_root(&self) -> Self {
        Self {
            root: self.path.clone(),
            path: self.path.clone(),
        }
    }
}

impl AsRef<Path> for RootedPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// Resolve `.`/`..` and any symlinks that exist along the path
///
/// Components that do not exist yet are kept lexically, so this also works
/// for files that are about to be created.
fn resolve_path(path: &Path, depth: usize) -> Result<PathBuf> {
    if depth > MAX_SYMLINK_DEPTH {
        return Err(Error::InvalidPath(format!(
            "Too many levels of symbolic links: {}",
            path.display()
        )));
    }

    let mut resolved = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                resolved.push(name);
                let is_symlink = std::fs::symlink_metadata(&resolved)
                    .map(|meta| meta.file_type().is_symlink())
                    .unwrap_or(false);
                if is_symlink {
                    let target = std::fs::read_link(&resolved).map_err(|e| {
                        Error::IoError(format!(
                            "Failed to read symlink {}: {}",
                            resolved.display(),
                            e
                        ))
                    })?;
                    resolved.pop();
                    resolved = resolve_path(&resolved.join(target), depth + 1)?;
                }
            }
        }
    }
    Ok(resolved)
}

/// Sanitize a filename (single path component) built from untrusted input
///
/// Rejects path separators and the special `.`/`..` names.
///
/// # Examples
///
/// ```
/// use depfetch::filesystem::path::sanitize_filename;
///
/// assert_eq!(sanitize_filename("foo-1.0.tar.gz").unwrap(), "foo-1.0.tar.gz");
/// assert!(sanitize_filename("../foo.tar.gz").is_err());
/// ```
pub fn sanitize_filename(name: &str) -> Result<String> {
    if name.contains('/') || name.contains('\\') || name == ".." || name == "." {
        return Err(Error::InvalidPath(format!("Invalid filename: {}", name)));
    }

    if name.is_empty() {
        return Err(Error::InvalidPath("Empty filename".to_string()));
    }

    Ok(name.to_string())
}
