// src/version/mod.rs

//! Canonical versions for modules checked out at a commit
//!
//! A module built from a repository checkout has no version of its own. We
//! derive one from the repository history following the Go pseudo-version
//! convention:
//!
//! - an eligible tag on the commit itself is returned verbatim
//! - otherwise the highest eligible tag reachable from the commit is the base:
//!   - release `vX.Y.Z` gives `vX.Y.(Z+1)-0.<timestamp>-<hash>`
//!   - pre-release `vX.Y.Z-pre` gives `vX.Y.Z-pre.0.<timestamp>-<hash>`
//! - with no eligible ancestor the result is `vN.0.0-<timestamp>-<hash>`
//!
//! A tag is eligible when it is strict semver, its major version agrees
//! with the module path suffix (`/v2`, `/v3`, ...; no suffix means major 0
//! or 1), and it belongs to the module's subdirectory (`sub/dir/v1.0.0` for
//! a module in `sub/dir`, unprefixed tags for the repository root).

mod git;

pub use git::GitHistory;

use crate::error::{Error, Result};
use crate::filesystem::RootedPath;
use chrono::{DateTime, Utc};
use regex::Regex;
use semver::Version;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

static MAJOR_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/v(\d+)$").unwrap());

/// A commit and its committer timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub hash: String,
    /// Seconds since the epoch, UTC
    pub timestamp: i64,
}

/// Read access to the tag/commit history of a repository
pub trait RepoHistory {
    /// Make sure all tags from the remote are present locally
    fn fetch_tags(&self) -> Result<()>;

    /// The checked-out commit
    fn head(&self) -> Result<CommitInfo>;

    /// Tags applied directly to `commit`
    fn tags_pointing_at(&self, commit: &str) -> Result<Vec<String>>;

    /// Tags reachable from `commit`
    fn tags_merged(&self, commit: &str) -> Result<Vec<String>>;

    /// Human-readable location used in errors
    fn describe(&self) -> String;
}

/// Resolves module versions for one checkout
#[derive(Debug, Clone)]
pub struct ModuleVersionResolver {
    commit: CommitInfo,
    commit_tags: Vec<String>,
    reachable_tags: Vec<String>,
}

impl ModuleVersionResolver {
    pub fn new(commit: CommitInfo, commit_tags: Vec<String>, reachable_tags: Vec<String>) -> Self {
        Self {
            commit,
            commit_tags,
            reachable_tags,
        }
    }

    /// Fetch tags from the remote and snapshot what the resolver needs
    pub fn from_history(history: &dyn RepoHistory) -> Result<Self> {
        history.fetch_tags().map_err(|e| {
            Error::ResolutionError(format!(
                "Failed to fetch the tags on the Git repository ({}) for {}",
                e,
                history.describe()
            ))
        })?;

        let commit = history.head()?;
        let commit_tags = history.tags_pointing_at(&commit.hash)?;
        let reachable_tags = history.tags_merged(&commit.hash)?;
        debug!(
            "Commit {}: {} tags on the commit, {} reachable",
            commit.hash,
            commit_tags.len(),
            reachable_tags.len()
        );

        Ok(Self::new(commit, commit_tags, reachable_tags))
    }

    /// Resolver for the git checkout at `path`
    pub fn from_repo_path(path: &Path) -> Result<Self> {
        let history = GitHistory::open(path)?;
        Self::from_history(&history)
    }

    #[inline]
    pub fn commit(&self) -> &CommitInfo {
        &self.commit
    }

    /// Version of `module_name`, whose source lives in `module_dir`
    pub fn get_golang_version(&self, module_name: &str, module_dir: &RootedPath) -> Result<String> {
        let major = major_version(module_name);
        let subpath = module_dir.subpath_from_root();
        let prefix = if subpath == Path::new(".") {
            None
        } else {
            Some(format!("{}/", subpath.to_string_lossy()))
        };

        if let Some((tag, _)) = highest_eligible(&self.commit_tags, major, prefix.as_deref()) {
            debug!("Module {} is tagged at {} as {}", module_name, self.commit.hash, tag);
            return Ok(tag);
        }

        let timestamp = format_timestamp(self.commit.timestamp)?;
        let short_hash: String = self.commit.hash.chars().take(12).collect();

        let version = match highest_eligible(&self.reachable_tags, major, prefix.as_deref()) {
            Some((_, version)) if version.pre.is_empty() => format!(
                "v{}.{}.{}-0.{}-{}",
                version.major,
                version.minor,
                version.patch + 1,
                timestamp,
                short_hash
            ),
            Some((tag, _)) => format!("{}.0.{}-{}", tag, timestamp, short_hash),
            None => format!("v{}.0.0-{}-{}", major.unwrap_or(0), timestamp, short_hash),
        };

        debug!("Module {} resolved to pseudo-version {}", module_name, version);
        Ok(version)
    }
}

/// Major version required by the module path, if it has a `/vN` suffix
pub fn major_version(module_name: &str) -> Option<u64> {
    MAJOR_SUFFIX
        .captures(module_name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Highest eligible tag, returned without its subpath prefix
fn highest_eligible(
    tags: &[String],
    major: Option<u64>,
    prefix: Option<&str>,
) -> Option<(String, Version)> {
    tags.iter()
        .filter_map(|tag| {
            let name = match prefix {
                Some(prefix) => tag.strip_prefix(prefix)?,
                None => tag.as_str(),
            };
            let version = Version::parse(name.strip_prefix('v')?).ok()?;
            let major_ok = match major {
                Some(required) => version.major == required,
                None => version.major <= 1,
            };
            major_ok.then(|| (name.to_string(), version))
        })
        .max_by(|(_, a), (_, b)| a.cmp(b))
}

fn format_timestamp(timestamp: i64) -> Result<String> {
    let time: DateTime<Utc> = DateTime::from_timestamp(timestamp, 0).ok_or_else(|| {
        Error::ResolutionError(format!("Invalid commit timestamp: {}", timestamp))
    })?;
    Ok(time.format("%Y%m%d%H%M%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "6c7249e8c989d2bf39b6dd5f6bbb7b3b1c65e9ba";
    // 2019-11-08 21:23:03 UTC
    const TIMESTAMP: i64 = 1573248183;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn resolver(commit_tags: &[&str], reachable: &[&str]) -> ModuleVersionResolver {
        ModuleVersionResolver::new(
            CommitInfo {
                hash: HASH.to_string(),
                timestamp: TIMESTAMP,
            },
            tags(commit_tags),
            tags(reachable),
        )
    }

    fn root() -> (tempfile::TempDir, RootedPath) {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("path")).unwrap();
        let root = RootedPath::new(temp.path()).unwrap();
        (temp, root)
    }

    #[test]
    fn test_major_version() {
        assert_eq!(major_version("github.com/foo/bar"), None);
        assert_eq!(major_version("github.com/foo/bar/v2"), Some(2));
        assert_eq!(major_version("github.com/foo/bar/v12"), Some(12));
        assert_eq!(major_version("github.com/foo/v2/bar"), None);
    }

    #[test]
    fn test_exact_tag_on_commit() {
        let (_temp, root) = root();
        let resolver = resolver(&["v1.2.3"], &["v1.0.0", "v1.2.3"]);
        assert_eq!(
            resolver.get_golang_version("github.com/foo/bar", &root).unwrap(),
            "v1.2.3"
        );
    }

    #[test]
    fn test_highest_exact_tag_wins() {
        let (_temp, root) = root();
        let resolver = resolver(&["v1.0.0", "v1.1.0", "v1.0.5"], &[]);
        assert_eq!(
            resolver.get_golang_version("github.com/foo/bar", &root).unwrap(),
            "v1.1.0"
        );
    }

    #[test]
    fn test_exact_tag_with_wrong_major_ignored() {
        let (_temp, root) = root();
        let resolver = resolver(&["v2.0.0"], &["v1.0.0", "v2.0.0"]);
        assert_eq!(
            resolver.get_golang_version("github.com/foo/bar", &root).unwrap(),
            "v1.0.1-0.20191108212303-6c7249e8c989"
        );
    }

    #[test]
    fn test_pseudo_version_after_release() {
        let (_temp, root) = root();
        let resolver = resolver(&[], &["v1.0.0"]);
        assert_eq!(
            resolver.get_golang_version("github.com/foo/bar", &root).unwrap(),
            "v1.0.1-0.20191108212303-6c7249e8c989"
        );
    }

    #[test]
    fn test_pseudo_version_after_prerelease() {
        let (_temp, root) = root();
        let resolver = resolver(&[], &["v2.1.0", "v2.2.0-alpha"]);
        assert_eq!(
            resolver.get_golang_version("github.com/foo/bar/v2", &root).unwrap(),
            "v2.2.0-alpha.0.20191108212303-6c7249e8c989"
        );
    }

    #[test]
    fn test_pseudo_version_without_tags() {
        let (_temp, root) = root();
        let resolver = resolver(&[], &[]);
        assert_eq!(
            resolver.get_golang_version("github.com/foo/bar", &root).unwrap(),
            "v0.0.0-20191108212303-6c7249e8c989"
        );
        assert_eq!(
            resolver.get_golang_version("github.com/foo/bar/v2", &root).unwrap(),
            "v2.0.0-20191108212303-6c7249e8c989"
        );
    }

    #[test]
    fn test_non_semver_tags_ignored() {
        let (_temp, root) = root();
        let resolver = resolver(&["release-1", "v1.2"], &["latest", "v1.0"]);
        assert_eq!(
            resolver.get_golang_version("github.com/foo/bar", &root).unwrap(),
            "v0.0.0-20191108212303-6c7249e8c989"
        );
    }

    #[test]
    fn test_submodule_tags_are_scoped() {
        let (_temp, root) = root();
        let submodule = root.join_within_root("path").unwrap();
        let resolver = resolver(&["path/v1.4.0"], &["v1.9.0", "path/v1.4.0"]);

        assert_eq!(
            resolver
                .get_golang_version("github.com/foo/bar/path", &submodule)
                .unwrap(),
            "v1.4.0"
        );
        // The root module never sees the submodule's tag
        assert_eq!(
            resolver.get_golang_version("github.com/foo/bar", &root).unwrap(),
            "v1.9.1-0.20191108212303-6c7249e8c989"
        );
    }

    #[test]
    fn test_submodule_ignores_root_tags() {
        let (_temp, root) = root();
        let submodule = root.join_within_root("path").unwrap();
        let resolver = resolver(&["v1.0.0"], &["v1.0.0"]);
        assert_eq!(
            resolver
                .get_golang_version("github.com/foo/bar/path", &submodule)
                .unwrap(),
            "v0.0.0-20191108212303-6c7249e8c989"
        );
    }

    #[test]
    fn test_decreasing_tag_history_uses_semver_max() {
        let (_temp, root) = root();
        // v1.5.0 was tagged before v1.3.0 in history order
        let resolver = resolver(&[], &["v1.5.0", "v1.3.0"]);
        assert_eq!(
            resolver.get_golang_version("github.com/foo/bar", &root).unwrap(),
            "v1.5.1-0.20191108212303-6c7249e8c989"
        );
    }

    struct FailingHistory;

    impl RepoHistory for FailingHistory {
        fn fetch_tags(&self) -> Result<()> {
            Err(Error::CommandFailed("no remote".to_string()))
        }
        fn head(&self) -> Result<CommitInfo> {
            unreachable!()
        }
        fn tags_pointing_at(&self, _commit: &str) -> Result<Vec<String>> {
            unreachable!()
        }
        fn tags_merged(&self, _commit: &str) -> Result<Vec<String>> {
            unreachable!()
        }
        fn describe(&self) -> String {
            "/src/repo".to_string()
        }
    }

    #[test]
    fn test_tag_fetch_failure_is_resolution_error() {
        let err = ModuleVersionResolver::from_history(&FailingHistory).unwrap_err();
        assert!(matches!(err, Error::ResolutionError(_)));
        assert!(
            err.to_string()
                .contains("Failed to fetch the tags on the Git repository")
        );
        assert!(err.to_string().ends_with("for /src/repo"));
    }
}
